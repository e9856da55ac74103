//! Core domain types for trialscope
//!
//! These types mirror the relational model: a central [`Study`] record keyed
//! by its registry identifier, exclusively-owned child entities
//! (interventions, conditions, targets, outcomes, results, safety data,
//! publications), and user-activity records (favorites, history, feedback).
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Study** | A clinical trial/research record, the central entity |
//! | **NCT id** | External registry identifier, `NCT` + 8 digits |
//! | **Outcome** | A defined endpoint a Study measures |
//! | **Result** | A reported measured value for an outcome or result-type code |
//! | **Read-model** | Derived aggregation computed from base entities (see [`crate::db::views`]) |
//!
//! Enum fields fed by external registry data keep an `Other(String)` arm so
//! new categories survive ingestion; fields with a stable value set
//! ([`Phase`], [`FeedbackStatus`]) are closed.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generate a fresh entity id.
pub(crate) fn new_id() -> String {
    Uuid::new_v4().to_string()
}

// ============================================
// Registry identifier
// ============================================

/// An external registry identifier: `NCT` followed by exactly 8 digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NctId(String);

impl NctId {
    /// Parse and validate a registry identifier.
    pub fn new(raw: impl Into<String>) -> crate::error::Result<Self> {
        let raw = raw.into();
        let digits = raw.strip_prefix("NCT");
        match digits {
            Some(d) if d.len() == 8 && d.chars().all(|c| c.is_ascii_digit()) => Ok(Self(raw)),
            _ => Err(crate::error::Error::Validation(format!(
                "invalid NCT identifier: {:?} (expected NCT followed by 8 digits)",
                raw
            ))),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap a value read back from the database, which was validated on the
    /// way in.
    pub(crate) fn trusted(raw: String) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for NctId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================
// Study enums
// ============================================

/// Trial phase. Registry phases are a stable, closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    EarlyPhase1,
    Phase1,
    Phase1And2,
    Phase2,
    Phase2And3,
    Phase3,
    Phase4,
    NotApplicable,
}

impl Phase {
    /// Registry display string, also the database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::EarlyPhase1 => "Early Phase 1",
            Phase::Phase1 => "Phase 1",
            Phase::Phase1And2 => "Phase 1/Phase 2",
            Phase::Phase2 => "Phase 2",
            Phase::Phase2And3 => "Phase 2/Phase 3",
            Phase::Phase3 => "Phase 3",
            Phase::Phase4 => "Phase 4",
            Phase::NotApplicable => "N/A",
        }
    }
}

impl std::str::FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Early Phase 1" => Ok(Phase::EarlyPhase1),
            "Phase 1" => Ok(Phase::Phase1),
            "Phase 1/Phase 2" => Ok(Phase::Phase1And2),
            "Phase 2" => Ok(Phase::Phase2),
            "Phase 2/Phase 3" => Ok(Phase::Phase2And3),
            "Phase 3" => Ok(Phase::Phase3),
            "Phase 4" => Ok(Phase::Phase4),
            "N/A" => Ok(Phase::NotApplicable),
            _ => Err(format!("unknown phase: {}", s)),
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Recruitment status. Registry feeds can introduce new values, so unknown
/// strings are preserved rather than rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudyStatus {
    NotYetRecruiting,
    Recruiting,
    EnrollingByInvitation,
    ActiveNotRecruiting,
    Completed,
    Suspended,
    Terminated,
    Withdrawn,
    Other(String),
}

impl StudyStatus {
    pub fn as_str(&self) -> &str {
        match self {
            StudyStatus::NotYetRecruiting => "Not yet recruiting",
            StudyStatus::Recruiting => "Recruiting",
            StudyStatus::EnrollingByInvitation => "Enrolling by invitation",
            StudyStatus::ActiveNotRecruiting => "Active, not recruiting",
            StudyStatus::Completed => "Completed",
            StudyStatus::Suspended => "Suspended",
            StudyStatus::Terminated => "Terminated",
            StudyStatus::Withdrawn => "Withdrawn",
            StudyStatus::Other(s) => s,
        }
    }
}

impl std::str::FromStr for StudyStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Not yet recruiting" => StudyStatus::NotYetRecruiting,
            "Recruiting" => StudyStatus::Recruiting,
            "Enrolling by invitation" => StudyStatus::EnrollingByInvitation,
            "Active, not recruiting" => StudyStatus::ActiveNotRecruiting,
            "Completed" => StudyStatus::Completed,
            "Suspended" => StudyStatus::Suspended,
            "Terminated" => StudyStatus::Terminated,
            "Withdrawn" => StudyStatus::Withdrawn,
            other => StudyStatus::Other(other.to_string()),
        })
    }
}

impl std::fmt::Display for StudyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result-type code. OS/PFS/ORR are the fixed codes the results summary
/// rolls up; anything else is carried through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultType {
    /// Overall survival
    Os,
    /// Progression-free survival
    Pfs,
    /// Objective response rate
    Orr,
    Other(String),
}

impl ResultType {
    pub fn as_str(&self) -> &str {
        match self {
            ResultType::Os => "OS",
            ResultType::Pfs => "PFS",
            ResultType::Orr => "ORR",
            ResultType::Other(s) => s,
        }
    }
}

impl std::str::FromStr for ResultType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "OS" => ResultType::Os,
            "PFS" => ResultType::Pfs,
            "ORR" => ResultType::Orr,
            other => ResultType::Other(other.to_string()),
        })
    }
}

impl std::fmt::Display for ResultType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================
// Users, roles, sessions
// ============================================

/// A registered user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    /// Login name (unique)
    pub username: String,
    /// Email address (unique)
    pub email: String,
    /// `salt$digest` password hash (see [`crate::auth`])
    pub password_hash: String,
    pub full_name: Option<String>,
    pub institution: Option<String>,
    pub title: Option<String>,
    pub specialty: Option<String>,
    pub is_active: bool,
    pub is_verified: bool,
    pub is_superuser: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Public profile view: everything except the password hash.
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id.clone(),
            username: self.username.clone(),
            email: self.email.clone(),
            full_name: self.full_name.clone(),
            institution: self.institution.clone(),
            title: self.title.clone(),
            specialty: self.specialty.clone(),
            is_active: self.is_active,
            is_verified: self.is_verified,
            is_superuser: self.is_superuser,
            last_login: self.last_login,
            created_at: self.created_at,
        }
    }
}

/// Credential-free view of a [`User`], handed to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    pub institution: Option<String>,
    pub title: Option<String>,
    pub specialty: Option<String>,
    pub is_active: bool,
    pub is_verified: bool,
    pub is_superuser: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Registration input for a new account.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    /// Plaintext password; hashed before storage
    pub password: String,
    pub full_name: Option<String>,
    pub institution: Option<String>,
    pub title: Option<String>,
    pub specialty: Option<String>,
}

/// A named role with a JSON permission map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    /// Role name (unique)
    pub name: String,
    pub description: Option<String>,
    /// Capability name -> boolean/structured value
    pub permissions: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user-to-role assignment, recording who assigned it and when.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub user_id: String,
    pub role_id: String,
    pub assigned_at: DateTime<Utc>,
    pub assigned_by: Option<String>,
}

/// An authenticated session.
///
/// A session is valid iff `now < expires_at`; there is no grace period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSession {
    pub id: String,
    pub user_id: String,
    /// Opaque token (unique)
    pub session_token: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl UserSession {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Client metadata attached to sessions and audit logs.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

// ============================================
// Study and child entities
// ============================================

/// A clinical trial/research record, the central entity of the domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Study {
    pub id: String,
    /// Registry identifier (unique)
    pub nct_id: NctId,
    pub official_title: String,
    pub brief_title: Option<String>,
    pub acronym: Option<String>,
    pub study_type: Option<String>,
    pub phase: Option<Phase>,
    pub status: Option<StudyStatus>,
    pub status_verified_date: Option<NaiveDate>,
    pub start_date: Option<NaiveDate>,
    pub completion_date: Option<NaiveDate>,
    pub primary_completion_date: Option<NaiveDate>,
    pub brief_summary: Option<String>,
    pub detailed_description: Option<String>,
    pub study_design: Option<String>,
    pub allocation: Option<String>,
    pub intervention_model: Option<String>,
    pub primary_purpose: Option<String>,
    pub masking: Option<String>,
    pub primary_endpoint: Option<String>,
    pub secondary_endpoint: Option<String>,
    pub enrollment: Option<i64>,
    pub enrollment_type: Option<String>,
    pub sponsor_name: Option<String>,
    pub sponsor_class: Option<String>,
    pub collaborator: Option<String>,
    pub principal_investigator: Option<String>,
    /// Which registry/feed this record came from
    pub data_source: Option<String>,
    pub data_source_id: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Study {
    /// Create a study with the required fields; everything else defaults.
    pub fn new(nct_id: NctId, official_title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            nct_id,
            official_title: official_title.into(),
            brief_title: None,
            acronym: None,
            study_type: None,
            phase: None,
            status: None,
            status_verified_date: None,
            start_date: None,
            completion_date: None,
            primary_completion_date: None,
            brief_summary: None,
            detailed_description: None,
            study_design: None,
            allocation: None,
            intervention_model: None,
            primary_purpose: None,
            masking: None,
            primary_endpoint: None,
            secondary_endpoint: None,
            enrollment: None,
            enrollment_type: None,
            sponsor_name: None,
            sponsor_class: None,
            collaborator: None,
            principal_investigator: None,
            data_source: None,
            data_source_id: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A treatment (drug/procedure) evaluated by a study.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intervention {
    pub id: String,
    pub study_id: String,
    pub name: String,
    pub intervention_type: Option<String>,
    pub description: Option<String>,
    pub other_name: Option<String>,
    pub drug_name_generic: Option<String>,
    pub drug_name_brand: Option<String>,
    pub drug_class: Option<String>,
    pub mechanism_of_action: Option<String>,
    pub dosage_form: Option<String>,
    pub dosage_route: Option<String>,
    pub dosage_frequency: Option<String>,
    pub dosage_strength: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Intervention {
    pub fn new(study_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            study_id: study_id.into(),
            name: name.into(),
            intervention_type: None,
            description: None,
            other_name: None,
            drug_name_generic: None,
            drug_name_brand: None,
            drug_class: None,
            mechanism_of_action: None,
            dosage_form: None,
            dosage_route: None,
            dosage_frequency: None,
            dosage_strength: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A disease/tumor classification a study addresses.
///
/// Every study must have at least one; `Database::insert_study` enforces
/// this within the insert transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub id: String,
    pub study_id: String,
    pub name: String,
    pub mesh_term: Option<String>,
    pub icd10_code: Option<String>,
    pub category_level1: Option<String>,
    pub category_level2: Option<String>,
    pub category_level3: Option<String>,
    pub stage: Option<String>,
    pub stage_description: Option<String>,
    pub biomarker: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Condition {
    pub fn new(study_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            study_id: study_id.into(),
            name: name.into(),
            mesh_term: None,
            icd10_code: None,
            category_level1: None,
            category_level2: None,
            category_level3: None,
            stage: None,
            stage_description: None,
            biomarker: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A molecular target/biomarker relevant to a study.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MolecularTarget {
    pub id: String,
    pub study_id: String,
    pub name: String,
    pub full_name: Option<String>,
    pub description: Option<String>,
    pub detection_method: Option<String>,
    pub detection_criteria: Option<String>,
    pub positive_criteria: Option<String>,
    pub negative_criteria: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MolecularTarget {
    pub fn new(study_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            study_id: study_id.into(),
            name: name.into(),
            full_name: None,
            description: None,
            detection_method: None,
            detection_criteria: None,
            positive_criteria: None,
            negative_criteria: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A defined endpoint a study measures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub id: String,
    pub study_id: String,
    pub title: String,
    pub description: Option<String>,
    pub outcome_type: Option<String>,
    pub time_frame: Option<String>,
    pub measure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Outcome {
    pub fn new(study_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            study_id: study_id.into(),
            title: title.into(),
            description: None,
            outcome_type: None,
            time_frame: None,
            measure: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A reported measurement for a study.
///
/// The p-value is stored as text since it may be an inequality
/// (e.g. `<0.001`). If the referenced outcome is deleted the result row
/// survives with `outcome_id` nulled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyResult {
    pub id: String,
    pub study_id: String,
    pub outcome_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub group_name: Option<String>,
    pub group_description: Option<String>,
    pub sample_size: Option<i64>,
    /// Formatted result value (e.g. "23.4 months")
    pub value: Option<String>,
    pub unit: Option<String>,
    pub mean_value: Option<f64>,
    pub median_value: Option<f64>,
    pub std_deviation: Option<f64>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub ci_lower: Option<f64>,
    pub ci_upper: Option<f64>,
    pub confidence_level: Option<i64>,
    pub p_value: Option<String>,
    pub hazard_ratio: Option<f64>,
    pub odds_ratio: Option<f64>,
    pub result_type: Option<ResultType>,
    pub data_source: Option<String>,
    pub publication_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StudyResult {
    pub fn new(study_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            study_id: study_id.into(),
            outcome_id: None,
            title: None,
            description: None,
            group_name: None,
            group_description: None,
            sample_size: None,
            value: None,
            unit: None,
            mean_value: None,
            median_value: None,
            std_deviation: None,
            min_value: None,
            max_value: None,
            ci_lower: None,
            ci_upper: None,
            confidence_level: None,
            p_value: None,
            hazard_ratio: None,
            odds_ratio: None,
            result_type: None,
            data_source: None,
            publication_date: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A subgroup analysis narrowing a result by a defined criterion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubgroupAnalysis {
    pub id: String,
    pub study_id: String,
    pub result_id: Option<String>,
    pub subgroup_name: Option<String>,
    pub subgroup_criteria: Option<String>,
    pub sample_size: Option<i64>,
    pub event_count: Option<i64>,
    pub hazard_ratio: Option<f64>,
    pub ci_lower: Option<f64>,
    pub ci_upper: Option<f64>,
    pub p_value: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubgroupAnalysis {
    pub fn new(study_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            study_id: study_id.into(),
            result_id: None,
            subgroup_name: None,
            subgroup_criteria: None,
            sample_size: None,
            event_count: None,
            hazard_ratio: None,
            ci_lower: None,
            ci_upper: None,
            p_value: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Adverse-event counts with a severity-grade breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyData {
    pub id: String,
    pub study_id: String,
    pub event_name: Option<String>,
    pub event_type: Option<String>,
    pub event_category: Option<String>,
    pub experimental_group_n: Option<i64>,
    pub experimental_group_events: Option<i64>,
    pub control_group_n: Option<i64>,
    pub control_group_events: Option<i64>,
    pub severity_grade1: Option<i64>,
    pub severity_grade2: Option<i64>,
    pub severity_grade3: Option<i64>,
    pub severity_grade4: Option<i64>,
    pub severity_grade5: Option<i64>,
    pub management: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SafetyData {
    pub fn new(study_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            study_id: study_id.into(),
            event_name: None,
            event_type: None,
            event_category: None,
            experimental_group_n: None,
            experimental_group_events: None,
            control_group_n: None,
            control_group_events: None,
            severity_grade1: None,
            severity_grade2: None,
            severity_grade3: None,
            severity_grade4: None,
            severity_grade5: None,
            management: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A publication reporting on a study.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Publication {
    pub id: String,
    pub study_id: String,
    /// Free-text author list as found in the source
    pub authors_text: Option<String>,
    pub title: String,
    pub journal: Option<String>,
    pub publication_year: Option<i64>,
    pub volume: Option<String>,
    pub issue: Option<String>,
    pub pages: Option<String>,
    pub doi: Option<String>,
    pub pmid: Option<String>,
    pub pmcid: Option<String>,
    pub abstract_text: Option<String>,
    pub full_text_url: Option<String>,
    pub publication_type: Option<String>,
    pub conference_name: Option<String>,
    pub conference_date: Option<NaiveDate>,
    pub conference_location: Option<String>,
    pub data_stage: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Publication {
    pub fn new(study_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            study_id: study_id.into(),
            authors_text: None,
            title: title.into(),
            journal: None,
            publication_year: None,
            volume: None,
            issue: None,
            pages: None,
            doi: None,
            pmid: None,
            pmcid: None,
            abstract_text: None,
            full_text_url: None,
            publication_type: None,
            conference_name: None,
            conference_date: None,
            conference_location: None,
            data_stage: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A structured author row, ordered by `author_order` within a publication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicationAuthor {
    pub id: String,
    pub publication_id: String,
    pub author_name: String,
    pub author_order: Option<i64>,
    pub affiliation: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PublicationAuthor {
    pub fn new(
        publication_id: impl Into<String>,
        author_name: impl Into<String>,
        author_order: Option<i64>,
    ) -> Self {
        Self {
            id: new_id(),
            publication_id: publication_id.into(),
            author_name: author_name.into(),
            author_order,
            affiliation: None,
            created_at: Utc::now(),
        }
    }
}

/// A publication together with its ordered author rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicationWithAuthors {
    pub publication: Publication,
    pub authors: Vec<PublicationAuthor>,
}

// ============================================
// User activity
// ============================================

/// A user's bookmark on a study. Unique per (user, study).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Favorite {
    pub id: String,
    pub user_id: String,
    pub study_id: String,
    pub created_at: DateTime<Utc>,
}

/// One entry in a user's view history. Append-only, never deduplicated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub user_id: String,
    pub study_id: String,
    pub viewed_at: DateTime<Utc>,
}

/// One recorded search. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRecord {
    pub id: String,
    pub user_id: Option<String>,
    pub query: String,
    /// Serialized filter set that produced the results
    pub filters: serde_json::Value,
    pub result_count: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Feedback lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackStatus {
    Pending,
    InProgress,
    Resolved,
    Dismissed,
}

impl FeedbackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackStatus::Pending => "pending",
            FeedbackStatus::InProgress => "in_progress",
            FeedbackStatus::Resolved => "resolved",
            FeedbackStatus::Dismissed => "dismissed",
        }
    }
}

impl std::str::FromStr for FeedbackStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FeedbackStatus::Pending),
            "in_progress" => Ok(FeedbackStatus::InProgress),
            "resolved" => Ok(FeedbackStatus::Resolved),
            "dismissed" => Ok(FeedbackStatus::Dismissed),
            _ => Err(format!("unknown feedback status: {}", s)),
        }
    }
}

/// Feedback category. Open-ended: the frontend may grow new categories.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackType {
    DataCorrection,
    FeatureRequest,
    Question,
    Other(String),
}

impl FeedbackType {
    pub fn as_str(&self) -> &str {
        match self {
            FeedbackType::DataCorrection => "data_correction",
            FeedbackType::FeatureRequest => "feature_request",
            FeedbackType::Question => "question",
            FeedbackType::Other(s) => s,
        }
    }
}

impl std::str::FromStr for FeedbackType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "data_correction" => FeedbackType::DataCorrection,
            "feature_request" => FeedbackType::FeatureRequest,
            "question" => FeedbackType::Question,
            other => FeedbackType::Other(other.to_string()),
        })
    }
}

/// A feedback record. The submitter may be anonymous.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub id: String,
    pub user_id: Option<String>,
    pub study_id: Option<String>,
    pub feedback_type: FeedbackType,
    pub feedback_text: String,
    pub status: FeedbackStatus,
    pub assigned_to: Option<String>,
    pub response_text: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================
// System tables
// ============================================

/// A runtime configuration entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub config_key: String,
    pub config_value: Option<String>,
    pub config_type: Option<String>,
    pub description: Option<String>,
    pub is_editable: bool,
    pub updated_at: DateTime<Utc>,
}

/// One audit-log row. Never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemLogEntry {
    pub id: i64,
    pub user_id: Option<String>,
    pub action: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub request_data: Option<serde_json::Value>,
    pub response_data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub duration_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Status of an external data sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Running,
    Succeeded,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Running => "running",
            SyncStatus::Succeeded => "succeeded",
            SyncStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(SyncStatus::Running),
            "succeeded" => Ok(SyncStatus::Succeeded),
            "failed" => Ok(SyncStatus::Failed),
            _ => Err(format!("unknown sync status: {}", s)),
        }
    }
}

/// One data-sync run record. Never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncLogEntry {
    pub id: i64,
    pub data_source: String,
    pub sync_type: Option<String>,
    pub total_records: Option<i64>,
    pub new_records: Option<i64>,
    pub updated_records: Option<i64>,
    pub deleted_records: Option<i64>,
    pub error_records: Option<i64>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub status: Option<SyncStatus>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ============================================
// Queries and pagination
// ============================================

/// Study search filter. All fields combine with AND; empty vectors and
/// `None` fields are ignored.
#[derive(Debug, Clone, Default)]
pub struct StudyFilter {
    /// Free-text terms, each matched against title/acronym/summary/nct_id
    pub query: Option<String>,
    pub phases: Vec<Phase>,
    pub statuses: Vec<StudyStatus>,
    pub study_types: Vec<String>,
    pub start_date_from: Option<NaiveDate>,
    pub start_date_to: Option<NaiveDate>,
    /// Substring match against condition names
    pub condition: Option<String>,
    /// Substring match against intervention names
    pub intervention: Option<String>,
    /// Substring match against molecular target names
    pub molecular_target: Option<String>,
    /// Substring match against sponsor name
    pub sponsor: Option<String>,
}

/// 1-based page request.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, size: 20 }
    }
}

impl PageRequest {
    pub fn new(page: u32, size: u32) -> Self {
        Self {
            page: page.max(1),
            size: size.max(1),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page.max(1) as i64 - 1) * self.size as i64
    }

    pub fn limit(&self) -> i64 {
        self.size as i64
    }
}

/// One page of query results with the unpaginated total.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub size: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, request: PageRequest) -> Self {
        Self {
            items,
            total,
            page: request.page,
            size: request.size,
        }
    }

    pub fn page_count(&self) -> i64 {
        if self.size == 0 {
            0
        } else {
            (self.total + self.size as i64 - 1) / self.size as i64
        }
    }
}

/// Compact study row for search listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudySummary {
    pub id: String,
    pub nct_id: NctId,
    pub official_title: String,
    pub brief_title: Option<String>,
    pub acronym: Option<String>,
    pub phase: Option<Phase>,
    pub status: Option<StudyStatus>,
    pub start_date: Option<NaiveDate>,
    pub completion_date: Option<NaiveDate>,
    pub enrollment: Option<i64>,
    pub sponsor_name: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// A study with all of its child collections loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyDetail {
    pub study: Study,
    pub interventions: Vec<Intervention>,
    pub conditions: Vec<Condition>,
    pub molecular_targets: Vec<MolecularTarget>,
    pub outcomes: Vec<Outcome>,
    pub results: Vec<StudyResult>,
    pub subgroup_analyses: Vec<SubgroupAnalysis>,
    pub safety_data: Vec<SafetyData>,
    pub publications: Vec<PublicationWithAuthors>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nct_id_validation() {
        assert!(NctId::new("NCT01234567").is_ok());
        assert!(NctId::new("NCT0123456").is_err()); // 7 digits
        assert!(NctId::new("NCT012345678").is_err()); // 9 digits
        assert!(NctId::new("NCT0123456a").is_err());
        assert!(NctId::new("nct01234567").is_err());
        assert!(NctId::new("").is_err());
    }

    #[test]
    fn test_phase_round_trip() {
        for phase in [
            Phase::EarlyPhase1,
            Phase::Phase1,
            Phase::Phase1And2,
            Phase::Phase2,
            Phase::Phase2And3,
            Phase::Phase3,
            Phase::Phase4,
            Phase::NotApplicable,
        ] {
            assert_eq!(phase.as_str().parse::<Phase>().unwrap(), phase);
        }
        assert!("Phase 5".parse::<Phase>().is_err());
    }

    #[test]
    fn test_open_enums_preserve_unknown_values() {
        let status: StudyStatus = "Paused by sponsor".parse().unwrap();
        assert_eq!(status, StudyStatus::Other("Paused by sponsor".to_string()));
        assert_eq!(status.as_str(), "Paused by sponsor");

        let rt: ResultType = "DOR".parse().unwrap();
        assert_eq!(rt.as_str(), "DOR");
        assert_eq!("OS".parse::<ResultType>().unwrap(), ResultType::Os);
    }

    #[test]
    fn test_session_validity_boundary() {
        let now = Utc::now();
        let session = UserSession {
            id: new_id(),
            user_id: new_id(),
            session_token: "tok".to_string(),
            ip_address: None,
            user_agent: None,
            expires_at: now,
            created_at: now,
        };
        // Exactly at expires_at is invalid: no grace period.
        assert!(!session.is_valid(now));
        assert!(session.is_valid(now - chrono::Duration::seconds(1)));
        assert!(!session.is_valid(now + chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_page_request_offsets() {
        let req = PageRequest::new(3, 25);
        assert_eq!(req.offset(), 50);
        assert_eq!(req.limit(), 25);
        // Page 0 clamps to 1
        assert_eq!(PageRequest::new(0, 10).offset(), 0);
    }

    #[test]
    fn test_page_count() {
        let page: Page<i32> = Page::new(vec![], 41, PageRequest::new(1, 20));
        assert_eq!(page.page_count(), 3);
    }
}
