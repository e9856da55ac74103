//! Application service layer
//!
//! Wraps the repository with the account, session, and lookup workflows:
//! password policy and hashing, login lockout, session lifecycle, search
//! capping and history capture, and feedback triage. Everything observable
//! flows through here; the repository stays policy-free.

use chrono::{Duration, Utc};

use crate::auth;
use crate::db::repo::{FavoriteItem, HistoryItem, LogEvent};
use crate::db::{Database, ResultsSummary, StudyOverview};
use crate::error::{Error, Result};
use crate::settings::RuntimeSettings;
use crate::types::*;

/// The outcome of a successful login.
#[derive(Debug, Clone)]
pub struct AuthResponse {
    /// Opaque session token to present on subsequent calls
    pub token: String,
    /// When the session expires
    pub expires_at: chrono::DateTime<Utc>,
    /// The authenticated user's profile
    pub user: UserProfile,
}

/// Application service over a [`Database`].
///
/// Holds a [`RuntimeSettings`] snapshot; call [`Service::reload_settings`]
/// after editing `system_config` to pick up changes.
pub struct Service {
    db: Database,
    settings: RuntimeSettings,
}

impl Service {
    /// Create a service over a migrated database.
    pub fn new(db: Database) -> Result<Self> {
        let settings = RuntimeSettings::load(&db)?;
        Ok(Self { db, settings })
    }

    /// The current settings snapshot
    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    /// Re-read the settings snapshot from `system_config`
    pub fn reload_settings(&mut self) -> Result<()> {
        self.settings = RuntimeSettings::load(&self.db)?;
        Ok(())
    }

    /// The underlying database
    pub fn db(&self) -> &Database {
        &self.db
    }

    // ============================================
    // Accounts and sessions
    // ============================================

    /// Register a new account.
    ///
    /// The password must meet the configured policy; username and email
    /// must be unused. Returns the stored profile.
    pub fn register(&self, new_user: &NewUser) -> Result<UserProfile> {
        if new_user.username.trim().is_empty() {
            return Err(Error::Validation("username must not be empty".to_string()));
        }
        if !new_user.email.contains('@') {
            return Err(Error::Validation(format!(
                "invalid email address: {}",
                new_user.email
            )));
        }
        auth::validate_password(&new_user.password, self.settings.password_min_length)?;

        if self.db.get_user_by_username(&new_user.username)?.is_some() {
            return Err(Error::Constraint(format!(
                "username already taken: {}",
                new_user.username
            )));
        }
        if self.db.get_user_by_email(&new_user.email)?.is_some() {
            return Err(Error::Constraint(format!(
                "email already registered: {}",
                new_user.email
            )));
        }

        let now = Utc::now();
        let user = User {
            id: new_id(),
            username: new_user.username.clone(),
            email: new_user.email.clone(),
            password_hash: auth::hash_password(&new_user.password),
            full_name: new_user.full_name.clone(),
            institution: new_user.institution.clone(),
            title: new_user.title.clone(),
            specialty: new_user.specialty.clone(),
            is_active: true,
            is_verified: false,
            is_superuser: false,
            last_login: None,
            created_at: now,
            updated_at: now,
        };
        self.db.insert_user(&user)?;
        tracing::info!(username = %user.username, "Registered user");
        Ok(user.profile())
    }

    /// Authenticate and open a session.
    ///
    /// The identity may be either the username or the email address.
    /// Unknown identities and wrong passwords both yield
    /// [`Error::InvalidCredentials`]; callers cannot distinguish them.
    /// Too many recent failures lock the account for the configured
    /// window, and inactive accounts are refused even with the right
    /// password.
    pub fn authenticate(
        &self,
        username_or_email: &str,
        password: &str,
        client: &ClientInfo,
    ) -> Result<AuthResponse> {
        let user = match self.db.get_user_by_username(username_or_email)? {
            Some(user) => user,
            None => self
                .db
                .get_user_by_email(username_or_email)?
                .ok_or(Error::InvalidCredentials)?,
        };

        let window_start = Utc::now() - Duration::minutes(self.settings.login_lockout_minutes);
        let recent_failures =
            self.db
                .count_user_actions_since(&user.id, "login_failed", window_start)?;
        if recent_failures >= self.settings.max_login_attempts {
            tracing::warn!(username = %user.username, "Login refused: account locked");
            return Err(Error::AccountLocked);
        }

        if !auth::verify_password(password, &user.password_hash) {
            self.db.insert_system_log(&LogEvent {
                user_id: Some(user.id.clone()),
                ip_address: client.ip_address.clone(),
                user_agent: client.user_agent.clone(),
                error_message: Some("password mismatch".to_string()),
                ..LogEvent::new("login_failed")
            })?;
            return Err(Error::InvalidCredentials);
        }

        if !user.is_active {
            return Err(Error::AccountInactive);
        }

        let now = Utc::now();
        let session = UserSession {
            id: new_id(),
            user_id: user.id.clone(),
            session_token: auth::generate_session_token(),
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
            expires_at: now + Duration::minutes(self.settings.session_timeout_minutes),
            created_at: now,
        };
        self.db.insert_session(&session)?;
        self.db.update_last_login(&user.id, now)?;
        self.db.insert_system_log(&LogEvent {
            user_id: Some(user.id.clone()),
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
            ..LogEvent::new("login")
        })?;
        tracing::info!(username = %user.username, "Login succeeded");

        Ok(AuthResponse {
            token: session.session_token,
            expires_at: session.expires_at,
            user: user.profile(),
        })
    }

    /// Resolve a session token to the user's profile.
    ///
    /// Unknown and expired tokens are treated alike. A session is valid
    /// strictly before its expiry instant.
    pub fn check_session(&self, token: &str) -> Result<UserProfile> {
        let session = self
            .db
            .get_session_by_token(token)?
            .ok_or(Error::SessionExpired)?;
        if !session.is_valid(Utc::now()) {
            return Err(Error::SessionExpired);
        }
        let user = self
            .db
            .get_user(&session.user_id)?
            .ok_or(Error::SessionExpired)?;
        if !user.is_active {
            return Err(Error::AccountInactive);
        }
        Ok(user.profile())
    }

    /// End a session. Unknown tokens are a no-op.
    pub fn logout(&self, token: &str) -> Result<()> {
        let existed = self.db.delete_session(token)?;
        if existed {
            tracing::debug!("Session ended");
        }
        Ok(())
    }

    /// Change a user's password and invalidate all of their sessions.
    pub fn change_password(
        &self,
        user_id: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<()> {
        let user = self
            .db
            .get_user(user_id)?
            .ok_or_else(|| Error::NotFound("user", user_id.to_string()))?;
        if !auth::verify_password(current_password, &user.password_hash) {
            return Err(Error::InvalidCredentials);
        }
        auth::validate_password(new_password, self.settings.password_min_length)?;
        self.db
            .set_password(user_id, &auth::hash_password(new_password))?;
        self.db.delete_sessions_for_user(user_id)?;
        Ok(())
    }

    /// Delete all expired sessions. Returns the number removed.
    pub fn cleanup_expired_sessions(&self) -> Result<usize> {
        let removed = self.db.cleanup_expired_sessions(Utc::now())?;
        if removed > 0 {
            tracing::info!(removed, "Cleaned up expired sessions");
        }
        Ok(removed)
    }

    // ============================================
    // Study lookup
    // ============================================

    /// Search studies. The page size is capped by the configured
    /// `max_search_results`. When a user is given, the search is appended
    /// to their search history with the result count.
    pub fn search_studies(
        &self,
        filter: &StudyFilter,
        page: PageRequest,
        user_id: Option<&str>,
    ) -> Result<Page<StudySummary>> {
        let capped = PageRequest::new(
            page.page,
            page.size.min(self.settings.max_search_results.max(1) as u32),
        );
        let results = self.db.search_studies(filter, capped)?;

        if let Some(user_id) = user_id {
            self.db.record_search(&SearchRecord {
                id: new_id(),
                user_id: Some(user_id.to_string()),
                query: filter.query.clone().unwrap_or_default(),
                filters: filter_to_json(filter),
                result_count: Some(results.total),
                created_at: Utc::now(),
            })?;
        }

        Ok(results)
    }

    /// Load a study with all of its child collections
    pub fn get_study_detail(&self, study_id: &str) -> Result<StudyDetail> {
        self.db
            .get_study_detail(study_id)?
            .ok_or_else(|| Error::NotFound("study", study_id.to_string()))
    }

    /// Look up a study by its registry identifier
    pub fn get_study_by_nct(&self, nct_id: &NctId) -> Result<Study> {
        self.db
            .get_study_by_nct_id(nct_id)?
            .ok_or_else(|| Error::NotFound("study", nct_id.to_string()))
    }

    /// Compute the overview read-model for a study
    pub fn study_overview(&self, study_id: &str) -> Result<StudyOverview> {
        self.db
            .study_overview(study_id)?
            .ok_or_else(|| Error::NotFound("study", study_id.to_string()))
    }

    /// Compute the results summary read-model for a study
    pub fn results_summary(&self, study_id: &str) -> Result<ResultsSummary> {
        self.db
            .results_summary(study_id)?
            .ok_or_else(|| Error::NotFound("study", study_id.to_string()))
    }

    /// Insert a study with its initial conditions
    pub fn create_study(&self, study: &Study, conditions: &[Condition]) -> Result<()> {
        self.db.insert_study(study, conditions)?;
        tracing::info!(nct_id = %study.nct_id, "Created study");
        Ok(())
    }

    /// Delete a study and audit the deletion
    pub fn delete_study(&self, study_id: &str, acting_user: Option<&str>) -> Result<()> {
        self.db.delete_study(study_id)?;
        self.db.insert_system_log(&LogEvent {
            user_id: acting_user.map(str::to_string),
            resource_type: Some("study".to_string()),
            resource_id: Some(study_id.to_string()),
            ..LogEvent::new("study_deleted")
        })?;
        tracing::info!(study_id, "Deleted study");
        Ok(())
    }

    // ============================================
    // User activity
    // ============================================

    /// Toggle a favorite. Returns whether the study is now favorited.
    pub fn toggle_favorite(&self, user_id: &str, study_id: &str) -> Result<bool> {
        if self.db.get_study(study_id)?.is_none() {
            return Err(Error::NotFound("study", study_id.to_string()));
        }
        self.db.toggle_favorite(user_id, study_id)
    }

    /// List a user's favorites, most recently added first
    pub fn list_favorites(&self, user_id: &str, page: PageRequest) -> Result<Page<FavoriteItem>> {
        self.db.list_favorites(user_id, page)
    }

    /// Record that a user viewed a study. Every view appends a row.
    pub fn record_view(&self, user_id: &str, study_id: &str) -> Result<()> {
        if self.db.get_study(study_id)?.is_none() {
            return Err(Error::NotFound("study", study_id.to_string()));
        }
        self.db.record_history(&HistoryEntry {
            id: new_id(),
            user_id: user_id.to_string(),
            study_id: study_id.to_string(),
            viewed_at: Utc::now(),
        })
    }

    /// List a user's view history, most recent first
    pub fn list_history(&self, user_id: &str, page: PageRequest) -> Result<Page<HistoryItem>> {
        self.db.list_history(user_id, page)
    }

    /// List a user's recorded searches, most recent first
    pub fn list_search_history(
        &self,
        user_id: &str,
        page: PageRequest,
    ) -> Result<Page<SearchRecord>> {
        self.db.list_search_history(user_id, page)
    }

    // ============================================
    // Feedback
    // ============================================

    /// Submit feedback, optionally anonymous and optionally attached to a
    /// study. New feedback always starts out pending.
    pub fn submit_feedback(
        &self,
        user_id: Option<&str>,
        study_id: Option<&str>,
        feedback_type: FeedbackType,
        text: &str,
    ) -> Result<Feedback> {
        if text.trim().is_empty() {
            return Err(Error::Validation(
                "feedback text must not be empty".to_string(),
            ));
        }
        if let Some(study_id) = study_id {
            if self.db.get_study(study_id)?.is_none() {
                return Err(Error::NotFound("study", study_id.to_string()));
            }
        }

        let now = Utc::now();
        let feedback = Feedback {
            id: new_id(),
            user_id: user_id.map(str::to_string),
            study_id: study_id.map(str::to_string),
            feedback_type,
            feedback_text: text.to_string(),
            status: FeedbackStatus::Pending,
            assigned_to: None,
            response_text: None,
            resolved_at: None,
            created_at: now,
            updated_at: now,
        };
        self.db.insert_feedback(&feedback)?;
        Ok(feedback)
    }

    /// List feedback, optionally filtered by lifecycle status
    pub fn list_feedback(
        &self,
        status: Option<FeedbackStatus>,
        page: PageRequest,
    ) -> Result<Page<Feedback>> {
        self.db.list_feedback(status, page)
    }

    /// Advance a feedback record through its lifecycle
    pub fn update_feedback(
        &self,
        feedback_id: &str,
        status: FeedbackStatus,
        response_text: Option<&str>,
        assigned_to: Option<&str>,
    ) -> Result<Feedback> {
        self.db
            .update_feedback_status(feedback_id, status, response_text, assigned_to)?;
        self.db
            .get_feedback(feedback_id)?
            .ok_or_else(|| Error::NotFound("feedback", feedback_id.to_string()))
    }

    // ============================================
    // Data sync
    // ============================================

    /// Record a data-sync run. Returns the assigned log ID.
    pub fn record_sync_run(&self, entry: &SyncLogEntry) -> Result<i64> {
        self.db.insert_sync_log(entry)
    }

    /// List recent sync runs, optionally filtered by data source
    pub fn list_sync_runs(
        &self,
        data_source: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SyncLogEntry>> {
        self.db.list_sync_logs(data_source, limit)
    }
}

/// Serialize the filter set for search-history capture.
fn filter_to_json(filter: &StudyFilter) -> serde_json::Value {
    serde_json::json!({
        "phases": filter.phases.iter().map(|p| p.as_str()).collect::<Vec<_>>(),
        "statuses": filter.statuses.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
        "study_types": filter.study_types,
        "start_date_from": filter.start_date_from.map(|d| d.to_string()),
        "start_date_to": filter.start_date_to.map(|d| d.to_string()),
        "condition": filter.condition,
        "intervention": filter.intervention,
        "molecular_target": filter.molecular_target,
        "sponsor": filter.sponsor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_service() -> Service {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        Service::new(db).unwrap()
    }

    fn register_alice(service: &Service) -> UserProfile {
        service
            .register(&NewUser {
                username: "alice".to_string(),
                email: "alice@example.org".to_string(),
                password: "hunter2024".to_string(),
                full_name: None,
                institution: None,
                title: None,
                specialty: None,
            })
            .unwrap()
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let service = test_service();
        register_alice(&service);

        let dup = service.register(&NewUser {
            username: "alice".to_string(),
            email: "other@example.org".to_string(),
            password: "hunter2024".to_string(),
            full_name: None,
            institution: None,
            title: None,
            specialty: None,
        });
        assert!(matches!(dup, Err(Error::Constraint(_))));

        let dup_email = service.register(&NewUser {
            username: "bob".to_string(),
            email: "alice@example.org".to_string(),
            password: "hunter2024".to_string(),
            full_name: None,
            institution: None,
            title: None,
            specialty: None,
        });
        assert!(matches!(dup_email, Err(Error::Constraint(_))));
    }

    #[test]
    fn test_register_enforces_password_policy() {
        let service = test_service();
        let weak = service.register(&NewUser {
            username: "alice".to_string(),
            email: "alice@example.org".to_string(),
            password: "short1".to_string(),
            full_name: None,
            institution: None,
            title: None,
            specialty: None,
        });
        assert!(matches!(weak, Err(Error::Validation(_))));
    }

    #[test]
    fn test_authenticate_round_trip() {
        let service = test_service();
        register_alice(&service);

        let auth = service
            .authenticate("alice", "hunter2024", &ClientInfo::default())
            .unwrap();
        assert_eq!(auth.user.username, "alice");

        let profile = service.check_session(&auth.token).unwrap();
        assert_eq!(profile.username, "alice");

        service.logout(&auth.token).unwrap();
        assert!(matches!(
            service.check_session(&auth.token),
            Err(Error::SessionExpired)
        ));
        // Logging out again is a no-op
        service.logout(&auth.token).unwrap();
    }

    #[test]
    fn test_authenticate_accepts_email_as_identity() {
        let service = test_service();
        register_alice(&service);

        let auth = service
            .authenticate("alice@example.org", "hunter2024", &ClientInfo::default())
            .unwrap();
        assert_eq!(auth.user.username, "alice");

        // Wrong password via email is still refused
        let wrong = service.authenticate("alice@example.org", "wrongpass1", &ClientInfo::default());
        assert!(matches!(wrong, Err(Error::InvalidCredentials)));
    }

    #[test]
    fn test_authenticate_wrong_password_indistinguishable() {
        let service = test_service();
        register_alice(&service);

        let wrong = service.authenticate("alice", "wrongpass1", &ClientInfo::default());
        let unknown = service.authenticate("nobody", "whatever12", &ClientInfo::default());
        assert!(matches!(wrong, Err(Error::InvalidCredentials)));
        assert!(matches!(unknown, Err(Error::InvalidCredentials)));
    }

    #[test]
    fn test_account_locks_after_repeated_failures() {
        let service = test_service();
        register_alice(&service);

        let max = service.settings().max_login_attempts;
        for _ in 0..max {
            let err = service
                .authenticate("alice", "wrongpass1", &ClientInfo::default())
                .unwrap_err();
            assert!(matches!(err, Error::InvalidCredentials));
        }

        // Even the right password is refused now
        let locked = service.authenticate("alice", "hunter2024", &ClientInfo::default());
        assert!(matches!(locked, Err(Error::AccountLocked)));
    }

    #[test]
    fn test_inactive_account_refused() {
        let service = test_service();
        let profile = register_alice(&service);

        let mut user = service.db().get_user(&profile.id).unwrap().unwrap();
        user.is_active = false;
        service.db().update_user(&user).unwrap();

        let refused = service.authenticate("alice", "hunter2024", &ClientInfo::default());
        assert!(matches!(refused, Err(Error::AccountInactive)));
    }

    #[test]
    fn test_change_password_invalidates_sessions() {
        let service = test_service();
        let profile = register_alice(&service);
        let auth = service
            .authenticate("alice", "hunter2024", &ClientInfo::default())
            .unwrap();

        service
            .change_password(&profile.id, "hunter2024", "newsecret9")
            .unwrap();
        assert!(matches!(
            service.check_session(&auth.token),
            Err(Error::SessionExpired)
        ));

        service
            .authenticate("alice", "newsecret9", &ClientInfo::default())
            .unwrap();
    }

    #[test]
    fn test_search_caps_page_size() {
        let mut service = test_service();
        service.db().set_config("max_search_results", "3").unwrap();
        service.reload_settings().unwrap();

        for i in 0..5 {
            let study = Study::new(
                NctId::new(&format!("NCT0000000{}", i)).unwrap(),
                "A study",
            );
            let condition = Condition::new(&study.id, "Melanoma");
            service.create_study(&study, &[condition]).unwrap();
        }

        let page = service
            .search_studies(&StudyFilter::default(), PageRequest::new(1, 50), None)
            .unwrap();
        assert_eq!(page.items.len(), 3);
        assert_eq!(page.total, 5);
    }

    #[test]
    fn test_search_records_history_for_user() {
        let service = test_service();
        let profile = register_alice(&service);

        let filter = StudyFilter {
            query: Some("melanoma".to_string()),
            ..Default::default()
        };
        service
            .search_studies(&filter, PageRequest::default(), Some(&profile.id))
            .unwrap();
        service
            .search_studies(&filter, PageRequest::default(), None)
            .unwrap();

        let history = service
            .list_search_history(&profile.id, PageRequest::default())
            .unwrap();
        assert_eq!(history.total, 1);
        assert_eq!(history.items[0].query, "melanoma");
        assert_eq!(history.items[0].result_count, Some(0));
    }

    #[test]
    fn test_submit_feedback_validations() {
        let service = test_service();

        let empty = service.submit_feedback(None, None, FeedbackType::Question, "   ");
        assert!(matches!(empty, Err(Error::Validation(_))));

        let missing_study =
            service.submit_feedback(None, Some("nope"), FeedbackType::Question, "Where?");
        assert!(matches!(missing_study, Err(Error::NotFound(_, _))));

        let ok = service
            .submit_feedback(None, None, FeedbackType::Question, "How fresh is the data?")
            .unwrap();
        assert_eq!(ok.status, FeedbackStatus::Pending);
    }
}
