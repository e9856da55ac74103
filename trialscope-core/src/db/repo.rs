//! Database repository layer
//!
//! Provides query and insert operations for all entity types.

use crate::error::{Error, Result};
use crate::types::*;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::PathBuf;
use std::sync::Mutex;

/// An audit-log event to append. Everything except `action` is optional.
#[derive(Debug, Clone, Default)]
pub struct LogEvent {
    /// Acting user, if known
    pub user_id: Option<String>,
    /// Action name (e.g. "login_failed", "study_deleted")
    pub action: String,
    /// Kind of resource acted on
    pub resource_type: Option<String>,
    /// Id of the resource acted on
    pub resource_id: Option<String>,
    /// Client IP address
    pub ip_address: Option<String>,
    /// Client user agent
    pub user_agent: Option<String>,
    /// Structured request payload
    pub request_data: Option<serde_json::Value>,
    /// Structured response payload
    pub response_data: Option<serde_json::Value>,
    /// Error detail, for failed actions
    pub error_message: Option<String>,
    /// Handler duration in milliseconds
    pub duration_ms: Option<i64>,
}

impl LogEvent {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            ..Default::default()
        }
    }
}

/// A bookmarked study for list views.
#[derive(Debug, Clone)]
pub struct FavoriteItem {
    /// The bookmark record
    pub favorite: Favorite,
    /// The bookmarked study
    pub study: StudySummary,
}

/// A viewed study for history list views.
#[derive(Debug, Clone)]
pub struct HistoryItem {
    /// The view record
    pub entry: HistoryEntry,
    /// The viewed study
    pub study: StudySummary,
}

/// Database handle with connection pooling (single connection for now)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // Enable foreign keys and WAL mode for better concurrency
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;  -- 64MB cache
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    // ============================================
    // User operations
    // ============================================

    /// Insert a new user
    pub fn insert_user(&self, user: &User) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO users (id, username, email, password_hash, full_name, institution,
                               title, specialty, is_active, is_verified, is_superuser,
                               last_login, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
            params![
                user.id,
                user.username,
                user.email,
                user.password_hash,
                user.full_name,
                user.institution,
                user.title,
                user.specialty,
                user.is_active,
                user.is_verified,
                user.is_superuser,
                user.last_login.map(|t| t.to_rfc3339()),
                user.created_at.to_rfc3339(),
                user.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Get a user by ID
    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM users WHERE id = ?", [id], Self::row_to_user)
            .optional()
            .map_err(Error::from)
    }

    /// Get a user by login name
    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM users WHERE username = ?",
            [username],
            Self::row_to_user,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Get a user by email address
    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM users WHERE email = ?",
            [email],
            Self::row_to_user,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Update mutable profile fields of a user
    pub fn update_user(&self, user: &User) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            r#"
            UPDATE users SET
                email = ?2, full_name = ?3, institution = ?4, title = ?5,
                specialty = ?6, is_active = ?7, is_verified = ?8, updated_at = ?9
            WHERE id = ?1
            "#,
            params![
                user.id,
                user.email,
                user.full_name,
                user.institution,
                user.title,
                user.specialty,
                user.is_active,
                user.is_verified,
                Utc::now().to_rfc3339(),
            ],
        )?;
        if n == 0 {
            return Err(Error::NotFound("user", user.id.clone()));
        }
        Ok(())
    }

    /// Record a successful login
    pub fn update_last_login(&self, user_id: &str, when: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE users SET last_login = ?2 WHERE id = ?1",
            params![user_id, when.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Replace a user's password hash
    pub fn set_password(&self, user_id: &str, password_hash: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE users SET password_hash = ?2, updated_at = ?3 WHERE id = ?1",
            params![user_id, password_hash, Utc::now().to_rfc3339()],
        )?;
        if n == 0 {
            return Err(Error::NotFound("user", user_id.to_string()));
        }
        Ok(())
    }

    fn row_to_user(row: &Row) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get("id")?,
            username: row.get("username")?,
            email: row.get("email")?,
            password_hash: row.get("password_hash")?,
            full_name: row.get("full_name")?,
            institution: row.get("institution")?,
            title: row.get("title")?,
            specialty: row.get("specialty")?,
            is_active: row.get("is_active")?,
            is_verified: row.get("is_verified")?,
            is_superuser: row.get("is_superuser")?,
            last_login: parse_ts_opt(row.get("last_login")?),
            created_at: parse_ts(&row.get::<_, String>("created_at")?),
            updated_at: parse_ts(&row.get::<_, String>("updated_at")?),
        })
    }

    // ============================================
    // Role operations
    // ============================================

    /// Insert a role
    pub fn insert_role(&self, role: &Role) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO roles (id, name, description, permissions, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                role.id,
                role.name,
                role.description,
                role.permissions.to_string(),
                role.created_at.to_rfc3339(),
                role.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Get a role by name
    pub fn get_role_by_name(&self, name: &str) -> Result<Option<Role>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM roles WHERE name = ?",
            [name],
            Self::row_to_role,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Assign a role to a user. Re-assigning is a no-op.
    pub fn assign_role(&self, assignment: &RoleAssignment) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT OR IGNORE INTO user_roles (user_id, role_id, assigned_at, assigned_by)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                assignment.user_id,
                assignment.role_id,
                assignment.assigned_at.to_rfc3339(),
                assignment.assigned_by,
            ],
        )?;
        Ok(())
    }

    /// List the roles assigned to a user
    pub fn list_roles_for_user(&self, user_id: &str) -> Result<Vec<Role>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT r.* FROM roles r
            JOIN user_roles ur ON ur.role_id = r.id
            WHERE ur.user_id = ?
            ORDER BY r.name
            "#,
        )?;
        let rows = stmt.query_map([user_id], Self::row_to_role)?;
        let mut roles = Vec::new();
        for row in rows {
            roles.push(row?);
        }
        Ok(roles)
    }

    fn row_to_role(row: &Row) -> rusqlite::Result<Role> {
        let permissions_str: String = row.get("permissions")?;
        Ok(Role {
            id: row.get("id")?,
            name: row.get("name")?,
            description: row.get("description")?,
            permissions: serde_json::from_str(&permissions_str).unwrap_or(serde_json::json!({})),
            created_at: parse_ts(&row.get::<_, String>("created_at")?),
            updated_at: parse_ts(&row.get::<_, String>("updated_at")?),
        })
    }

    // ============================================
    // Session operations
    // ============================================

    /// Insert a session
    pub fn insert_session(&self, session: &UserSession) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO user_sessions (id, user_id, session_token, ip_address, user_agent,
                                       expires_at, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                session.id,
                session.user_id,
                session.session_token,
                session.ip_address,
                session.user_agent,
                session.expires_at.to_rfc3339(),
                session.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Look up a session by its token
    pub fn get_session_by_token(&self, token: &str) -> Result<Option<UserSession>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM user_sessions WHERE session_token = ?",
            [token],
            Self::row_to_session,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Delete a session by token. Returns whether a session existed.
    pub fn delete_session(&self, token: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "DELETE FROM user_sessions WHERE session_token = ?",
            [token],
        )?;
        Ok(n > 0)
    }

    /// Delete all sessions for a user (e.g. after a password change)
    pub fn delete_sessions_for_user(&self, user_id: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("DELETE FROM user_sessions WHERE user_id = ?", [user_id])?;
        Ok(n)
    }

    /// Delete all sessions whose expiry is at or before `now`.
    /// Returns the number of sessions removed.
    pub fn cleanup_expired_sessions(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "DELETE FROM user_sessions WHERE expires_at <= ?",
            [now.to_rfc3339()],
        )?;
        Ok(n)
    }

    fn row_to_session(row: &Row) -> rusqlite::Result<UserSession> {
        Ok(UserSession {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            session_token: row.get("session_token")?,
            ip_address: row.get("ip_address")?,
            user_agent: row.get("user_agent")?,
            expires_at: parse_ts(&row.get::<_, String>("expires_at")?),
            created_at: parse_ts(&row.get::<_, String>("created_at")?),
        })
    }

    // ============================================
    // Study operations
    // ============================================

    /// Insert a study together with its initial conditions, atomically.
    ///
    /// Every study must address at least one condition; an empty slice is
    /// rejected and nothing is written.
    pub fn insert_study(&self, study: &Study, conditions: &[Condition]) -> Result<()> {
        if conditions.is_empty() {
            return Err(Error::Constraint(
                "a study must have at least one condition".to_string(),
            ));
        }
        for condition in conditions {
            if condition.study_id != study.id {
                return Err(Error::Validation(format!(
                    "condition {} does not belong to study {}",
                    condition.id, study.id
                )));
            }
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        Self::insert_study_row(&tx, study)?;
        for condition in conditions {
            Self::insert_condition_row(&tx, condition)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn insert_study_row(conn: &Connection, study: &Study) -> Result<()> {
        conn.execute(
            r#"
            INSERT INTO studies (id, nct_id, official_title, brief_title, acronym, study_type,
                                 phase, status, status_verified_date, start_date, completion_date,
                                 primary_completion_date, brief_summary, detailed_description,
                                 study_design, allocation, intervention_model, primary_purpose,
                                 masking, primary_endpoint, secondary_endpoint, enrollment,
                                 enrollment_type, sponsor_name, sponsor_class, collaborator,
                                 principal_investigator, data_source, data_source_id, is_active,
                                 created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                    ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30,
                    ?31, ?32)
            "#,
            params![
                study.id,
                study.nct_id.as_str(),
                study.official_title,
                study.brief_title,
                study.acronym,
                study.study_type,
                study.phase.map(|p| p.as_str()),
                study.status.as_ref().map(|s| s.as_str().to_string()),
                study.status_verified_date.map(|d| d.to_string()),
                study.start_date.map(|d| d.to_string()),
                study.completion_date.map(|d| d.to_string()),
                study.primary_completion_date.map(|d| d.to_string()),
                study.brief_summary,
                study.detailed_description,
                study.study_design,
                study.allocation,
                study.intervention_model,
                study.primary_purpose,
                study.masking,
                study.primary_endpoint,
                study.secondary_endpoint,
                study.enrollment,
                study.enrollment_type,
                study.sponsor_name,
                study.sponsor_class,
                study.collaborator,
                study.principal_investigator,
                study.data_source,
                study.data_source_id,
                study.is_active,
                study.created_at.to_rfc3339(),
                study.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Update a study record. Bumps `updated_at`.
    pub fn update_study(&self, study: &Study) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            r#"
            UPDATE studies SET
                official_title = ?2, brief_title = ?3, acronym = ?4, study_type = ?5,
                phase = ?6, status = ?7, status_verified_date = ?8, start_date = ?9,
                completion_date = ?10, primary_completion_date = ?11, brief_summary = ?12,
                detailed_description = ?13, study_design = ?14, allocation = ?15,
                intervention_model = ?16, primary_purpose = ?17, masking = ?18,
                primary_endpoint = ?19, secondary_endpoint = ?20, enrollment = ?21,
                enrollment_type = ?22, sponsor_name = ?23, sponsor_class = ?24,
                collaborator = ?25, principal_investigator = ?26, data_source = ?27,
                data_source_id = ?28, is_active = ?29, updated_at = ?30
            WHERE id = ?1
            "#,
            params![
                study.id,
                study.official_title,
                study.brief_title,
                study.acronym,
                study.study_type,
                study.phase.map(|p| p.as_str()),
                study.status.as_ref().map(|s| s.as_str().to_string()),
                study.status_verified_date.map(|d| d.to_string()),
                study.start_date.map(|d| d.to_string()),
                study.completion_date.map(|d| d.to_string()),
                study.primary_completion_date.map(|d| d.to_string()),
                study.brief_summary,
                study.detailed_description,
                study.study_design,
                study.allocation,
                study.intervention_model,
                study.primary_purpose,
                study.masking,
                study.primary_endpoint,
                study.secondary_endpoint,
                study.enrollment,
                study.enrollment_type,
                study.sponsor_name,
                study.sponsor_class,
                study.collaborator,
                study.principal_investigator,
                study.data_source,
                study.data_source_id,
                study.is_active,
                Utc::now().to_rfc3339(),
            ],
        )?;
        if n == 0 {
            return Err(Error::NotFound("study", study.id.clone()));
        }
        Ok(())
    }

    /// Get a study by ID
    pub fn get_study(&self, id: &str) -> Result<Option<Study>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM studies WHERE id = ?",
            [id],
            Self::row_to_study,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Get a study by its registry identifier
    pub fn get_study_by_nct_id(&self, nct_id: &NctId) -> Result<Option<Study>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM studies WHERE nct_id = ?",
            [nct_id.as_str()],
            Self::row_to_study,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Delete a study. Owned child rows cascade; feedback rows referencing
    /// the study survive with `study_id` nulled.
    pub fn delete_study(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("DELETE FROM studies WHERE id = ?", [id])?;
        if n == 0 {
            return Err(Error::NotFound("study", id.to_string()));
        }
        Ok(())
    }

    /// Load a study with all of its child collections
    pub fn get_study_detail(&self, id: &str) -> Result<Option<StudyDetail>> {
        let study = match self.get_study(id)? {
            Some(study) => study,
            None => return Ok(None),
        };

        Ok(Some(StudyDetail {
            interventions: self.list_interventions(id)?,
            conditions: self.list_conditions(id)?,
            molecular_targets: self.list_molecular_targets(id)?,
            outcomes: self.list_outcomes(id)?,
            results: self.list_results(id)?,
            subgroup_analyses: self.list_subgroup_analyses(id)?,
            safety_data: self.list_safety_data(id)?,
            publications: self.list_publications(id)?,
            study,
        }))
    }

    fn row_to_study(row: &Row) -> rusqlite::Result<Study> {
        Ok(Study {
            id: row.get("id")?,
            nct_id: NctId::trusted(row.get("nct_id")?),
            official_title: row.get("official_title")?,
            brief_title: row.get("brief_title")?,
            acronym: row.get("acronym")?,
            study_type: row.get("study_type")?,
            phase: row
                .get::<_, Option<String>>("phase")?
                .and_then(|s| s.parse().ok()),
            status: row
                .get::<_, Option<String>>("status")?
                .and_then(|s| s.parse().ok()),
            status_verified_date: parse_date_opt(row.get("status_verified_date")?),
            start_date: parse_date_opt(row.get("start_date")?),
            completion_date: parse_date_opt(row.get("completion_date")?),
            primary_completion_date: parse_date_opt(row.get("primary_completion_date")?),
            brief_summary: row.get("brief_summary")?,
            detailed_description: row.get("detailed_description")?,
            study_design: row.get("study_design")?,
            allocation: row.get("allocation")?,
            intervention_model: row.get("intervention_model")?,
            primary_purpose: row.get("primary_purpose")?,
            masking: row.get("masking")?,
            primary_endpoint: row.get("primary_endpoint")?,
            secondary_endpoint: row.get("secondary_endpoint")?,
            enrollment: row.get("enrollment")?,
            enrollment_type: row.get("enrollment_type")?,
            sponsor_name: row.get("sponsor_name")?,
            sponsor_class: row.get("sponsor_class")?,
            collaborator: row.get("collaborator")?,
            principal_investigator: row.get("principal_investigator")?,
            data_source: row.get("data_source")?,
            data_source_id: row.get("data_source_id")?,
            is_active: row.get("is_active")?,
            created_at: parse_ts(&row.get::<_, String>("created_at")?),
            updated_at: parse_ts(&row.get::<_, String>("updated_at")?),
        })
    }

    fn row_to_study_summary(row: &Row) -> rusqlite::Result<StudySummary> {
        Ok(StudySummary {
            id: row.get("id")?,
            nct_id: NctId::trusted(row.get("nct_id")?),
            official_title: row.get("official_title")?,
            brief_title: row.get("brief_title")?,
            acronym: row.get("acronym")?,
            phase: row
                .get::<_, Option<String>>("phase")?
                .and_then(|s| s.parse().ok()),
            status: row
                .get::<_, Option<String>>("status")?
                .and_then(|s| s.parse().ok()),
            start_date: parse_date_opt(row.get("start_date")?),
            completion_date: parse_date_opt(row.get("completion_date")?),
            enrollment: row.get("enrollment")?,
            sponsor_name: row.get("sponsor_name")?,
            updated_at: parse_ts(&row.get::<_, String>("updated_at")?),
        })
    }

    // ============================================
    // Study search
    // ============================================

    /// Search studies with filtering and pagination.
    ///
    /// Results are ordered by `updated_at` descending with `id` as the tie
    /// break, so repeated identical searches return a stable order. The
    /// returned page carries the unpaginated match count.
    pub fn search_studies(
        &self,
        filter: &StudyFilter,
        page: PageRequest,
    ) -> Result<Page<StudySummary>> {
        let (where_clause, mut params) = Self::study_filter_clause(filter);

        let conn = self.conn.lock().unwrap();

        let count_sql = format!("SELECT COUNT(*) FROM studies {}", where_clause);
        let count_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let total: i64 = conn.query_row(&count_sql, count_refs.as_slice(), |r| r.get(0))?;

        let select_sql = format!(
            r#"
            SELECT id, nct_id, official_title, brief_title, acronym, phase, status,
                   start_date, completion_date, enrollment, sponsor_name, updated_at
            FROM studies {}
            ORDER BY updated_at DESC, id
            LIMIT ? OFFSET ?
            "#,
            where_clause
        );
        params.push(Box::new(page.limit()));
        params.push(Box::new(page.offset()));
        let select_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&select_sql)?;
        let rows = stmt.query_map(select_refs.as_slice(), Self::row_to_study_summary)?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }

        Ok(Page::new(items, total, page))
    }

    fn study_filter_clause(filter: &StudyFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut sql = String::from("WHERE is_active = 1");
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];

        if let Some(query) = &filter.query {
            // Every whitespace-separated term must match one of the text fields
            for term in query.split_whitespace() {
                let pattern = format!("%{}%", term);
                sql.push_str(
                    " AND (official_title LIKE ? OR brief_title LIKE ? OR acronym LIKE ? \
                     OR brief_summary LIKE ? OR nct_id LIKE ?)",
                );
                for _ in 0..5 {
                    params.push(Box::new(pattern.clone()));
                }
            }
        }

        if !filter.phases.is_empty() {
            let placeholders = vec!["?"; filter.phases.len()].join(", ");
            sql.push_str(&format!(" AND phase IN ({})", placeholders));
            for phase in &filter.phases {
                params.push(Box::new(phase.as_str().to_string()));
            }
        }

        if !filter.statuses.is_empty() {
            let placeholders = vec!["?"; filter.statuses.len()].join(", ");
            sql.push_str(&format!(" AND status IN ({})", placeholders));
            for status in &filter.statuses {
                params.push(Box::new(status.as_str().to_string()));
            }
        }

        if !filter.study_types.is_empty() {
            let placeholders = vec!["?"; filter.study_types.len()].join(", ");
            sql.push_str(&format!(" AND study_type IN ({})", placeholders));
            for study_type in &filter.study_types {
                params.push(Box::new(study_type.clone()));
            }
        }

        if let Some(from) = &filter.start_date_from {
            sql.push_str(" AND start_date >= ?");
            params.push(Box::new(from.to_string()));
        }

        if let Some(to) = &filter.start_date_to {
            sql.push_str(" AND start_date <= ?");
            params.push(Box::new(to.to_string()));
        }

        if let Some(condition) = &filter.condition {
            sql.push_str(
                " AND EXISTS (SELECT 1 FROM conditions c \
                 WHERE c.study_id = studies.id AND c.name LIKE ?)",
            );
            params.push(Box::new(format!("%{}%", condition)));
        }

        if let Some(intervention) = &filter.intervention {
            sql.push_str(
                " AND EXISTS (SELECT 1 FROM interventions i \
                 WHERE i.study_id = studies.id AND i.name LIKE ?)",
            );
            params.push(Box::new(format!("%{}%", intervention)));
        }

        if let Some(target) = &filter.molecular_target {
            sql.push_str(
                " AND EXISTS (SELECT 1 FROM molecular_targets m \
                 WHERE m.study_id = studies.id AND m.name LIKE ?)",
            );
            params.push(Box::new(format!("%{}%", target)));
        }

        if let Some(sponsor) = &filter.sponsor {
            sql.push_str(" AND sponsor_name LIKE ?");
            params.push(Box::new(format!("%{}%", sponsor)));
        }

        (sql, params)
    }

    // ============================================
    // Intervention operations
    // ============================================

    /// Insert an intervention
    pub fn insert_intervention(&self, intervention: &Intervention) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO interventions (id, study_id, name, intervention_type, description,
                                       other_name, drug_name_generic, drug_name_brand,
                                       drug_class, mechanism_of_action, dosage_form,
                                       dosage_route, dosage_frequency, dosage_strength,
                                       created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
            params![
                intervention.id,
                intervention.study_id,
                intervention.name,
                intervention.intervention_type,
                intervention.description,
                intervention.other_name,
                intervention.drug_name_generic,
                intervention.drug_name_brand,
                intervention.drug_class,
                intervention.mechanism_of_action,
                intervention.dosage_form,
                intervention.dosage_route,
                intervention.dosage_frequency,
                intervention.dosage_strength,
                intervention.created_at.to_rfc3339(),
                intervention.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// List interventions for a study
    pub fn list_interventions(&self, study_id: &str) -> Result<Vec<Intervention>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT * FROM interventions WHERE study_id = ? ORDER BY name, id")?;
        let rows = stmt.query_map([study_id], Self::row_to_intervention)?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    fn row_to_intervention(row: &Row) -> rusqlite::Result<Intervention> {
        Ok(Intervention {
            id: row.get("id")?,
            study_id: row.get("study_id")?,
            name: row.get("name")?,
            intervention_type: row.get("intervention_type")?,
            description: row.get("description")?,
            other_name: row.get("other_name")?,
            drug_name_generic: row.get("drug_name_generic")?,
            drug_name_brand: row.get("drug_name_brand")?,
            drug_class: row.get("drug_class")?,
            mechanism_of_action: row.get("mechanism_of_action")?,
            dosage_form: row.get("dosage_form")?,
            dosage_route: row.get("dosage_route")?,
            dosage_frequency: row.get("dosage_frequency")?,
            dosage_strength: row.get("dosage_strength")?,
            created_at: parse_ts(&row.get::<_, String>("created_at")?),
            updated_at: parse_ts(&row.get::<_, String>("updated_at")?),
        })
    }

    // ============================================
    // Condition operations
    // ============================================

    /// Insert a condition for an existing study
    pub fn insert_condition(&self, condition: &Condition) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        Self::insert_condition_row(&conn, condition)
    }

    fn insert_condition_row(conn: &Connection, condition: &Condition) -> Result<()> {
        conn.execute(
            r#"
            INSERT INTO conditions (id, study_id, name, mesh_term, icd10_code,
                                    category_level1, category_level2, category_level3,
                                    stage, stage_description, biomarker, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                condition.id,
                condition.study_id,
                condition.name,
                condition.mesh_term,
                condition.icd10_code,
                condition.category_level1,
                condition.category_level2,
                condition.category_level3,
                condition.stage,
                condition.stage_description,
                condition.biomarker,
                condition.created_at.to_rfc3339(),
                condition.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// List conditions for a study
    pub fn list_conditions(&self, study_id: &str) -> Result<Vec<Condition>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM conditions WHERE study_id = ? ORDER BY name, id")?;
        let rows = stmt.query_map([study_id], Self::row_to_condition)?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    fn row_to_condition(row: &Row) -> rusqlite::Result<Condition> {
        Ok(Condition {
            id: row.get("id")?,
            study_id: row.get("study_id")?,
            name: row.get("name")?,
            mesh_term: row.get("mesh_term")?,
            icd10_code: row.get("icd10_code")?,
            category_level1: row.get("category_level1")?,
            category_level2: row.get("category_level2")?,
            category_level3: row.get("category_level3")?,
            stage: row.get("stage")?,
            stage_description: row.get("stage_description")?,
            biomarker: row.get("biomarker")?,
            created_at: parse_ts(&row.get::<_, String>("created_at")?),
            updated_at: parse_ts(&row.get::<_, String>("updated_at")?),
        })
    }

    // ============================================
    // Molecular target operations
    // ============================================

    /// Insert a molecular target
    pub fn insert_molecular_target(&self, target: &MolecularTarget) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO molecular_targets (id, study_id, name, full_name, description,
                                           detection_method, detection_criteria,
                                           positive_criteria, negative_criteria,
                                           created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                target.id,
                target.study_id,
                target.name,
                target.full_name,
                target.description,
                target.detection_method,
                target.detection_criteria,
                target.positive_criteria,
                target.negative_criteria,
                target.created_at.to_rfc3339(),
                target.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// List molecular targets for a study
    pub fn list_molecular_targets(&self, study_id: &str) -> Result<Vec<MolecularTarget>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM molecular_targets WHERE study_id = ? ORDER BY name, id")?;
        let rows = stmt.query_map([study_id], Self::row_to_molecular_target)?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    fn row_to_molecular_target(row: &Row) -> rusqlite::Result<MolecularTarget> {
        Ok(MolecularTarget {
            id: row.get("id")?,
            study_id: row.get("study_id")?,
            name: row.get("name")?,
            full_name: row.get("full_name")?,
            description: row.get("description")?,
            detection_method: row.get("detection_method")?,
            detection_criteria: row.get("detection_criteria")?,
            positive_criteria: row.get("positive_criteria")?,
            negative_criteria: row.get("negative_criteria")?,
            created_at: parse_ts(&row.get::<_, String>("created_at")?),
            updated_at: parse_ts(&row.get::<_, String>("updated_at")?),
        })
    }

    // ============================================
    // Outcome operations
    // ============================================

    /// Insert an outcome
    pub fn insert_outcome(&self, outcome: &Outcome) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO outcomes (id, study_id, title, description, outcome_type,
                                  time_frame, measure, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                outcome.id,
                outcome.study_id,
                outcome.title,
                outcome.description,
                outcome.outcome_type,
                outcome.time_frame,
                outcome.measure,
                outcome.created_at.to_rfc3339(),
                outcome.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Delete an outcome. Results that referenced it survive with
    /// `outcome_id` nulled.
    pub fn delete_outcome(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("DELETE FROM outcomes WHERE id = ?", [id])?;
        if n == 0 {
            return Err(Error::NotFound("outcome", id.to_string()));
        }
        Ok(())
    }

    /// List outcomes for a study
    pub fn list_outcomes(&self, study_id: &str) -> Result<Vec<Outcome>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM outcomes WHERE study_id = ? ORDER BY title, id")?;
        let rows = stmt.query_map([study_id], Self::row_to_outcome)?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    fn row_to_outcome(row: &Row) -> rusqlite::Result<Outcome> {
        Ok(Outcome {
            id: row.get("id")?,
            study_id: row.get("study_id")?,
            title: row.get("title")?,
            description: row.get("description")?,
            outcome_type: row.get("outcome_type")?,
            time_frame: row.get("time_frame")?,
            measure: row.get("measure")?,
            created_at: parse_ts(&row.get::<_, String>("created_at")?),
            updated_at: parse_ts(&row.get::<_, String>("updated_at")?),
        })
    }

    // ============================================
    // Result operations
    // ============================================

    /// Insert a result
    pub fn insert_result(&self, result: &StudyResult) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO results (id, study_id, outcome_id, title, description, group_name,
                                 group_description, sample_size, value, unit, mean_value,
                                 median_value, std_deviation, min_value, max_value, ci_lower,
                                 ci_upper, confidence_level, p_value, hazard_ratio, odds_ratio,
                                 result_type, data_source, publication_date, created_at,
                                 updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                    ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26)
            "#,
            params![
                result.id,
                result.study_id,
                result.outcome_id,
                result.title,
                result.description,
                result.group_name,
                result.group_description,
                result.sample_size,
                result.value,
                result.unit,
                result.mean_value,
                result.median_value,
                result.std_deviation,
                result.min_value,
                result.max_value,
                result.ci_lower,
                result.ci_upper,
                result.confidence_level,
                result.p_value,
                result.hazard_ratio,
                result.odds_ratio,
                result.result_type.as_ref().map(|t| t.as_str().to_string()),
                result.data_source,
                result.publication_date.map(|d| d.to_string()),
                result.created_at.to_rfc3339(),
                result.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// List results for a study
    pub fn list_results(&self, study_id: &str) -> Result<Vec<StudyResult>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM results WHERE study_id = ? ORDER BY publication_date, rowid",
        )?;
        let rows = stmt.query_map([study_id], Self::row_to_result)?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    pub(super) fn row_to_result(row: &Row) -> rusqlite::Result<StudyResult> {
        Ok(StudyResult {
            id: row.get("id")?,
            study_id: row.get("study_id")?,
            outcome_id: row.get("outcome_id")?,
            title: row.get("title")?,
            description: row.get("description")?,
            group_name: row.get("group_name")?,
            group_description: row.get("group_description")?,
            sample_size: row.get("sample_size")?,
            value: row.get("value")?,
            unit: row.get("unit")?,
            mean_value: row.get("mean_value")?,
            median_value: row.get("median_value")?,
            std_deviation: row.get("std_deviation")?,
            min_value: row.get("min_value")?,
            max_value: row.get("max_value")?,
            ci_lower: row.get("ci_lower")?,
            ci_upper: row.get("ci_upper")?,
            confidence_level: row.get("confidence_level")?,
            p_value: row.get("p_value")?,
            hazard_ratio: row.get("hazard_ratio")?,
            odds_ratio: row.get("odds_ratio")?,
            result_type: row
                .get::<_, Option<String>>("result_type")?
                .and_then(|s| s.parse().ok()),
            data_source: row.get("data_source")?,
            publication_date: parse_date_opt(row.get("publication_date")?),
            created_at: parse_ts(&row.get::<_, String>("created_at")?),
            updated_at: parse_ts(&row.get::<_, String>("updated_at")?),
        })
    }

    // ============================================
    // Subgroup analysis operations
    // ============================================

    /// Insert a subgroup analysis
    pub fn insert_subgroup_analysis(&self, analysis: &SubgroupAnalysis) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO subgroup_analyses (id, study_id, result_id, subgroup_name,
                                           subgroup_criteria, sample_size, event_count,
                                           hazard_ratio, ci_lower, ci_upper, p_value,
                                           created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                analysis.id,
                analysis.study_id,
                analysis.result_id,
                analysis.subgroup_name,
                analysis.subgroup_criteria,
                analysis.sample_size,
                analysis.event_count,
                analysis.hazard_ratio,
                analysis.ci_lower,
                analysis.ci_upper,
                analysis.p_value,
                analysis.created_at.to_rfc3339(),
                analysis.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// List subgroup analyses for a study
    pub fn list_subgroup_analyses(&self, study_id: &str) -> Result<Vec<SubgroupAnalysis>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM subgroup_analyses WHERE study_id = ? ORDER BY rowid")?;
        let rows = stmt.query_map([study_id], Self::row_to_subgroup_analysis)?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    fn row_to_subgroup_analysis(row: &Row) -> rusqlite::Result<SubgroupAnalysis> {
        Ok(SubgroupAnalysis {
            id: row.get("id")?,
            study_id: row.get("study_id")?,
            result_id: row.get("result_id")?,
            subgroup_name: row.get("subgroup_name")?,
            subgroup_criteria: row.get("subgroup_criteria")?,
            sample_size: row.get("sample_size")?,
            event_count: row.get("event_count")?,
            hazard_ratio: row.get("hazard_ratio")?,
            ci_lower: row.get("ci_lower")?,
            ci_upper: row.get("ci_upper")?,
            p_value: row.get("p_value")?,
            created_at: parse_ts(&row.get::<_, String>("created_at")?),
            updated_at: parse_ts(&row.get::<_, String>("updated_at")?),
        })
    }

    // ============================================
    // Safety data operations
    // ============================================

    /// Insert a safety data row
    pub fn insert_safety_data(&self, safety: &SafetyData) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO safety_data (id, study_id, event_name, event_type, event_category,
                                     experimental_group_n, experimental_group_events,
                                     control_group_n, control_group_events, severity_grade1,
                                     severity_grade2, severity_grade3, severity_grade4,
                                     severity_grade5, management, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            "#,
            params![
                safety.id,
                safety.study_id,
                safety.event_name,
                safety.event_type,
                safety.event_category,
                safety.experimental_group_n,
                safety.experimental_group_events,
                safety.control_group_n,
                safety.control_group_events,
                safety.severity_grade1,
                safety.severity_grade2,
                safety.severity_grade3,
                safety.severity_grade4,
                safety.severity_grade5,
                safety.management,
                safety.created_at.to_rfc3339(),
                safety.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// List safety data for a study
    pub fn list_safety_data(&self, study_id: &str) -> Result<Vec<SafetyData>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM safety_data WHERE study_id = ? ORDER BY rowid")?;
        let rows = stmt.query_map([study_id], Self::row_to_safety_data)?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    fn row_to_safety_data(row: &Row) -> rusqlite::Result<SafetyData> {
        Ok(SafetyData {
            id: row.get("id")?,
            study_id: row.get("study_id")?,
            event_name: row.get("event_name")?,
            event_type: row.get("event_type")?,
            event_category: row.get("event_category")?,
            experimental_group_n: row.get("experimental_group_n")?,
            experimental_group_events: row.get("experimental_group_events")?,
            control_group_n: row.get("control_group_n")?,
            control_group_events: row.get("control_group_events")?,
            severity_grade1: row.get("severity_grade1")?,
            severity_grade2: row.get("severity_grade2")?,
            severity_grade3: row.get("severity_grade3")?,
            severity_grade4: row.get("severity_grade4")?,
            severity_grade5: row.get("severity_grade5")?,
            management: row.get("management")?,
            created_at: parse_ts(&row.get::<_, String>("created_at")?),
            updated_at: parse_ts(&row.get::<_, String>("updated_at")?),
        })
    }

    // ============================================
    // Publication operations
    // ============================================

    /// Insert a publication together with its structured author rows,
    /// atomically.
    pub fn insert_publication(
        &self,
        publication: &Publication,
        authors: &[PublicationAuthor],
    ) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            r#"
            INSERT INTO publications (id, study_id, authors_text, title, journal,
                                      publication_year, volume, issue, pages, doi, pmid,
                                      pmcid, abstract_text, full_text_url, publication_type,
                                      conference_name, conference_date, conference_location,
                                      data_stage, is_active, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                    ?17, ?18, ?19, ?20, ?21, ?22)
            "#,
            params![
                publication.id,
                publication.study_id,
                publication.authors_text,
                publication.title,
                publication.journal,
                publication.publication_year,
                publication.volume,
                publication.issue,
                publication.pages,
                publication.doi,
                publication.pmid,
                publication.pmcid,
                publication.abstract_text,
                publication.full_text_url,
                publication.publication_type,
                publication.conference_name,
                publication.conference_date.map(|d| d.to_string()),
                publication.conference_location,
                publication.data_stage,
                publication.is_active,
                publication.created_at.to_rfc3339(),
                publication.updated_at.to_rfc3339(),
            ],
        )?;
        for author in authors {
            tx.execute(
                r#"
                INSERT INTO publication_authors (id, publication_id, author_name,
                                                 author_order, affiliation, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    author.id,
                    author.publication_id,
                    author.author_name,
                    author.author_order,
                    author.affiliation,
                    author.created_at.to_rfc3339(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// List publications for a study, each with its ordered authors
    pub fn list_publications(&self, study_id: &str) -> Result<Vec<PublicationWithAuthors>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT * FROM publications WHERE study_id = ? \
             ORDER BY publication_year DESC, rowid",
        )?;
        let rows = stmt.query_map([study_id], Self::row_to_publication)?;
        let mut publications = Vec::new();
        for row in rows {
            publications.push(row?);
        }

        let mut author_stmt = conn.prepare(
            "SELECT * FROM publication_authors WHERE publication_id = ? \
             ORDER BY author_order, rowid",
        )?;

        let mut items = Vec::with_capacity(publications.len());
        for publication in publications {
            let author_rows =
                author_stmt.query_map([&publication.id], Self::row_to_publication_author)?;
            let mut authors = Vec::new();
            for row in author_rows {
                authors.push(row?);
            }
            items.push(PublicationWithAuthors {
                publication,
                authors,
            });
        }
        Ok(items)
    }

    fn row_to_publication(row: &Row) -> rusqlite::Result<Publication> {
        Ok(Publication {
            id: row.get("id")?,
            study_id: row.get("study_id")?,
            authors_text: row.get("authors_text")?,
            title: row.get("title")?,
            journal: row.get("journal")?,
            publication_year: row.get("publication_year")?,
            volume: row.get("volume")?,
            issue: row.get("issue")?,
            pages: row.get("pages")?,
            doi: row.get("doi")?,
            pmid: row.get("pmid")?,
            pmcid: row.get("pmcid")?,
            abstract_text: row.get("abstract_text")?,
            full_text_url: row.get("full_text_url")?,
            publication_type: row.get("publication_type")?,
            conference_name: row.get("conference_name")?,
            conference_date: parse_date_opt(row.get("conference_date")?),
            conference_location: row.get("conference_location")?,
            data_stage: row.get("data_stage")?,
            is_active: row.get("is_active")?,
            created_at: parse_ts(&row.get::<_, String>("created_at")?),
            updated_at: parse_ts(&row.get::<_, String>("updated_at")?),
        })
    }

    fn row_to_publication_author(row: &Row) -> rusqlite::Result<PublicationAuthor> {
        Ok(PublicationAuthor {
            id: row.get("id")?,
            publication_id: row.get("publication_id")?,
            author_name: row.get("author_name")?,
            author_order: row.get("author_order")?,
            affiliation: row.get("affiliation")?,
            created_at: parse_ts(&row.get::<_, String>("created_at")?),
        })
    }

    // ============================================
    // Favorite operations
    // ============================================

    /// Toggle a favorite. Returns `true` if the study is now favorited,
    /// `false` if the toggle removed an existing favorite.
    pub fn toggle_favorite(&self, user_id: &str, study_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM user_favorites WHERE user_id = ?1 AND study_id = ?2",
            params![user_id, study_id],
        )?;
        if deleted > 0 {
            return Ok(false);
        }
        conn.execute(
            r#"
            INSERT INTO user_favorites (id, user_id, study_id, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![new_id(), user_id, study_id, Utc::now().to_rfc3339()],
        )?;
        Ok(true)
    }

    /// Check whether a study is favorited by a user
    pub fn is_favorited(&self, user_id: &str, study_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM user_favorites WHERE user_id = ?1 AND study_id = ?2",
            params![user_id, study_id],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    /// List a user's favorites, most recently added first
    pub fn list_favorites(&self, user_id: &str, page: PageRequest) -> Result<Page<FavoriteItem>> {
        let conn = self.conn.lock().unwrap();

        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM user_favorites WHERE user_id = ?",
            [user_id],
            |r| r.get(0),
        )?;

        let mut stmt = conn.prepare(
            r#"
            SELECT f.id AS favorite_id, f.created_at AS favorited_at,
                   s.id, s.nct_id, s.official_title, s.brief_title, s.acronym, s.phase,
                   s.status, s.start_date, s.completion_date, s.enrollment, s.sponsor_name,
                   s.updated_at
            FROM user_favorites f
            JOIN studies s ON s.id = f.study_id
            WHERE f.user_id = ?1
            ORDER BY f.created_at DESC, f.rowid DESC
            LIMIT ?2 OFFSET ?3
            "#,
        )?;
        let rows = stmt.query_map(params![user_id, page.limit(), page.offset()], |row| {
            let study = Self::row_to_study_summary(row)?;
            Ok(FavoriteItem {
                favorite: Favorite {
                    id: row.get("favorite_id")?,
                    user_id: user_id.to_string(),
                    study_id: study.id.clone(),
                    created_at: parse_ts(&row.get::<_, String>("favorited_at")?),
                },
                study,
            })
        })?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(Page::new(items, total, page))
    }

    // ============================================
    // History operations
    // ============================================

    /// Append a view-history entry. History is append-only: repeat views of
    /// the same study produce new rows.
    pub fn record_history(&self, entry: &HistoryEntry) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO user_history (id, user_id, study_id, viewed_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                entry.id,
                entry.user_id,
                entry.study_id,
                entry.viewed_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// List a user's view history, most recent first
    pub fn list_history(&self, user_id: &str, page: PageRequest) -> Result<Page<HistoryItem>> {
        let conn = self.conn.lock().unwrap();

        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM user_history WHERE user_id = ?",
            [user_id],
            |r| r.get(0),
        )?;

        let mut stmt = conn.prepare(
            r#"
            SELECT h.id AS history_id, h.viewed_at,
                   s.id, s.nct_id, s.official_title, s.brief_title, s.acronym, s.phase,
                   s.status, s.start_date, s.completion_date, s.enrollment, s.sponsor_name,
                   s.updated_at
            FROM user_history h
            JOIN studies s ON s.id = h.study_id
            WHERE h.user_id = ?1
            ORDER BY h.viewed_at DESC, h.rowid DESC
            LIMIT ?2 OFFSET ?3
            "#,
        )?;
        let rows = stmt.query_map(params![user_id, page.limit(), page.offset()], |row| {
            let study = Self::row_to_study_summary(row)?;
            Ok(HistoryItem {
                entry: HistoryEntry {
                    id: row.get("history_id")?,
                    user_id: user_id.to_string(),
                    study_id: study.id.clone(),
                    viewed_at: parse_ts(&row.get::<_, String>("viewed_at")?),
                },
                study,
            })
        })?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(Page::new(items, total, page))
    }

    // ============================================
    // Search history operations
    // ============================================

    /// Append a search-history record
    pub fn record_search(&self, record: &SearchRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO search_history (id, user_id, query, filters, result_count, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                record.id,
                record.user_id,
                record.query,
                record.filters.to_string(),
                record.result_count,
                record.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// List a user's recorded searches, most recent first
    pub fn list_search_history(
        &self,
        user_id: &str,
        page: PageRequest,
    ) -> Result<Page<SearchRecord>> {
        let conn = self.conn.lock().unwrap();

        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM search_history WHERE user_id = ?",
            [user_id],
            |r| r.get(0),
        )?;

        let mut stmt = conn.prepare(
            "SELECT * FROM search_history WHERE user_id = ?1 \
             ORDER BY created_at DESC, rowid DESC LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt.query_map(
            params![user_id, page.limit(), page.offset()],
            Self::row_to_search_record,
        )?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(Page::new(items, total, page))
    }

    fn row_to_search_record(row: &Row) -> rusqlite::Result<SearchRecord> {
        let filters_str: String = row.get("filters")?;
        Ok(SearchRecord {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            query: row.get("query")?,
            filters: serde_json::from_str(&filters_str).unwrap_or(serde_json::json!({})),
            result_count: row.get("result_count")?,
            created_at: parse_ts(&row.get::<_, String>("created_at")?),
        })
    }

    // ============================================
    // Feedback operations
    // ============================================

    /// Insert a feedback record
    pub fn insert_feedback(&self, feedback: &Feedback) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO user_feedback (id, user_id, study_id, feedback_type, feedback_text,
                                       status, assigned_to, response_text, resolved_at,
                                       created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                feedback.id,
                feedback.user_id,
                feedback.study_id,
                feedback.feedback_type.as_str(),
                feedback.feedback_text,
                feedback.status.as_str(),
                feedback.assigned_to,
                feedback.response_text,
                feedback.resolved_at.map(|t| t.to_rfc3339()),
                feedback.created_at.to_rfc3339(),
                feedback.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Get a feedback record by ID
    pub fn get_feedback(&self, id: &str) -> Result<Option<Feedback>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM user_feedback WHERE id = ?",
            [id],
            Self::row_to_feedback,
        )
        .optional()
        .map_err(Error::from)
    }

    /// List feedback, optionally filtered by lifecycle status
    pub fn list_feedback(
        &self,
        status: Option<FeedbackStatus>,
        page: PageRequest,
    ) -> Result<Page<Feedback>> {
        let conn = self.conn.lock().unwrap();

        let mut sql = String::from("SELECT * FROM user_feedback WHERE 1=1");
        let mut count_sql = String::from("SELECT COUNT(*) FROM user_feedback WHERE 1=1");
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];

        if let Some(status) = status {
            sql.push_str(" AND status = ?");
            count_sql.push_str(" AND status = ?");
            params.push(Box::new(status.as_str().to_string()));
        }

        let count_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let total: i64 = conn.query_row(&count_sql, count_refs.as_slice(), |r| r.get(0))?;

        sql.push_str(" ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?");
        params.push(Box::new(page.limit()));
        params.push(Box::new(page.offset()));
        let refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(refs.as_slice(), Self::row_to_feedback)?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(Page::new(items, total, page))
    }

    /// Advance a feedback record through its lifecycle.
    ///
    /// `response_text` and `assigned_to` are only overwritten when provided.
    /// Moving to a terminal status stamps `resolved_at`.
    pub fn update_feedback_status(
        &self,
        id: &str,
        status: FeedbackStatus,
        response_text: Option<&str>,
        assigned_to: Option<&str>,
    ) -> Result<()> {
        let resolved_at = matches!(
            status,
            FeedbackStatus::Resolved | FeedbackStatus::Dismissed
        )
        .then(|| Utc::now().to_rfc3339());

        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            r#"
            UPDATE user_feedback SET
                status = ?2,
                response_text = COALESCE(?3, response_text),
                assigned_to = COALESCE(?4, assigned_to),
                resolved_at = COALESCE(?5, resolved_at),
                updated_at = ?6
            WHERE id = ?1
            "#,
            params![
                id,
                status.as_str(),
                response_text,
                assigned_to,
                resolved_at,
                Utc::now().to_rfc3339(),
            ],
        )?;
        if n == 0 {
            return Err(Error::NotFound("feedback", id.to_string()));
        }
        Ok(())
    }

    fn row_to_feedback(row: &Row) -> rusqlite::Result<Feedback> {
        let type_str: String = row.get("feedback_type")?;
        let status_str: String = row.get("status")?;
        Ok(Feedback {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            study_id: row.get("study_id")?,
            feedback_type: type_str
                .parse()
                .unwrap_or_else(|_| FeedbackType::Other(String::new())),
            feedback_text: row.get("feedback_text")?,
            status: status_str.parse().unwrap_or(FeedbackStatus::Pending),
            assigned_to: row.get("assigned_to")?,
            response_text: row.get("response_text")?,
            resolved_at: parse_ts_opt(row.get("resolved_at")?),
            created_at: parse_ts(&row.get::<_, String>("created_at")?),
            updated_at: parse_ts(&row.get::<_, String>("updated_at")?),
        })
    }

    // ============================================
    // System config operations
    // ============================================

    /// Get a runtime configuration entry by key
    pub fn get_config(&self, key: &str) -> Result<Option<ConfigEntry>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM system_config WHERE config_key = ?",
            [key],
            Self::row_to_config_entry,
        )
        .optional()
        .map_err(Error::from)
    }

    /// List all runtime configuration entries
    pub fn list_config(&self) -> Result<Vec<ConfigEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM system_config ORDER BY config_key")?;
        let rows = stmt.query_map([], Self::row_to_config_entry)?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    /// Update the value of an editable configuration entry
    pub fn set_config(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE system_config SET config_value = ?2, updated_at = ?3 \
             WHERE config_key = ?1 AND is_editable = 1",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        if n == 0 {
            let exists: i64 = conn.query_row(
                "SELECT COUNT(*) FROM system_config WHERE config_key = ?",
                [key],
                |r| r.get(0),
            )?;
            if exists > 0 {
                return Err(Error::Constraint(format!(
                    "config key is not editable: {}",
                    key
                )));
            }
            return Err(Error::NotFound("config key", key.to_string()));
        }
        Ok(())
    }

    fn row_to_config_entry(row: &Row) -> rusqlite::Result<ConfigEntry> {
        Ok(ConfigEntry {
            config_key: row.get("config_key")?,
            config_value: row.get("config_value")?,
            config_type: row.get("config_type")?,
            description: row.get("description")?,
            is_editable: row.get("is_editable")?,
            updated_at: parse_ts(&row.get::<_, String>("updated_at")?),
        })
    }

    // ============================================
    // System log operations
    // ============================================

    /// Append an audit-log event. Returns the assigned row ID.
    pub fn insert_system_log(&self, event: &LogEvent) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO system_logs (user_id, action, resource_type, resource_id, ip_address,
                                     user_agent, request_data, response_data, error_message,
                                     duration_ms, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                event.user_id,
                event.action,
                event.resource_type,
                event.resource_id,
                event.ip_address,
                event.user_agent,
                event.request_data.as_ref().map(|v| v.to_string()),
                event.response_data.as_ref().map(|v| v.to_string()),
                event.error_message,
                event.duration_ms,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Count a user's logged actions since a cutoff. Used for the login
    /// lockout window.
    pub fn count_user_actions_since(
        &self,
        user_id: &str,
        action: &str,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM system_logs \
             WHERE user_id = ?1 AND action = ?2 AND created_at >= ?3",
            params![user_id, action, since.to_rfc3339()],
            |r| r.get(0),
        )?;
        Ok(count)
    }

    /// List recent audit-log entries, optionally filtered by action
    pub fn list_system_logs(
        &self,
        action: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SystemLogEntry>> {
        let conn = self.conn.lock().unwrap();

        let mut sql = String::from("SELECT * FROM system_logs WHERE 1=1");
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];

        if let Some(action) = action {
            sql.push_str(" AND action = ?");
            params.push(Box::new(action.to_string()));
        }

        sql.push_str(&format!(" ORDER BY id DESC LIMIT {}", limit));
        let refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(refs.as_slice(), Self::row_to_system_log)?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    fn row_to_system_log(row: &Row) -> rusqlite::Result<SystemLogEntry> {
        let request_str: Option<String> = row.get("request_data")?;
        let response_str: Option<String> = row.get("response_data")?;
        Ok(SystemLogEntry {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            action: row.get("action")?,
            resource_type: row.get("resource_type")?,
            resource_id: row.get("resource_id")?,
            ip_address: row.get("ip_address")?,
            user_agent: row.get("user_agent")?,
            request_data: request_str.and_then(|s| serde_json::from_str(&s).ok()),
            response_data: response_str.and_then(|s| serde_json::from_str(&s).ok()),
            error_message: row.get("error_message")?,
            duration_ms: row.get("duration_ms")?,
            created_at: parse_ts(&row.get::<_, String>("created_at")?),
        })
    }

    // ============================================
    // Data sync log operations
    // ============================================

    /// Append a data-sync run record. The entry's `id` is assigned by the
    /// database; the value passed in is ignored. Returns the assigned ID.
    pub fn insert_sync_log(&self, entry: &SyncLogEntry) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO data_sync_logs (data_source, sync_type, total_records, new_records,
                                        updated_records, deleted_records, error_records,
                                        start_time, end_time, duration_seconds, status,
                                        error_message, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                entry.data_source,
                entry.sync_type,
                entry.total_records,
                entry.new_records,
                entry.updated_records,
                entry.deleted_records,
                entry.error_records,
                entry.start_time.map(|t| t.to_rfc3339()),
                entry.end_time.map(|t| t.to_rfc3339()),
                entry.duration_seconds,
                entry.status.map(|s| s.as_str()),
                entry.error_message,
                entry.created_at.to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// List recent sync runs, optionally filtered by data source
    pub fn list_sync_logs(
        &self,
        data_source: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SyncLogEntry>> {
        let conn = self.conn.lock().unwrap();

        let mut sql = String::from("SELECT * FROM data_sync_logs WHERE 1=1");
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];

        if let Some(source) = data_source {
            sql.push_str(" AND data_source = ?");
            params.push(Box::new(source.to_string()));
        }

        sql.push_str(&format!(" ORDER BY id DESC LIMIT {}", limit));
        let refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(refs.as_slice(), Self::row_to_sync_log)?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    fn row_to_sync_log(row: &Row) -> rusqlite::Result<SyncLogEntry> {
        Ok(SyncLogEntry {
            id: row.get("id")?,
            data_source: row.get("data_source")?,
            sync_type: row.get("sync_type")?,
            total_records: row.get("total_records")?,
            new_records: row.get("new_records")?,
            updated_records: row.get("updated_records")?,
            deleted_records: row.get("deleted_records")?,
            error_records: row.get("error_records")?,
            start_time: parse_ts_opt(row.get("start_time")?),
            end_time: parse_ts_opt(row.get("end_time")?),
            duration_seconds: row.get("duration_seconds")?,
            status: row
                .get::<_, Option<String>>("status")?
                .and_then(|s| s.parse().ok()),
            error_message: row.get("error_message")?,
            created_at: parse_ts(&row.get::<_, String>("created_at")?),
        })
    }
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_ts_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_date_opt(s: Option<String>) -> Option<NaiveDate> {
    s.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    fn sample_study(nct: &str) -> (Study, Vec<Condition>) {
        let study = Study::new(NctId::new(nct).unwrap(), "A study of something");
        let condition = Condition::new(&study.id, "Non-small cell lung cancer");
        (study, vec![condition])
    }

    fn sample_user(username: &str) -> User {
        let now = Utc::now();
        User {
            id: new_id(),
            username: username.to_string(),
            email: format!("{}@example.org", username),
            password_hash: "salt$digest".to_string(),
            full_name: None,
            institution: None,
            title: None,
            specialty: None,
            is_active: true,
            is_verified: false,
            is_superuser: false,
            last_login: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_user_insert_and_lookup() {
        let db = test_db();
        let user = sample_user("alice");
        db.insert_user(&user).unwrap();

        let by_name = db.get_user_by_username("alice").unwrap().unwrap();
        assert_eq!(by_name.id, user.id);
        let by_email = db.get_user_by_email("alice@example.org").unwrap().unwrap();
        assert_eq!(by_email.id, user.id);
        assert!(db.get_user_by_username("bob").unwrap().is_none());
    }

    #[test]
    fn test_role_assignment() {
        let db = test_db();
        let user = sample_user("alice");
        db.insert_user(&user).unwrap();

        let now = Utc::now();
        let role = Role {
            id: new_id(),
            name: "curator".to_string(),
            description: Some("Can edit study data".to_string()),
            permissions: serde_json::json!({"studies.write": true}),
            created_at: now,
            updated_at: now,
        };
        db.insert_role(&role).unwrap();

        let assignment = RoleAssignment {
            user_id: user.id.clone(),
            role_id: role.id.clone(),
            assigned_at: now,
            assigned_by: None,
        };
        db.assign_role(&assignment).unwrap();
        // Re-assigning is a no-op
        db.assign_role(&assignment).unwrap();

        let roles = db.list_roles_for_user(&user.id).unwrap();
        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0].name, "curator");
        assert_eq!(roles[0].permissions["studies.write"], true);

        let found = db.get_role_by_name("curator").unwrap().unwrap();
        assert_eq!(found.id, role.id);
    }

    #[test]
    fn test_study_requires_condition() {
        let db = test_db();
        let study = Study::new(NctId::new("NCT00000001").unwrap(), "Orphan study");
        let err = db.insert_study(&study, &[]).unwrap_err();
        assert!(matches!(err, Error::Constraint(_)));
        // Nothing was written
        assert!(db.get_study(&study.id).unwrap().is_none());
    }

    #[test]
    fn test_study_insert_and_lookup_by_nct() {
        let db = test_db();
        let (study, conditions) = sample_study("NCT01234567");
        db.insert_study(&study, &conditions).unwrap();

        let found = db
            .get_study_by_nct_id(&NctId::new("NCT01234567").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(found.id, study.id);
        assert_eq!(db.list_conditions(&study.id).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_study_cascades() {
        let db = test_db();
        let (study, conditions) = sample_study("NCT01234567");
        db.insert_study(&study, &conditions).unwrap();
        db.insert_intervention(&Intervention::new(&study.id, "Drug A"))
            .unwrap();

        db.delete_study(&study.id).unwrap();
        assert!(db.get_study(&study.id).unwrap().is_none());
        assert!(db.list_conditions(&study.id).unwrap().is_empty());
        assert!(db.list_interventions(&study.id).unwrap().is_empty());

        // Deleting again reports not found
        assert!(matches!(
            db.delete_study(&study.id),
            Err(Error::NotFound(_, _))
        ));
    }

    #[test]
    fn test_delete_outcome_detaches_results() {
        let db = test_db();
        let (study, conditions) = sample_study("NCT01234567");
        db.insert_study(&study, &conditions).unwrap();

        let outcome = Outcome::new(&study.id, "Overall survival");
        db.insert_outcome(&outcome).unwrap();

        let mut result = StudyResult::new(&study.id);
        result.outcome_id = Some(outcome.id.clone());
        result.value = Some("23.4 months".to_string());
        db.insert_result(&result).unwrap();

        db.delete_outcome(&outcome.id).unwrap();

        // The result row survives, detached from the deleted outcome
        let results = db.list_results(&study.id).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, result.id);
        assert_eq!(results[0].outcome_id, None);
        assert!(db.list_outcomes(&study.id).unwrap().is_empty());

        assert!(matches!(
            db.delete_outcome(&outcome.id),
            Err(Error::NotFound(_, _))
        ));
    }

    #[test]
    fn test_toggle_favorite_round_trip() {
        let db = test_db();
        let user = sample_user("alice");
        db.insert_user(&user).unwrap();
        let (study, conditions) = sample_study("NCT01234567");
        db.insert_study(&study, &conditions).unwrap();

        assert!(db.toggle_favorite(&user.id, &study.id).unwrap());
        assert!(db.is_favorited(&user.id, &study.id).unwrap());
        assert!(!db.toggle_favorite(&user.id, &study.id).unwrap());
        assert!(!db.is_favorited(&user.id, &study.id).unwrap());
    }

    #[test]
    fn test_search_phase_filter_is_exact() {
        let db = test_db();

        let (mut s1, c1) = sample_study("NCT00000001");
        s1.phase = Some(Phase::Phase1);
        db.insert_study(&s1, &c1).unwrap();

        let (mut s2, c2) = sample_study("NCT00000002");
        s2.phase = Some(Phase::Phase1And2);
        db.insert_study(&s2, &c2).unwrap();

        let (mut s3, c3) = sample_study("NCT00000003");
        s3.phase = Some(Phase::Phase3);
        db.insert_study(&s3, &c3).unwrap();

        let filter = StudyFilter {
            phases: vec![Phase::Phase1],
            ..Default::default()
        };
        let page = db.search_studies(&filter, PageRequest::default()).unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].nct_id.as_str(), "NCT00000001");
    }

    #[test]
    fn test_search_total_survives_pagination() {
        let db = test_db();
        for i in 0..5 {
            let (study, conditions) = sample_study(&format!("NCT0000000{}", i));
            db.insert_study(&study, &conditions).unwrap();
        }

        let page = db
            .search_studies(&StudyFilter::default(), PageRequest::new(1, 2))
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.page_count(), 3);
    }

    #[test]
    fn test_session_cleanup() {
        let db = test_db();
        let user = sample_user("alice");
        db.insert_user(&user).unwrap();

        let now = Utc::now();
        let expired = UserSession {
            id: new_id(),
            user_id: user.id.clone(),
            session_token: "expired-token".to_string(),
            ip_address: None,
            user_agent: None,
            expires_at: now - chrono::Duration::minutes(1),
            created_at: now - chrono::Duration::hours(9),
        };
        let live = UserSession {
            id: new_id(),
            user_id: user.id.clone(),
            session_token: "live-token".to_string(),
            ip_address: None,
            user_agent: None,
            expires_at: now + chrono::Duration::hours(8),
            created_at: now,
        };
        db.insert_session(&expired).unwrap();
        db.insert_session(&live).unwrap();

        let removed = db.cleanup_expired_sessions(now).unwrap();
        assert_eq!(removed, 1);
        assert!(db.get_session_by_token("expired-token").unwrap().is_none());
        assert!(db.get_session_by_token("live-token").unwrap().is_some());
    }

    #[test]
    fn test_search_history_is_paginated() {
        let db = test_db();
        let user = sample_user("alice");
        db.insert_user(&user).unwrap();

        for i in 0..5 {
            db.record_search(&SearchRecord {
                id: new_id(),
                user_id: Some(user.id.clone()),
                query: format!("query {}", i),
                filters: serde_json::json!({}),
                result_count: Some(i),
                created_at: Utc::now(),
            })
            .unwrap();
        }

        let first = db.list_search_history(&user.id, PageRequest::new(1, 2)).unwrap();
        assert_eq!(first.total, 5);
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.page_count(), 3);

        let second = db.list_search_history(&user.id, PageRequest::new(2, 2)).unwrap();
        assert_eq!(second.items.len(), 2);
        // No overlap between pages
        assert_ne!(first.items[0].id, second.items[0].id);
        assert_ne!(first.items[1].id, second.items[1].id);
    }

    #[test]
    fn test_config_set_and_get() {
        let db = test_db();
        db.set_config("max_search_results", "500").unwrap();
        let entry = db.get_config("max_search_results").unwrap().unwrap();
        assert_eq!(entry.config_value.as_deref(), Some("500"));

        assert!(matches!(
            db.set_config("no_such_key", "x"),
            Err(Error::NotFound(_, _))
        ));
    }

    #[test]
    fn test_feedback_lifecycle() {
        let db = test_db();
        let now = Utc::now();
        let feedback = Feedback {
            id: new_id(),
            user_id: None,
            study_id: None,
            feedback_type: FeedbackType::DataCorrection,
            feedback_text: "The enrollment number looks wrong".to_string(),
            status: FeedbackStatus::Pending,
            assigned_to: None,
            response_text: None,
            resolved_at: None,
            created_at: now,
            updated_at: now,
        };
        db.insert_feedback(&feedback).unwrap();

        db.update_feedback_status(&feedback.id, FeedbackStatus::Resolved, Some("Fixed"), None)
            .unwrap();
        let updated = db.get_feedback(&feedback.id).unwrap().unwrap();
        assert_eq!(updated.status, FeedbackStatus::Resolved);
        assert_eq!(updated.response_text.as_deref(), Some("Fixed"));
        assert!(updated.resolved_at.is_some());
    }
}
