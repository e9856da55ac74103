//! Runtime settings backed by the `system_config` table
//!
//! Settings are loaded as an immutable snapshot. Edits made through
//! [`crate::db::Database::set_config`] take effect only when a caller
//! explicitly reloads; there is no global mutable state.

use crate::db::Database;
use crate::error::Result;

/// A point-in-time snapshot of the tunable runtime settings.
///
/// Unknown keys in `system_config` are ignored; missing or unparsable
/// values fall back to the defaults seeded at migration time.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// Display name shown by the frontend
    pub site_name: String,
    /// Display description shown by the frontend
    pub site_description: String,
    /// Cadence of the external registry sync job
    pub data_sync_interval_hours: i64,
    /// Cap on study search page size and result window
    pub max_search_results: i64,
    /// Session TTL applied on login
    pub session_timeout_minutes: i64,
    /// Minimum password length at registration
    pub password_min_length: usize,
    /// Failed attempts within the lockout window before lockout
    pub max_login_attempts: i64,
    /// Window over which failed attempts are counted, in minutes
    pub login_lockout_minutes: i64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            site_name: "Oncology Research Progress".to_string(),
            site_description: "Clinical research progress lookup for oncology".to_string(),
            data_sync_interval_hours: 24,
            max_search_results: 1000,
            session_timeout_minutes: 480,
            max_login_attempts: 5,
            login_lockout_minutes: 30,
            password_min_length: 8,
        }
    }
}

impl RuntimeSettings {
    /// Load a fresh snapshot from the database.
    pub fn load(db: &Database) -> Result<Self> {
        let mut settings = Self::default();
        for entry in db.list_config()? {
            let Some(value) = entry.config_value else {
                continue;
            };
            match entry.config_key.as_str() {
                "site_name" => settings.site_name = value,
                "site_description" => settings.site_description = value,
                "data_sync_interval_hours" => {
                    if let Ok(v) = value.parse() {
                        settings.data_sync_interval_hours = v;
                    }
                }
                "max_search_results" => {
                    if let Ok(v) = value.parse() {
                        settings.max_search_results = v;
                    }
                }
                "session_timeout_minutes" => {
                    if let Ok(v) = value.parse() {
                        settings.session_timeout_minutes = v;
                    }
                }
                "password_min_length" => {
                    if let Ok(v) = value.parse() {
                        settings.password_min_length = v;
                    }
                }
                "max_login_attempts" => {
                    if let Ok(v) = value.parse() {
                        settings.max_login_attempts = v;
                    }
                }
                "login_lockout_minutes" => {
                    if let Ok(v) = value.parse() {
                        settings.login_lockout_minutes = v;
                    }
                }
                _ => {}
            }
        }
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    #[test]
    fn test_load_seeded_defaults() {
        let db = test_db();
        let settings = RuntimeSettings::load(&db).unwrap();
        assert_eq!(settings.session_timeout_minutes, 480);
        assert_eq!(settings.max_login_attempts, 5);
        assert_eq!(settings.password_min_length, 8);
    }

    #[test]
    fn test_snapshot_does_not_track_edits() {
        let db = test_db();
        let before = RuntimeSettings::load(&db).unwrap();
        db.set_config("max_search_results", "250").unwrap();

        // The snapshot is stable until a reload
        assert_eq!(before.max_search_results, 1000);
        let after = RuntimeSettings::load(&db).unwrap();
        assert_eq!(after.max_search_results, 250);
    }

    #[test]
    fn test_unparsable_value_falls_back() {
        let db = test_db();
        db.set_config("session_timeout_minutes", "soon").unwrap();
        let settings = RuntimeSettings::load(&db).unwrap();
        assert_eq!(settings.session_timeout_minutes, 480);
    }
}
