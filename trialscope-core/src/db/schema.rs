//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.
//!
//! The upstream schema definition relied on engine-specific DDL (inline
//! INDEX clauses, trigger-based invariants); here it is emitted as portable
//! SQLite with explicit ON DELETE rules and separate CREATE INDEX
//! statements. The "study must have a condition" invariant is enforced
//! transactionally by the repository, not by a trigger.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: Initial schema
    r#"
    -- ============================================
    -- Users, roles, sessions
    -- ============================================

    CREATE TABLE IF NOT EXISTS users (
        id               TEXT PRIMARY KEY,
        username         TEXT NOT NULL UNIQUE,
        email            TEXT NOT NULL UNIQUE,
        password_hash    TEXT NOT NULL,
        full_name        TEXT,
        institution      TEXT,
        title            TEXT,
        specialty        TEXT,
        is_active        INTEGER NOT NULL DEFAULT 1,
        is_verified      INTEGER NOT NULL DEFAULT 0,
        is_superuser     INTEGER NOT NULL DEFAULT 0,
        last_login       TEXT,
        created_at       TEXT NOT NULL,
        updated_at       TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS roles (
        id               TEXT PRIMARY KEY,
        name             TEXT NOT NULL UNIQUE,
        description      TEXT,
        permissions      JSON NOT NULL DEFAULT '{}',
        created_at       TEXT NOT NULL,
        updated_at       TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS user_roles (
        user_id          TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        role_id          TEXT NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
        assigned_at      TEXT NOT NULL,
        assigned_by      TEXT REFERENCES users(id) ON DELETE SET NULL,
        PRIMARY KEY (user_id, role_id)
    );

    CREATE TABLE IF NOT EXISTS user_sessions (
        id               TEXT PRIMARY KEY,
        user_id          TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        session_token    TEXT NOT NULL UNIQUE,
        ip_address       TEXT,
        user_agent       TEXT,
        expires_at       TEXT NOT NULL,
        created_at       TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_user_sessions_user ON user_sessions(user_id);
    CREATE INDEX IF NOT EXISTS idx_user_sessions_expires ON user_sessions(expires_at);

    -- ============================================
    -- Studies and child entities
    -- ============================================

    CREATE TABLE IF NOT EXISTS studies (
        id                       TEXT PRIMARY KEY,
        nct_id                   TEXT NOT NULL UNIQUE,
        official_title           TEXT NOT NULL,
        brief_title              TEXT,
        acronym                  TEXT,
        study_type               TEXT,
        phase                    TEXT,
        status                   TEXT,
        status_verified_date     TEXT,
        start_date               TEXT,
        completion_date          TEXT,
        primary_completion_date  TEXT,
        brief_summary            TEXT,
        detailed_description     TEXT,
        study_design             TEXT,
        allocation               TEXT,
        intervention_model       TEXT,
        primary_purpose          TEXT,
        masking                  TEXT,
        primary_endpoint         TEXT,
        secondary_endpoint       TEXT,
        enrollment               INTEGER,
        enrollment_type          TEXT,
        sponsor_name             TEXT,
        sponsor_class            TEXT,
        collaborator             TEXT,
        principal_investigator   TEXT,
        data_source              TEXT,
        data_source_id           TEXT,
        is_active                INTEGER NOT NULL DEFAULT 1,
        created_at               TEXT NOT NULL,
        updated_at               TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_studies_phase ON studies(phase);
    CREATE INDEX IF NOT EXISTS idx_studies_status ON studies(status);
    CREATE INDEX IF NOT EXISTS idx_studies_start_date ON studies(start_date);
    CREATE INDEX IF NOT EXISTS idx_studies_updated ON studies(updated_at DESC);

    CREATE TABLE IF NOT EXISTS interventions (
        id                   TEXT PRIMARY KEY,
        study_id             TEXT NOT NULL REFERENCES studies(id) ON DELETE CASCADE,
        name                 TEXT NOT NULL,
        intervention_type    TEXT,
        description          TEXT,
        other_name           TEXT,
        drug_name_generic    TEXT,
        drug_name_brand      TEXT,
        drug_class           TEXT,
        mechanism_of_action  TEXT,
        dosage_form          TEXT,
        dosage_route         TEXT,
        dosage_frequency     TEXT,
        dosage_strength      TEXT,
        created_at           TEXT NOT NULL,
        updated_at           TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_interventions_study ON interventions(study_id);
    CREATE INDEX IF NOT EXISTS idx_interventions_name ON interventions(name);

    CREATE TABLE IF NOT EXISTS conditions (
        id                 TEXT PRIMARY KEY,
        study_id           TEXT NOT NULL REFERENCES studies(id) ON DELETE CASCADE,
        name               TEXT NOT NULL,
        mesh_term          TEXT,
        icd10_code         TEXT,
        category_level1    TEXT,
        category_level2    TEXT,
        category_level3    TEXT,
        stage              TEXT,
        stage_description  TEXT,
        biomarker          TEXT,
        created_at         TEXT NOT NULL,
        updated_at         TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_conditions_study ON conditions(study_id);
    CREATE INDEX IF NOT EXISTS idx_conditions_name ON conditions(name);

    CREATE TABLE IF NOT EXISTS molecular_targets (
        id                  TEXT PRIMARY KEY,
        study_id            TEXT NOT NULL REFERENCES studies(id) ON DELETE CASCADE,
        name                TEXT NOT NULL,
        full_name           TEXT,
        description         TEXT,
        detection_method    TEXT,
        detection_criteria  TEXT,
        positive_criteria   TEXT,
        negative_criteria   TEXT,
        created_at          TEXT NOT NULL,
        updated_at          TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_molecular_targets_study ON molecular_targets(study_id);

    CREATE TABLE IF NOT EXISTS outcomes (
        id            TEXT PRIMARY KEY,
        study_id      TEXT NOT NULL REFERENCES studies(id) ON DELETE CASCADE,
        title         TEXT NOT NULL,
        description   TEXT,
        outcome_type  TEXT,
        time_frame    TEXT,
        measure       TEXT,
        created_at    TEXT NOT NULL,
        updated_at    TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_outcomes_study ON outcomes(study_id);

    CREATE TABLE IF NOT EXISTS results (
        id                TEXT PRIMARY KEY,
        study_id          TEXT NOT NULL REFERENCES studies(id) ON DELETE CASCADE,
        outcome_id        TEXT REFERENCES outcomes(id) ON DELETE SET NULL,
        title             TEXT,
        description       TEXT,
        group_name        TEXT,
        group_description TEXT,
        sample_size       INTEGER,
        value             TEXT,
        unit              TEXT,
        mean_value        REAL,
        median_value      REAL,
        std_deviation     REAL,
        min_value         REAL,
        max_value         REAL,
        ci_lower          REAL,
        ci_upper          REAL,
        confidence_level  INTEGER,
        p_value           TEXT,
        hazard_ratio      REAL,
        odds_ratio        REAL,
        result_type       TEXT,
        data_source       TEXT,
        publication_date  TEXT,
        created_at        TEXT NOT NULL,
        updated_at        TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_results_study ON results(study_id);
    CREATE INDEX IF NOT EXISTS idx_results_type ON results(study_id, result_type);

    CREATE TABLE IF NOT EXISTS subgroup_analyses (
        id                 TEXT PRIMARY KEY,
        study_id           TEXT NOT NULL REFERENCES studies(id) ON DELETE CASCADE,
        result_id          TEXT REFERENCES results(id) ON DELETE SET NULL,
        subgroup_name      TEXT,
        subgroup_criteria  TEXT,
        sample_size        INTEGER,
        event_count        INTEGER,
        hazard_ratio       REAL,
        ci_lower           REAL,
        ci_upper           REAL,
        p_value            TEXT,
        created_at         TEXT NOT NULL,
        updated_at         TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_subgroup_analyses_study ON subgroup_analyses(study_id);

    CREATE TABLE IF NOT EXISTS safety_data (
        id                         TEXT PRIMARY KEY,
        study_id                   TEXT NOT NULL REFERENCES studies(id) ON DELETE CASCADE,
        event_name                 TEXT,
        event_type                 TEXT,
        event_category             TEXT,
        experimental_group_n       INTEGER,
        experimental_group_events  INTEGER,
        control_group_n            INTEGER,
        control_group_events       INTEGER,
        severity_grade1            INTEGER,
        severity_grade2            INTEGER,
        severity_grade3            INTEGER,
        severity_grade4            INTEGER,
        severity_grade5            INTEGER,
        management                 TEXT,
        created_at                 TEXT NOT NULL,
        updated_at                 TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_safety_data_study ON safety_data(study_id);

    CREATE TABLE IF NOT EXISTS publications (
        id                   TEXT PRIMARY KEY,
        study_id             TEXT NOT NULL REFERENCES studies(id) ON DELETE CASCADE,
        authors_text         TEXT,
        title                TEXT NOT NULL,
        journal              TEXT,
        publication_year     INTEGER,
        volume               TEXT,
        issue                TEXT,
        pages                TEXT,
        doi                  TEXT,
        pmid                 TEXT,
        pmcid                TEXT,
        abstract_text        TEXT,
        full_text_url        TEXT,
        publication_type     TEXT,
        conference_name      TEXT,
        conference_date      TEXT,
        conference_location  TEXT,
        data_stage           TEXT,
        is_active            INTEGER NOT NULL DEFAULT 1,
        created_at           TEXT NOT NULL,
        updated_at           TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_publications_study ON publications(study_id);
    CREATE INDEX IF NOT EXISTS idx_publications_year ON publications(publication_year);

    CREATE TABLE IF NOT EXISTS publication_authors (
        id              TEXT PRIMARY KEY,
        publication_id  TEXT NOT NULL REFERENCES publications(id) ON DELETE CASCADE,
        author_name     TEXT NOT NULL,
        author_order    INTEGER,
        affiliation     TEXT,
        created_at      TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_publication_authors_pub
        ON publication_authors(publication_id, author_order);

    -- ============================================
    -- User activity
    -- ============================================

    CREATE TABLE IF NOT EXISTS user_favorites (
        id          TEXT PRIMARY KEY,
        user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        study_id    TEXT NOT NULL REFERENCES studies(id) ON DELETE CASCADE,
        created_at  TEXT NOT NULL,
        UNIQUE(user_id, study_id)
    );

    CREATE INDEX IF NOT EXISTS idx_user_favorites_user ON user_favorites(user_id, created_at DESC);

    CREATE TABLE IF NOT EXISTS user_history (
        id         TEXT PRIMARY KEY,
        user_id    TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        study_id   TEXT NOT NULL REFERENCES studies(id) ON DELETE CASCADE,
        viewed_at  TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_user_history_user ON user_history(user_id, viewed_at DESC);

    CREATE TABLE IF NOT EXISTS search_history (
        id            TEXT PRIMARY KEY,
        user_id       TEXT REFERENCES users(id) ON DELETE CASCADE,
        query         TEXT NOT NULL,
        filters       JSON NOT NULL DEFAULT '{}',
        result_count  INTEGER,
        created_at    TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_search_history_user ON search_history(user_id, created_at DESC);

    CREATE TABLE IF NOT EXISTS user_feedback (
        id             TEXT PRIMARY KEY,
        user_id        TEXT REFERENCES users(id) ON DELETE CASCADE,
        study_id       TEXT REFERENCES studies(id) ON DELETE SET NULL,
        feedback_type  TEXT NOT NULL,
        feedback_text  TEXT NOT NULL,
        status         TEXT NOT NULL DEFAULT 'pending',
        assigned_to    TEXT REFERENCES users(id) ON DELETE SET NULL,
        response_text  TEXT,
        resolved_at    TEXT,
        created_at     TEXT NOT NULL,
        updated_at     TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_user_feedback_status ON user_feedback(status);

    -- ============================================
    -- System tables
    -- ============================================

    CREATE TABLE IF NOT EXISTS system_config (
        config_key    TEXT PRIMARY KEY,
        config_value  TEXT,
        config_type   TEXT,
        description   TEXT,
        is_editable   INTEGER NOT NULL DEFAULT 1,
        updated_at    TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS system_logs (
        id             INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id        TEXT REFERENCES users(id) ON DELETE SET NULL,
        action         TEXT NOT NULL,
        resource_type  TEXT,
        resource_id    TEXT,
        ip_address     TEXT,
        user_agent     TEXT,
        request_data   JSON,
        response_data  JSON,
        error_message  TEXT,
        duration_ms    INTEGER,
        created_at     TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_system_logs_action ON system_logs(action, created_at);

    CREATE TABLE IF NOT EXISTS data_sync_logs (
        id                INTEGER PRIMARY KEY AUTOINCREMENT,
        data_source       TEXT NOT NULL,
        sync_type         TEXT,
        total_records     INTEGER,
        new_records       INTEGER,
        updated_records   INTEGER,
        deleted_records   INTEGER,
        error_records     INTEGER,
        start_time        TEXT,
        end_time          TEXT,
        duration_seconds  INTEGER,
        status            TEXT,
        error_message     TEXT,
        created_at        TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_data_sync_logs_source ON data_sync_logs(data_source, created_at);

    -- ============================================
    -- Runtime configuration defaults
    -- ============================================

    INSERT OR IGNORE INTO system_config (config_key, config_value, config_type, description, is_editable, updated_at) VALUES
        ('site_name', 'Oncology Research Progress', 'string', 'Display name shown by the frontend', 1, strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
        ('site_description', 'Clinical research progress lookup for oncology', 'string', 'Display description shown by the frontend', 1, strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
        ('data_sync_interval_hours', '24', 'integer', 'Cadence of the external registry sync job', 1, strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
        ('max_search_results', '1000', 'integer', 'Cap on study search page size and result window', 1, strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
        ('session_timeout_minutes', '480', 'integer', 'Session TTL applied on login', 1, strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
        ('password_min_length', '8', 'integer', 'Minimum password length at registration', 1, strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
        ('max_login_attempts', '5', 'integer', 'Failed attempts within the lockout window before lockout', 1, strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
        ('login_lockout_minutes', '30', 'integer', 'Window over which failed attempts are counted', 1, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'));
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
