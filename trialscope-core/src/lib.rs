//! # trialscope-core
//!
//! Core library for trialscope - a clinical research progress lookup store.
//!
//! This library provides:
//! - Domain types for studies, their child entities, and user activity
//! - Database storage layer with SQLite
//! - Account, session, and lookup workflows via [`Service`]
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! Data flows through three layers:
//! - **Base tables:** studies and their exclusively-owned children, user
//!   accounts and activity, system bookkeeping
//! - **Read-models:** overviews and results summaries computed on demand
//!   from the base tables (see [`db::views`])
//! - **Service:** policy (password rules, lockout, search capping) layered
//!   over the repository
//!
//! ## Example
//!
//! ```rust,no_run
//! use trialscope_core::{Config, Database, Service};
//!
//! // Load configuration
//! let config = Config::load().expect("failed to load config");
//!
//! // Open database
//! let db = Database::open(&config.database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//!
//! let service = Service::new(db).expect("failed to load settings");
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use db::{Database, ResultsSummary, StudyOverview};
pub use error::{Error, Result};
pub use service::{AuthResponse, Service};
pub use settings::RuntimeSettings;
pub use types::*;

// Public modules
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod service;
pub mod settings;
pub mod types;
