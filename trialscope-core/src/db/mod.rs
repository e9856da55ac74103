//! Database layer for trialscope
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - Repository pattern for queries
//! - Derived read-models over the study graph

pub mod repo;
pub mod schema;
pub mod views;

pub use repo::{Database, FavoriteItem, HistoryItem, LogEvent};
pub use views::{ResultsSummary, StudyOverview};
