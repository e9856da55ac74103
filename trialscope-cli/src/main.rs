//! trialscope - admin CLI for the clinical research lookup store
//!
//! Runs migrations, inspects and edits runtime configuration, prunes
//! expired sessions, and reports on stored data.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/trialscope/trialscope.db
//! - Logs: $XDG_STATE_HOME/trialscope/trialscope.log
//! - Config: $XDG_CONFIG_HOME/trialscope/config.toml

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use trialscope_core::types::{FeedbackStatus, PageRequest};
use trialscope_core::{Config, Database, Service};

#[derive(Parser)]
#[command(name = "trialscope")]
#[command(about = "Administer the trialscope database")]
#[command(version)]
struct Args {
    /// Path to the SQLite database (defaults to the configured location)
    #[arg(long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database if needed and run pending migrations
    Migrate,
    /// Inspect or edit runtime configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Delete expired sessions
    CleanupSessions,
    /// Print row counts for the main tables
    Stats,
    /// List feedback records
    Feedback {
        /// Filter by lifecycle status (pending, in_progress, resolved, dismissed)
        #[arg(long)]
        status: Option<String>,
    },
    /// List recent data-sync runs
    SyncLogs {
        /// Filter by data source
        #[arg(long)]
        source: Option<String>,
        /// Maximum number of runs to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// List all configuration entries
    List,
    /// Print the value of one key
    Get { key: String },
    /// Set the value of an editable key
    Set { key: String, value: String },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    // Initialize logging
    let _log_guard = trialscope_core::logging::init(&config.logging)
        .context("failed to initialize logging")?;

    // Open database
    let db_path = args
        .database
        .clone()
        .unwrap_or_else(|| config.database_path());
    tracing::info!(path = %db_path.display(), "Opening database");

    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    match args.command {
        Command::Migrate => {
            // Migrations already ran on open
            println!("Database ready: {}", db_path.display());
        }
        Command::Config { command } => run_config(&db, command)?,
        Command::CleanupSessions => {
            let service = Service::new(db).context("failed to load runtime settings")?;
            let removed = service
                .cleanup_expired_sessions()
                .context("failed to clean up sessions")?;
            println!("Removed {} expired session(s)", removed);
        }
        Command::Stats => run_stats(&db)?,
        Command::Feedback { status } => run_feedback(&db, status)?,
        Command::SyncLogs { source, limit } => {
            for run in db
                .list_sync_logs(source.as_deref(), limit)
                .context("failed to list sync runs")?
            {
                let status = run
                    .status
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "#{} {} [{}] total={} new={} updated={} errors={}",
                    run.id,
                    run.data_source,
                    status,
                    run.total_records.unwrap_or(0),
                    run.new_records.unwrap_or(0),
                    run.updated_records.unwrap_or(0),
                    run.error_records.unwrap_or(0),
                );
            }
        }
    }

    Ok(())
}

fn run_config(db: &Database, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::List => {
            for entry in db.list_config().context("failed to list config")? {
                let value = entry.config_value.unwrap_or_else(|| "-".to_string());
                let lock = if entry.is_editable { "" } else { " (read-only)" };
                println!("{} = {}{}", entry.config_key, value, lock);
            }
        }
        ConfigCommand::Get { key } => {
            let entry = db
                .get_config(&key)
                .context("failed to read config")?
                .with_context(|| format!("no such config key: {}", key))?;
            println!("{}", entry.config_value.unwrap_or_default());
        }
        ConfigCommand::Set { key, value } => {
            db.set_config(&key, &value)
                .with_context(|| format!("failed to set {}", key))?;
            println!("{} = {}", key, value);
        }
    }
    Ok(())
}

fn run_stats(db: &Database) -> Result<()> {
    let tables = [
        ("studies", "studies"),
        ("interventions", "interventions"),
        ("conditions", "conditions"),
        ("results", "results"),
        ("publications", "publications"),
        ("users", "users"),
        ("active sessions", "user_sessions"),
        ("feedback", "user_feedback"),
    ];
    let conn = db.connection();
    for (label, table) in tables {
        let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| {
            r.get(0)
        })?;
        println!("{:16} {}", label, count);
    }
    Ok(())
}

fn run_feedback(db: &Database, status: Option<String>) -> Result<()> {
    let status = match status.as_deref() {
        Some(s) => Some(
            s.parse::<FeedbackStatus>()
                .map_err(|e| anyhow::anyhow!(e))
                .context("invalid status filter")?,
        ),
        None => None,
    };
    let page = db
        .list_feedback(status, PageRequest::new(1, 100))
        .context("failed to list feedback")?;
    println!("{} record(s)", page.total);
    for feedback in page.items {
        println!(
            "{} [{}] {} - {}",
            feedback.created_at.format("%Y-%m-%d"),
            feedback.status.as_str(),
            feedback.feedback_type.as_str(),
            feedback.feedback_text,
        );
    }
    Ok(())
}
