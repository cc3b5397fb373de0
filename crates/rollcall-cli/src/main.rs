use anyhow::{Context, Result};
use chrono::{DateTime, NaiveTime, Utc};
use clap::{Parser, Subcommand};
use rollcall_core::{
    AttendanceStatus, Enrollment, FeatureVector, Identity, IdentityId, RecordId, Session,
    SessionCatalog, SessionId,
};
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod timetable;

use config::Config;
use engine::EngineHandle;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-matched attendance from the command line")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll (or re-enroll) an identity from a feature vector file
    Enroll {
        #[arg(long)]
        id: i64,
        /// Display name
        #[arg(long)]
        name: Option<String>,
        /// Roll number or employee code
        #[arg(long)]
        code: Option<String>,
        /// JSON array of numbers, or "-" for stdin
        vector: PathBuf,
    },
    /// Resolve a probe vector to an enrolled identity
    Identify { vector: PathBuf },
    /// Check a probe vector against one enrolled identity
    Verify {
        #[arg(long)]
        id: i64,
        vector: PathBuf,
    },
    /// Identify a probe and record attendance
    Mark {
        /// Record against this session instead of the one running now
        #[arg(long)]
        session: Option<i64>,
        /// Capture instant (RFC 3339); defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
        vector: PathBuf,
    },
    /// Manage the session timetable
    Sessions {
        #[command(subcommand)]
        action: SessionsCommand,
    },
    /// Attendance history of one identity, newest first
    History {
        #[arg(long)]
        id: i64,
    },
    /// Show the record for one identity and session on one day, if any
    Lookup {
        #[arg(long)]
        id: i64,
        /// Omit for the no-session bucket
        #[arg(long)]
        session: Option<i64>,
        /// Any instant on the wanted day (RFC 3339); defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Change the status of one attendance record
    Correct {
        #[arg(long)]
        record: i64,
        #[arg(long)]
        status: AttendanceStatus,
    },
    /// Mark a list of identities for one session
    Roster {
        #[arg(long)]
        session: i64,
        #[arg(long, default_value = "present")]
        status: AttendanceStatus,
        #[arg(long)]
        at: Option<DateTime<Utc>>,
        #[arg(required = true)]
        ids: Vec<i64>,
    },
    /// Show database and cache status
    Status,
}

#[derive(Subcommand)]
enum SessionsCommand {
    /// List all sessions ordered by start time
    List,
    /// Add or replace one session
    Add {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        name: String,
        #[arg(long)]
        code: Option<String>,
        #[arg(long)]
        department: Option<String>,
        /// Window start, HH:MM[:SS]
        #[arg(long)]
        start: NaiveTime,
        /// Window end, HH:MM[:SS]
        #[arg(long)]
        end: NaiveTime,
    },
    /// Load every session from a TOML timetable
    Import { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    tracing::debug!(db = %config.db_path.display(), "configuration loaded");

    let engine = EngineHandle::open(&config)
        .with_context(|| format!("opening {}", config.db_path.display()))?;

    match cli.command {
        Commands::Enroll {
            id,
            name,
            code,
            vector,
        } => {
            let vector = read_vector(&vector)?;
            let identity = Identity {
                id: IdentityId(id),
                name,
                code,
            };
            let enrollment = Enrollment::new(identity.clone(), vector);
            engine.run(move |s| s.enroll(enrollment)).await?;
            print_json(&serde_json::json!({ "enrolled": identity }))?;
        }
        Commands::Identify { vector } => {
            let probe = read_vector(&vector)?;
            let result = engine.run(move |s| s.identify(Some(&probe))).await?;
            print_json(&result)?;
        }
        Commands::Verify { id, vector } => {
            let probe = read_vector(&vector)?;
            let verification = engine
                .run(move |s| s.verify(IdentityId(id), &probe))
                .await?;
            print_json(&verification)?;
        }
        Commands::Mark {
            session,
            at,
            vector,
        } => {
            let probe = read_vector(&vector)?;
            let instant = at.unwrap_or_else(Utc::now);
            let outcome = engine
                .run(move |s| match session {
                    Some(id) => s.identify_and_mark_for(Some(&probe), SessionId(id), instant),
                    None => s.identify_and_mark(Some(&probe), instant),
                })
                .await?;
            print_json(&outcome)?;
        }
        Commands::Sessions { action } => run_sessions(&engine, action).await?,
        Commands::History { id } => {
            let records = engine
                .run(move |s| s.ledger().records_for_identity(IdentityId(id)))
                .await?;
            print_json(&records)?;
        }
        Commands::Lookup { id, session, at } => {
            let instant = at.unwrap_or_else(Utc::now);
            let record = engine
                .run(move |s| {
                    s.ledger()
                        .lookup(IdentityId(id), session.map(SessionId), instant)
                })
                .await?;
            print_json(&record)?;
        }
        Commands::Correct { record, status } => {
            let corrected = engine
                .run(move |s| s.ledger().correct(RecordId(record), status))
                .await?;
            print_json(&corrected)?;
        }
        Commands::Roster {
            session,
            status,
            at,
            ids,
        } => {
            let instant = at.unwrap_or_else(Utc::now);
            let summary = engine
                .run(move |s| {
                    let session = SessionId(session);
                    s.catalog()
                        .session(session)?
                        .ok_or(rollcall_core::Error::SessionNotFound(session))?;
                    let ids: Vec<IdentityId> = ids.into_iter().map(IdentityId).collect();
                    s.ledger().mark_roster(session, &ids, status, instant)
                })
                .await?;
            print_json(&summary)?;
        }
        Commands::Status => {
            let db_path = config.db_path.clone();
            let status = engine
                .run(move |s| {
                    let snapshot = s.refresh()?;
                    let sessions = s.catalog().sessions()?;
                    Ok(serde_json::json!({
                        "version": env!("CARGO_PKG_VERSION"),
                        "database": db_path,
                        "enrolled": snapshot.len(),
                        "sessions": sessions.len(),
                        "dimension": s.config().dimension,
                        "tolerance": s.config().tolerance,
                    }))
                })
                .await?;
            print_json(&status)?;
        }
    }

    Ok(())
}

async fn run_sessions(engine: &EngineHandle, action: SessionsCommand) -> Result<()> {
    match action {
        SessionsCommand::List => {
            let sessions = engine.run(|s| s.catalog().sessions()).await?;
            print_json(&sessions)?;
        }
        SessionsCommand::Add {
            id,
            name,
            code,
            department,
            start,
            end,
        } => {
            let session = Session {
                id: SessionId(id),
                name,
                code,
                department,
                start,
                end,
            };
            session.validate()?;
            let saved = session.clone();
            engine.run(move |s| s.catalog().put_session(&session)).await?;
            print_json(&saved)?;
        }
        SessionsCommand::Import { file } => {
            let sessions = timetable::load(&file)
                .with_context(|| format!("reading timetable {}", file.display()))?;
            let count = sessions.len();
            engine
                .run(move |s| {
                    for session in &sessions {
                        s.catalog().put_session(session)?;
                    }
                    Ok(())
                })
                .await?;
            tracing::info!(count, file = %file.display(), "timetable imported");
            print_json(&serde_json::json!({ "imported": count }))?;
        }
    }
    Ok(())
}

/// Read a feature vector (JSON number array) from a file or stdin.
fn read_vector(path: &Path) -> Result<FeatureVector> {
    let src = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading feature vector from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("reading feature vector {}", path.display()))?
    };
    parse_vector(&src).with_context(|| format!("parsing feature vector {}", path.display()))
}

fn parse_vector(src: &str) -> Result<FeatureVector> {
    Ok(serde_json::from_str(src.trim())?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
