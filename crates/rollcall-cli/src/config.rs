use chrono::FixedOffset;
use rollcall_core::config::{utc, DEFAULT_DIMENSION, DEFAULT_TOLERANCE};
use rollcall_core::{EngineConfig, RetryPolicy};
use std::path::PathBuf;
use std::time::Duration;

/// CLI configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Feature vector length produced by the extraction model.
    pub dimension: usize,
    /// Euclidean distance threshold for a positive match.
    pub tolerance: f32,
    /// Deployment timezone as minutes east of UTC.
    pub utc_offset_minutes: i32,
    /// SQLite busy timeout for one store call, in milliseconds.
    pub store_timeout_ms: u64,
    /// Bound on a whole command. Derived from the store timeout and retry
    /// policy when unset.
    pub command_timeout_ms: Option<u64>,
    /// Attempts per store operation before giving up.
    pub retry_attempts: u32,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = lookup("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let db_path = lookup("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("rollcall.db"));

        Self {
            db_path,
            dimension: parsed(&lookup, "ROLLCALL_DIMENSION", DEFAULT_DIMENSION),
            tolerance: parsed(&lookup, "ROLLCALL_TOLERANCE", DEFAULT_TOLERANCE),
            utc_offset_minutes: parsed(&lookup, "ROLLCALL_UTC_OFFSET_MINUTES", 0),
            store_timeout_ms: parsed(&lookup, "ROLLCALL_STORE_TIMEOUT_MS", 5000),
            command_timeout_ms: lookup("ROLLCALL_COMMAND_TIMEOUT_MS")
                .and_then(|v| v.trim().parse().ok()),
            retry_attempts: parsed(&lookup, "ROLLCALL_RETRY_ATTEMPTS", 3),
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Long enough for every retry of a busy store call plus its backoff.
    pub fn command_timeout(&self) -> Duration {
        if let Some(ms) = self.command_timeout_ms {
            return Duration::from_millis(ms);
        }
        let retry = self.retry();
        let attempts = retry.attempts.max(1);
        let backoff: Duration = (1..attempts).map(|r| retry.delay(r)).sum();
        self.store_timeout().saturating_mul(attempts) + backoff
    }

    /// Deployment offset; out-of-range values fall back to UTC.
    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60)).unwrap_or_else(|| {
            tracing::warn!(
                minutes = self.utc_offset_minutes,
                "ROLLCALL_UTC_OFFSET_MINUTES out of range; using UTC"
            );
            utc()
        })
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            dimension: self.dimension,
            tolerance: self.tolerance,
            utc_offset: self.utc_offset(),
            retry: self.retry(),
        }
    }

    fn retry(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry_attempts,
            ..RetryPolicy::default()
        }
    }
}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
