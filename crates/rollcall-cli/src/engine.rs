use std::sync::Arc;
use std::time::Duration;

use rollcall_core::RecognitionService;
use rollcall_store::SqliteStore;
use thiserror::Error;

use crate::config::Config;

pub type Service = RecognitionService<Arc<SqliteStore>, Arc<SqliteStore>, Arc<SqliteStore>>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] rollcall_core::Error),
    #[error("store error: {0}")]
    Store(#[from] rollcall_store::StoreError),
    #[error("engine task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Clone-safe handle to the recognition service.
///
/// Store access is blocking, so every call runs on tokio's blocking pool and
/// is abandoned after the configured timeout. An abandoned call either
/// finished its single write or never started it.
#[derive(Clone)]
pub struct EngineHandle {
    service: Arc<Service>,
    timeout: Duration,
}

impl EngineHandle {
    /// Open the database and build the service around it.
    pub fn open(config: &Config) -> Result<Self, EngineError> {
        let store = Arc::new(SqliteStore::open(&config.db_path, config.store_timeout())?);
        Ok(Self::new(store, config))
    }

    pub fn new(store: Arc<SqliteStore>, config: &Config) -> Self {
        let service = RecognitionService::new(
            Arc::clone(&store),
            Arc::clone(&store),
            store,
            config.engine(),
        );
        Self {
            service: Arc::new(service),
            timeout: config.command_timeout(),
        }
    }

    /// Run `op` against the service on the blocking pool, bounded by the
    /// command timeout. Expiry is reported as `StoreUnavailable`.
    pub async fn run<T, F>(&self, op: F) -> Result<T, EngineError>
    where
        F: FnOnce(&Service) -> Result<T, rollcall_core::Error> + Send + 'static,
        T: Send + 'static,
    {
        let service = Arc::clone(&self.service);
        let task = tokio::task::spawn_blocking(move || op(service.as_ref()));
        match tokio::time::timeout(self.timeout, task).await {
            Ok(joined) => Ok(joined??),
            Err(_) => {
                tracing::warn!(timeout_ms = self.timeout.as_millis() as u64, "store operation timed out");
                Err(rollcall_core::Error::StoreUnavailable(format!(
                    "no answer within {} ms",
                    self.timeout.as_millis()
                ))
                .into())
            }
        }
    }
}
