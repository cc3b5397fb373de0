use chrono::NaiveTime;
use thiserror::Error;

use crate::types::{IdentityId, RecordId, SessionId};

/// Faults raised by the engine.
///
/// Expected misses (no face, unknown identity, no active session, duplicate
/// submission) are not errors; they come back as ordinary outcome values.
#[derive(Error, Debug)]
pub enum Error {
    #[error("backing store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("feature vector has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("no face vector supplied")]
    NoFaceDetected,
    #[error("session {session}: start {start} is after end {end}")]
    InvalidSchedule {
        session: SessionId,
        start: NaiveTime,
        end: NaiveTime,
    },
    #[error("unknown attendance status: {0:?}")]
    InvalidStatus(String),
    #[error("attendance record {0} not found")]
    RecordNotFound(RecordId),
    #[error("session {0} not found")]
    SessionNotFound(SessionId),
    #[error("identity {0} has no enrolled feature vector")]
    IdentityNotEnrolled(IdentityId),
}

impl Error {
    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}
