//! rollcall-core — Identity resolution and attendance deduplication.
//!
//! Matches face feature vectors (produced by an external extraction model)
//! against an in-memory cache of enrolled identities, picks the class session
//! running at the capture instant, and records attendance at most once per
//! identity, session and day.

pub mod cache;
pub mod config;
pub mod error;
pub mod ledger;
pub mod matcher;
pub mod schedule;
pub mod service;
pub mod store;
pub mod types;

pub use cache::{EncodingCache, Snapshot};
pub use config::{EngineConfig, RetryPolicy};
pub use error::Error;
pub use ledger::{AttendanceLedger, RosterSummary};
pub use matcher::{EuclideanMatcher, MatchResult, Matcher};
pub use schedule::SessionResolver;
pub use service::{AttendanceOutcome, RecognitionService, Verification};
pub use store::{AttendanceStore, FeatureStore, Recorded, SessionCatalog};
pub use types::{
    AttendanceKey, AttendanceRecord, AttendanceStatus, Enrollment, FeatureVector, Identity,
    IdentityId, NewRecord, RecordId, Session, SessionId,
};
