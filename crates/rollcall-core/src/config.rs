use chrono::{FixedOffset, Offset, Utc};
use std::time::Duration;

/// Feature length produced by the deployed extraction model.
pub const DEFAULT_DIMENSION: usize = 128;
/// Maximum Euclidean distance for two vectors to count as the same face.
pub const DEFAULT_TOLERANCE: f32 = 0.5;

/// Engine tuning shared by the cache, matcher, resolver and ledger.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Fixed feature vector length; vectors of any other length are rejected.
    pub dimension: usize,
    /// Match threshold on Euclidean distance (inclusive).
    pub tolerance: f32,
    /// Deployment timezone. Used for both session time-of-day and the
    /// calendar day that scopes attendance dedup.
    pub utc_offset: FixedOffset,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_DIMENSION,
            tolerance: DEFAULT_TOLERANCE,
            utc_offset: utc(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Retry with exponential backoff for `StoreUnavailable` failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero behaves like one.
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Single attempt, no sleeping.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based): base, 2×base, 4×base, ...
    pub fn delay(&self, retry: u32) -> Duration {
        let shift = retry.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << shift)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(50),
        }
    }
}

/// UTC as a `FixedOffset`.
pub fn utc() -> FixedOffset {
    Utc.fix()
}
