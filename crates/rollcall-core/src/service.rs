//! The two operations callers use: identify a probe, and identify-and-mark.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::cache::{EncodingCache, Snapshot};
use crate::config::EngineConfig;
use crate::error::Error;
use crate::ledger::AttendanceLedger;
use crate::matcher::{EuclideanMatcher, MatchResult, Matcher};
use crate::schedule::SessionResolver;
use crate::store::{AttendanceStore, FeatureStore, Recorded, SessionCatalog};
use crate::types::{
    AttendanceRecord, AttendanceStatus, Enrollment, FeatureVector, Identity, IdentityId, Session,
    SessionId,
};

/// What happened to one identify-and-mark request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttendanceOutcome {
    /// The probe carried no usable vector.
    NoFaceDetected,
    /// A vector was supplied but nobody is enrolled within tolerance.
    UnknownIdentity,
    /// Identified, but no session was running; recorded in the no-session
    /// bucket for the day.
    NoActiveSession {
        identity: Identity,
        record: AttendanceRecord,
        created: bool,
    },
    AlreadyMarked {
        identity: Identity,
        session: Session,
        record: AttendanceRecord,
    },
    Marked {
        identity: Identity,
        session: Session,
        record: AttendanceRecord,
    },
}

/// Result of a 1:1 check of a probe against one enrolled identity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Verification {
    pub identity: IdentityId,
    pub matched: bool,
    pub distance: f32,
}

/// Orchestrates cache, matcher, resolver and ledger.
pub struct RecognitionService<F, C, A> {
    features: F,
    catalog: C,
    ledger: AttendanceLedger<A>,
    cache: EncodingCache,
    resolver: SessionResolver,
    matcher: EuclideanMatcher,
    config: EngineConfig,
}

impl<F, C, A> RecognitionService<F, C, A>
where
    F: FeatureStore,
    C: SessionCatalog,
    A: AttendanceStore,
{
    pub fn new(features: F, catalog: C, attendance: A, config: EngineConfig) -> Self {
        Self {
            features,
            catalog,
            ledger: AttendanceLedger::new(attendance, config.utc_offset),
            cache: EncodingCache::new(config.dimension),
            resolver: SessionResolver::new(config.utc_offset),
            matcher: EuclideanMatcher,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &AttendanceLedger<A> {
        &self.ledger
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn cache(&self) -> &EncodingCache {
        &self.cache
    }

    /// Force a full reload of the encoding cache.
    pub fn refresh(&self) -> Result<Arc<Snapshot>, Error> {
        self.with_retry("cache load", || self.cache.load(&self.features))
    }

    /// Mark the cache stale after out-of-band store changes.
    pub fn invalidate(&self) {
        self.cache.invalidate();
    }

    /// Resolve a probe vector to an enrolled identity.
    pub fn identify(&self, probe: Option<&FeatureVector>) -> Result<MatchResult, Error> {
        let Some(probe) = probe.filter(|p| !p.is_empty()) else {
            return Ok(MatchResult::NoMatch);
        };
        probe.check_dimension(self.config.dimension)?;

        let snapshot = self.with_retry("cache snapshot", || self.cache.get_snapshot(&self.features))?;
        Ok(self
            .matcher
            .compare(Some(probe), &snapshot, self.config.tolerance))
    }

    /// Identify the probe, find the session running at `instant`, and record
    /// attendance as present.
    pub fn identify_and_mark(
        &self,
        probe: Option<&FeatureVector>,
        instant: DateTime<Utc>,
    ) -> Result<AttendanceOutcome, Error> {
        let identity = match self.identify_probe(probe)? {
            Ok(identity) => identity,
            Err(miss) => return Ok(miss),
        };

        let sessions = self.with_retry("session catalog", || self.catalog.sessions())?;
        let session = self.resolver.resolve(&sessions, instant).cloned();
        self.mark(identity, session, instant)
    }

    /// Like [`identify_and_mark`](Self::identify_and_mark), but against a
    /// session chosen by the caller instead of the timetable.
    pub fn identify_and_mark_for(
        &self,
        probe: Option<&FeatureVector>,
        session: SessionId,
        instant: DateTime<Utc>,
    ) -> Result<AttendanceOutcome, Error> {
        let session = self
            .with_retry("session catalog", || self.catalog.session(session))?
            .ok_or(Error::SessionNotFound(session))?;
        let identity = match self.identify_probe(probe)? {
            Ok(identity) => identity,
            Err(miss) => return Ok(miss),
        };
        self.mark(identity, Some(session), instant)
    }

    /// Persist an identity's vector and make it matchable immediately.
    ///
    /// Re-enrolling an existing identity replaces its vector.
    pub fn enroll(&self, enrollment: Enrollment) -> Result<(), Error> {
        if enrollment.vector.is_empty() {
            return Err(Error::NoFaceDetected);
        }
        enrollment.vector.check_dimension(self.config.dimension)?;

        self.with_retry("feature store write", || self.features.put(&enrollment))?;
        let id = enrollment.id();
        self.cache.upsert(enrollment)?;
        tracing::info!(identity = %id, "identity enrolled");
        Ok(())
    }

    /// Compare a probe against one enrolled identity only.
    pub fn verify(&self, identity: IdentityId, probe: &FeatureVector) -> Result<Verification, Error> {
        if probe.is_empty() {
            return Err(Error::NoFaceDetected);
        }
        probe.check_dimension(self.config.dimension)?;

        let snapshot = self.with_retry("cache snapshot", || self.cache.get_snapshot(&self.features))?;
        let enrolled = match snapshot.get(identity) {
            Some(e) => e.vector.clone(),
            None => self
                .with_retry("feature store read", || self.features.get_one(identity))?
                .map(|e| e.vector)
                .ok_or(Error::IdentityNotEnrolled(identity))?,
        };
        enrolled.check_dimension(self.config.dimension)?;

        let distance = probe.euclidean_distance(&enrolled);
        let matched = distance <= self.config.tolerance;
        tracing::debug!(identity = %identity, distance, matched, "verify");
        Ok(Verification {
            identity,
            matched,
            distance,
        })
    }

    /// `Ok(Err(outcome))` is a miss the caller reports as-is.
    fn identify_probe(
        &self,
        probe: Option<&FeatureVector>,
    ) -> Result<Result<Identity, AttendanceOutcome>, Error> {
        if probe.map_or(true, FeatureVector::is_empty) {
            return Ok(Err(AttendanceOutcome::NoFaceDetected));
        }
        Ok(match self.identify(probe)? {
            MatchResult::Matched { identity, .. } => Ok(identity),
            MatchResult::NoMatch => Err(AttendanceOutcome::UnknownIdentity),
        })
    }

    fn mark(
        &self,
        identity: Identity,
        session: Option<Session>,
        instant: DateTime<Utc>,
    ) -> Result<AttendanceOutcome, Error> {
        let session_id = session.as_ref().map(|s| s.id);
        let recorded = self.with_retry("attendance write", || {
            self.ledger
                .record(identity.id, session_id, instant, AttendanceStatus::Present)
        })?;

        Ok(match (session, recorded) {
            (None, recorded) => {
                let created = recorded.is_created();
                AttendanceOutcome::NoActiveSession {
                    identity,
                    record: recorded.into_record(),
                    created,
                }
            }
            (Some(session), Recorded::Created(record)) => AttendanceOutcome::Marked {
                identity,
                session,
                record,
            },
            (Some(session), Recorded::AlreadyExists(record)) => AttendanceOutcome::AlreadyMarked {
                identity,
                session,
                record,
            },
        })
    }

    /// Retry `op` with backoff while it fails with a retryable error.
    fn with_retry<T>(&self, what: &str, mut op: impl FnMut() -> Result<T, Error>) -> Result<T, Error> {
        let policy = self.config.retry;
        let attempts = policy.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Err(err) if err.is_retryable() && attempt < attempts => {
                    let delay = policy.delay(attempt);
                    tracing::warn!(
                        operation = what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}
