//! Probe-to-gallery matching.

use serde::Serialize;
use std::cmp::Ordering;

use crate::cache::Snapshot;
use crate::types::{FeatureVector, Identity};

/// Result of matching a probe vector against a cache snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum MatchResult {
    Matched {
        identity: Identity,
        /// Euclidean distance of the winning candidate.
        distance: f32,
    },
    NoMatch,
}

impl MatchResult {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Self::Matched { identity, .. } => Some(identity),
            Self::NoMatch => None,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, Self::Matched { .. })
    }
}

/// Strategy for comparing a probe vector against a snapshot of enrolled faces.
pub trait Matcher {
    fn compare(
        &self,
        probe: Option<&FeatureVector>,
        snapshot: &Snapshot,
        tolerance: f32,
    ) -> MatchResult;
}

/// Nearest-neighbour matcher on Euclidean distance.
///
/// Every entry within `tolerance` (inclusive) is a candidate; the candidate
/// with the smallest distance wins, and equal distances go to the lowest
/// identity id. Snapshot order therefore never affects the answer.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(
        &self,
        probe: Option<&FeatureVector>,
        snapshot: &Snapshot,
        tolerance: f32,
    ) -> MatchResult {
        let Some(probe) = probe.filter(|p| !p.is_empty()) else {
            return MatchResult::NoMatch;
        };

        let mut best: Option<(f32, &Identity)> = None;

        for entry in snapshot.entries() {
            if entry.vector.len() != probe.len() {
                continue;
            }
            let distance = probe.euclidean_distance(&entry.vector);
            if distance.is_nan() || distance > tolerance {
                continue;
            }
            let better = match best {
                None => true,
                Some((best_distance, best_identity)) => {
                    match distance.partial_cmp(&best_distance) {
                        Some(Ordering::Less) => true,
                        Some(Ordering::Equal) => entry.identity.id < best_identity.id,
                        _ => false,
                    }
                }
            };
            if better {
                best = Some((distance, &entry.identity));
            }
        }

        match best {
            Some((distance, identity)) => {
                tracing::debug!(identity = %identity.id, distance, "probe matched");
                MatchResult::Matched {
                    identity: identity.clone(),
                    distance,
                }
            }
            None => {
                tracing::debug!(gallery = snapshot.len(), "probe matched no identity");
                MatchResult::NoMatch
            }
        }
    }
}
