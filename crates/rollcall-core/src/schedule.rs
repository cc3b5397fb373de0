//! Picks the session a capture instant belongs to.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};

use crate::types::Session;

/// Maps instants onto the deployment's local clock and timetable.
#[derive(Debug, Clone, Copy)]
pub struct SessionResolver {
    offset: FixedOffset,
}

impl SessionResolver {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Local time of day of `instant`.
    pub fn time_of_day(&self, instant: DateTime<Utc>) -> NaiveTime {
        instant.with_timezone(&self.offset).time()
    }

    /// Local calendar day of `instant`.
    pub fn day_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset).date_naive()
    }

    /// The session whose window contains `instant`, if any.
    ///
    /// Overlaps resolve to the earliest start, then the lowest session id.
    pub fn resolve<'a>(&self, catalog: &'a [Session], instant: DateTime<Utc>) -> Option<&'a Session> {
        let time = self.time_of_day(instant);
        let chosen = catalog
            .iter()
            .filter(|s| s.is_active_at(time))
            .min_by_key(|s| (s.start, s.id));

        match chosen {
            Some(s) => tracing::debug!(session = %s.id, %time, "active session resolved"),
            None => tracing::debug!(%time, sessions = catalog.len(), "no active session"),
        }
        chosen
    }
}
