//! At-most-one attendance record per identity, session bucket and day.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::Serialize;

use crate::error::Error;
use crate::schedule::SessionResolver;
use crate::store::{AttendanceStore, Recorded};
use crate::types::{
    AttendanceKey, AttendanceRecord, AttendanceStatus, IdentityId, NewRecord, RecordId, SessionId,
};

/// Counts from a roster marking pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RosterSummary {
    pub created: usize,
    /// Existing records whose status was changed.
    pub updated: usize,
    /// Existing records that already carried the requested status.
    pub unchanged: usize,
}

/// Deduplicating front of an [`AttendanceStore`].
#[derive(Debug)]
pub struct AttendanceLedger<A> {
    store: A,
    clock: SessionResolver,
}

impl<A: AttendanceStore> AttendanceLedger<A> {
    /// `offset` decides which calendar day an instant falls on.
    pub fn new(store: A, offset: FixedOffset) -> Self {
        Self {
            store,
            clock: SessionResolver::new(offset),
        }
    }

    pub fn store(&self) -> &A {
        &self.store
    }

    pub fn day_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        self.clock.day_of(instant)
    }

    /// Record attendance, or return the record already written for the same
    /// identity, session bucket and day.
    ///
    /// A repeat submission is not an error: it comes back as
    /// [`Recorded::AlreadyExists`] with the stored record unmodified.
    pub fn record(
        &self,
        identity: IdentityId,
        session: Option<SessionId>,
        instant: DateTime<Utc>,
        status: AttendanceStatus,
    ) -> Result<Recorded, Error> {
        let key = AttendanceKey {
            identity,
            session,
            day: self.day_of(instant),
        };
        let recorded = self.store.insert_if_absent(NewRecord {
            key,
            timestamp: instant,
            status,
        })?;

        let record = recorded.record();
        if recorded.is_created() {
            tracing::info!(
                record = %record.id,
                identity = %identity,
                session = ?session.map(|s| s.0),
                day = %key.day,
                %status,
                "attendance recorded"
            );
        } else {
            tracing::debug!(
                record = %record.id,
                identity = %identity,
                session = ?session.map(|s| s.0),
                day = %key.day,
                "attendance already recorded"
            );
        }
        Ok(recorded)
    }

    /// Explicit status correction of one record.
    pub fn correct(&self, id: RecordId, status: AttendanceStatus) -> Result<AttendanceRecord, Error> {
        let record = self
            .store
            .set_status(id, status)?
            .ok_or(Error::RecordNotFound(id))?;
        tracing::info!(record = %id, %status, "attendance status corrected");
        Ok(record)
    }

    /// Mark a list of identities for one session on the day of `instant`.
    ///
    /// Missing records are created with `status`; existing ones have their
    /// status set to `status`.
    pub fn mark_roster(
        &self,
        session: SessionId,
        identities: &[IdentityId],
        status: AttendanceStatus,
        instant: DateTime<Utc>,
    ) -> Result<RosterSummary, Error> {
        let mut summary = RosterSummary::default();
        for &identity in identities {
            match self.record(identity, Some(session), instant, status)? {
                Recorded::Created(_) => summary.created += 1,
                Recorded::AlreadyExists(existing) if existing.status == status => {
                    summary.unchanged += 1
                }
                Recorded::AlreadyExists(existing) => {
                    self.correct(existing.id, status)?;
                    summary.updated += 1;
                }
            }
        }
        tracing::info!(
            session = %session,
            created = summary.created,
            updated = summary.updated,
            unchanged = summary.unchanged,
            "roster marked"
        );
        Ok(summary)
    }

    /// The record for one identity and session bucket on the day of
    /// `instant`, if any. Read-only; never creates.
    pub fn lookup(
        &self,
        identity: IdentityId,
        session: Option<SessionId>,
        instant: DateTime<Utc>,
    ) -> Result<Option<AttendanceRecord>, Error> {
        self.store.find(&AttendanceKey {
            identity,
            session,
            day: self.day_of(instant),
        })
    }

    pub fn records_for_identity(&self, identity: IdentityId) -> Result<Vec<AttendanceRecord>, Error> {
        self.store.for_identity(identity)
    }

    pub fn records_for_session_day(
        &self,
        session: Option<SessionId>,
        day: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>, Error> {
        self.store.for_session_day(session, day)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::utc;
    use crate::store::MemoryAttendanceStore;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn ledger() -> AttendanceLedger<MemoryAttendanceStore> {
        AttendanceLedger::new(MemoryAttendanceStore::new(), utc())
    }

    fn at(day: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, day, h, m, 0).unwrap()
    }

    #[test]
    fn test_second_record_same_day_already_exists() {
        let ledger = ledger();
        let first = ledger
            .record(IdentityId(7), Some(SessionId(3)), at(2, 9, 5), AttendanceStatus::Present)
            .unwrap();
        let second = ledger
            .record(IdentityId(7), Some(SessionId(3)), at(2, 10, 40), AttendanceStatus::Late)
            .unwrap();

        let Recorded::Created(created) = first else {
            panic!("first call should create");
        };
        let Recorded::AlreadyExists(existing) = second else {
            panic!("second call should find the existing record");
        };
        assert_eq!(created.id, existing.id);
        // Existing record is returned unmodified.
        assert_eq!(existing.status, AttendanceStatus::Present);
        assert_eq!(existing.timestamp, at(2, 9, 5));
        assert_eq!(ledger.store().len(), 1);
    }

    #[test]
    fn test_next_day_creates_new_record() {
        let ledger = ledger();
        let monday = ledger
            .record(IdentityId(7), Some(SessionId(3)), at(2, 9, 0), AttendanceStatus::Present)
            .unwrap();
        let tuesday = ledger
            .record(IdentityId(7), Some(SessionId(3)), at(3, 9, 0), AttendanceStatus::Present)
            .unwrap();
        assert!(monday.is_created());
        assert!(tuesday.is_created());
        assert_ne!(monday.record().id, tuesday.record().id);
    }

    #[test]
    fn test_no_session_bucket_once_per_day() {
        let ledger = ledger();
        assert!(ledger
            .record(IdentityId(1), None, at(2, 7, 0), AttendanceStatus::Present)
            .unwrap()
            .is_created());
        assert!(!ledger
            .record(IdentityId(1), None, at(2, 18, 0), AttendanceStatus::Present)
            .unwrap()
            .is_created());
        assert!(ledger
            .record(IdentityId(1), Some(SessionId(1)), at(2, 9, 0), AttendanceStatus::Present)
            .unwrap()
            .is_created());
    }

    #[test]
    fn test_concurrent_record_creates_exactly_once() {
        const CALLERS: usize = 16;
        let ledger = Arc::new(ledger());
        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || {
                    ledger
                        .record(IdentityId(7), Some(SessionId(3)), at(2, 9, 0), AttendanceStatus::Present)
                        .unwrap()
                })
            })
            .collect();

        let outcomes: Vec<Recorded> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let created = outcomes.iter().filter(|o| o.is_created()).count();
        assert_eq!(created, 1);
        assert_eq!(outcomes.len() - created, CALLERS - 1);
        let id = outcomes[0].record().id;
        assert!(outcomes.iter().all(|o| o.record().id == id));
        assert_eq!(ledger.store().len(), 1);
    }

    #[test]
    fn test_correct_changes_status() {
        let ledger = ledger();
        let record = ledger
            .record(IdentityId(2), Some(SessionId(1)), at(2, 9, 0), AttendanceStatus::Present)
            .unwrap()
            .into_record();
        let corrected = ledger.correct(record.id, AttendanceStatus::Late).unwrap();
        assert_eq!(corrected.status, AttendanceStatus::Late);
        assert!(matches!(
            ledger.correct(RecordId(404), AttendanceStatus::Absent),
            Err(Error::RecordNotFound(RecordId(404)))
        ));
    }

    #[test]
    fn test_mark_roster_counts() {
        let ledger = ledger();
        ledger
            .record(IdentityId(1), Some(SessionId(4)), at(2, 9, 0), AttendanceStatus::Present)
            .unwrap();
        ledger
            .record(IdentityId(2), Some(SessionId(4)), at(2, 9, 0), AttendanceStatus::Absent)
            .unwrap();

        let summary = ledger
            .mark_roster(
                SessionId(4),
                &[IdentityId(1), IdentityId(2), IdentityId(3)],
                AttendanceStatus::Absent,
                at(2, 11, 0),
            )
            .unwrap();
        assert_eq!(
            summary,
            RosterSummary {
                created: 1,
                updated: 1,
                unchanged: 1
            }
        );

        let day = ledger.day_of(at(2, 0, 0));
        let records = ledger.records_for_session_day(Some(SessionId(4)), day).unwrap();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.status == AttendanceStatus::Absent));
    }

    #[test]
    fn test_lookup_is_read_only() {
        let ledger = ledger();
        assert!(ledger
            .lookup(IdentityId(6), Some(SessionId(2)), at(2, 9, 0))
            .unwrap()
            .is_none());
        assert_eq!(ledger.store().len(), 0);

        let created = ledger
            .record(IdentityId(6), Some(SessionId(2)), at(2, 9, 0), AttendanceStatus::Late)
            .unwrap()
            .into_record();
        let found = ledger
            .lookup(IdentityId(6), Some(SessionId(2)), at(2, 17, 30))
            .unwrap();
        assert_eq!(found, Some(created));
        assert!(ledger.lookup(IdentityId(6), None, at(2, 9, 0)).unwrap().is_none());
        assert!(ledger
            .lookup(IdentityId(6), Some(SessionId(2)), at(3, 9, 0))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_history_newest_first() {
        let ledger = ledger();
        for day in [2, 4, 3] {
            ledger
                .record(IdentityId(5), Some(SessionId(1)), at(day, 9, 0), AttendanceStatus::Present)
                .unwrap();
        }
        let days: Vec<u32> = ledger
            .records_for_identity(IdentityId(5))
            .unwrap()
            .iter()
            .map(|r| chrono::Datelike::day(&r.day))
            .collect();
        assert_eq!(days, vec![4, 3, 2]);
    }
}
