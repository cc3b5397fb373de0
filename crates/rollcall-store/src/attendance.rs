use chrono::NaiveDate;
use rollcall_core::{
    AttendanceKey, AttendanceRecord, AttendanceStatus, AttendanceStore, Error, IdentityId,
    NewRecord, RecordId, Recorded, SessionId,
};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};

use crate::{SqliteStore, StoreError};

const SELECT_RECORD: &str =
    "SELECT id, identity_id, session_id, day, recorded_at, status FROM attendance";

/// `IS` so that a NULL parameter selects the no-session bucket.
const BY_KEY: &str = "WHERE identity_id = ?1 AND session_id IS ?2 AND day = ?3";

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    let status: String = row.get(5)?;
    let status: AttendanceStatus = status
        .parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;
    Ok(AttendanceRecord {
        id: RecordId(row.get(0)?),
        identity: IdentityId(row.get(1)?),
        session: row.get::<_, Option<i64>>(2)?.map(SessionId),
        day: row.get(3)?,
        timestamp: row.get(4)?,
        status,
    })
}

impl SqliteStore {
    /// Insert-or-fetch inside one immediate transaction. The unique index is
    /// what makes this safe across processes sharing the file.
    fn insert_or_fetch(&self, record: &NewRecord) -> Result<Recorded, StoreError> {
        let key = &record.key;
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let inserted = tx.execute(
            "INSERT INTO attendance (identity_id, session_id, day, recorded_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT DO NOTHING",
            params![
                key.identity.0,
                key.session.map(|s| s.0),
                key.day,
                record.timestamp,
                record.status.as_str(),
            ],
        )?;
        let stored = tx.query_row(
            &format!("{SELECT_RECORD} {BY_KEY}"),
            params![key.identity.0, key.session.map(|s| s.0), key.day],
            record_from_row,
        )?;
        tx.commit()?;

        Ok(if inserted == 1 {
            Recorded::Created(stored)
        } else {
            Recorded::AlreadyExists(stored)
        })
    }

    fn find_by_key(&self, key: &AttendanceKey) -> Result<Option<AttendanceRecord>, StoreError> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                &format!("{SELECT_RECORD} {BY_KEY}"),
                params![key.identity.0, key.session.map(|s| s.0), key.day],
                record_from_row,
            )
            .optional()?)
    }

    fn update_status(
        &self,
        id: RecordId,
        status: AttendanceStatus,
    ) -> Result<Option<AttendanceRecord>, StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE attendance SET status = ?2 WHERE id = ?1",
            params![id.0, status.as_str()],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        Ok(conn
            .query_row(
                &format!("{SELECT_RECORD} WHERE id = ?1"),
                params![id.0],
                record_from_row,
            )
            .optional()?)
    }

    fn query_records(
        &self,
        filter: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{SELECT_RECORD} {filter}"))?;
        let records = stmt
            .query_map(args, record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}

impl AttendanceStore for SqliteStore {
    fn insert_if_absent(&self, record: NewRecord) -> Result<Recorded, Error> {
        Ok(self.insert_or_fetch(&record)?)
    }

    fn find(&self, key: &AttendanceKey) -> Result<Option<AttendanceRecord>, Error> {
        Ok(self.find_by_key(key)?)
    }

    fn set_status(
        &self,
        id: RecordId,
        status: AttendanceStatus,
    ) -> Result<Option<AttendanceRecord>, Error> {
        Ok(self.update_status(id, status)?)
    }

    fn for_identity(&self, identity: IdentityId) -> Result<Vec<AttendanceRecord>, Error> {
        Ok(self.query_records(
            "WHERE identity_id = ?1 ORDER BY recorded_at DESC, id DESC",
            params![identity.0],
        )?)
    }

    fn for_session_day(
        &self,
        session: Option<SessionId>,
        day: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>, Error> {
        Ok(self.query_records(
            "WHERE session_id IS ?1 AND day = ?2 ORDER BY recorded_at, id",
            params![session.map(|s| s.0), day],
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SqliteStore;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::Arc;
    use std::time::Duration;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 9, 2).unwrap()
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 2, h, m, 0).unwrap()
    }

    fn new_record(identity: i64, session: Option<i64>, when: DateTime<Utc>) -> NewRecord {
        NewRecord {
            key: AttendanceKey {
                identity: IdentityId(identity),
                session: session.map(SessionId),
                day: day(),
            },
            timestamp: when,
            status: AttendanceStatus::Present,
        }
    }

    #[test]
    fn test_insert_then_already_exists() {
        let store = SqliteStore::open_in_memory().unwrap();
        let first = store.insert_if_absent(new_record(7, Some(3), at(9, 0))).unwrap();
        let second = store.insert_if_absent(new_record(7, Some(3), at(9, 45))).unwrap();

        assert!(first.is_created());
        let Recorded::AlreadyExists(existing) = second else {
            panic!("expected AlreadyExists");
        };
        assert_eq!(existing.id, first.record().id);
        assert_eq!(existing.timestamp, at(9, 0));
        assert_eq!(store.for_identity(IdentityId(7)).unwrap().len(), 1);
    }

    #[test]
    fn test_no_session_bucket_is_unique_per_day() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.insert_if_absent(new_record(1, None, at(7, 0))).unwrap().is_created());
        let again = store.insert_if_absent(new_record(1, None, at(19, 0))).unwrap();
        assert!(!again.is_created());
        assert_eq!(again.record().session, None);

        let key = new_record(1, None, at(7, 0)).key;
        assert_eq!(store.find(&key).unwrap().map(|r| r.id), Some(again.record().id));
        assert_eq!(store.for_session_day(None, day()).unwrap().len(), 1);
    }

    #[test]
    fn test_no_session_bucket_is_separate_from_every_session() {
        let store = SqliteStore::open_in_memory().unwrap();
        for session in [Some(-1), Some(0), Some(3)] {
            assert!(store
                .insert_if_absent(new_record(1, session, at(9, 0)))
                .unwrap()
                .is_created());
        }

        let unscheduled = store.insert_if_absent(new_record(1, None, at(9, 30))).unwrap();
        assert!(unscheduled.is_created());
        assert_eq!(unscheduled.record().session, None);
        assert_eq!(store.for_session_day(None, day()).unwrap().len(), 1);
        assert_eq!(
            store.for_session_day(Some(SessionId(-1)), day()).unwrap()[0].timestamp,
            at(9, 0)
        );
        assert_eq!(store.for_identity(IdentityId(1)).unwrap().len(), 4);
    }

    #[test]
    fn test_set_status() {
        let store = SqliteStore::open_in_memory().unwrap();
        let created = store
            .insert_if_absent(new_record(2, Some(1), at(9, 0)))
            .unwrap()
            .into_record();
        let updated = store
            .set_status(created.id, AttendanceStatus::Late)
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, AttendanceStatus::Late);
        assert!(store
            .set_status(RecordId(999), AttendanceStatus::Absent)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_history_ordering() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_if_absent(new_record(4, Some(1), at(9, 0))).unwrap();
        store.insert_if_absent(new_record(4, Some(2), at(13, 0))).unwrap();
        store.insert_if_absent(new_record(5, Some(1), at(9, 5))).unwrap();

        let history = store.for_identity(IdentityId(4)).unwrap();
        assert_eq!(
            history.iter().map(|r| r.session).collect::<Vec<_>>(),
            vec![Some(SessionId(2)), Some(SessionId(1))]
        );
        let session_day = store.for_session_day(Some(SessionId(1)), day()).unwrap();
        assert_eq!(
            session_day.iter().map(|r| r.identity.0).collect::<Vec<_>>(),
            vec![4, 5]
        );
    }

    #[test]
    fn test_concurrent_connections_create_once() {
        const CALLERS: usize = 8;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.db");
        // Create the schema once before the race.
        drop(SqliteStore::open(&path, Duration::from_secs(5)).unwrap());

        let barrier = Arc::new(std::sync::Barrier::new(CALLERS));
        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                let path = path.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    // Separate connections, as separate processes would have.
                    let store = SqliteStore::open(&path, Duration::from_secs(5)).unwrap();
                    barrier.wait();
                    store
                        .insert_if_absent(new_record(7, Some(3), at(9, 0)))
                        .unwrap()
                })
            })
            .collect();

        let outcomes: Vec<Recorded> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(outcomes.iter().filter(|o| o.is_created()).count(), 1);
        let id = outcomes[0].record().id;
        assert!(outcomes.iter().all(|o| o.record().id == id));

        let store = SqliteStore::open(&path, Duration::from_secs(5)).unwrap();
        assert_eq!(store.for_identity(IdentityId(7)).unwrap().len(), 1);
    }
}
