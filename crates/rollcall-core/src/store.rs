//! Collaborator boundaries: where feature vectors, the session timetable and
//! attendance records actually live.
//!
//! The engine only needs the contracts below. In-memory implementations are
//! provided for tests and for embedding without a database.

use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crate::error::Error;
use crate::types::{
    AttendanceKey, AttendanceRecord, AttendanceStatus, Enrollment, IdentityId, NewRecord,
    RecordId, Session, SessionId,
};

/// Source of truth for enrolled feature vectors.
///
/// Must tolerate calls concurrent with engine reads.
pub trait FeatureStore: Send + Sync {
    /// Every enrolled identity with its vector.
    fn list_all(&self) -> Result<Vec<Enrollment>, Error>;

    fn get_one(&self, id: IdentityId) -> Result<Option<Enrollment>, Error>;

    /// Insert or replace the enrollment for `enrollment.identity.id`.
    fn put(&self, enrollment: &Enrollment) -> Result<(), Error>;
}

/// The timetable of sessions.
pub trait SessionCatalog: Send + Sync {
    fn sessions(&self) -> Result<Vec<Session>, Error>;

    fn session(&self, id: SessionId) -> Result<Option<Session>, Error> {
        Ok(self.sessions()?.into_iter().find(|s| s.id == id))
    }

    /// Insert or replace a session. Implementations validate the window.
    fn put_session(&self, session: &Session) -> Result<(), Error>;
}

/// Outcome of an atomic lookup-or-insert on the attendance key.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Created(AttendanceRecord),
    /// A record already existed for the key; returned unmodified.
    AlreadyExists(AttendanceRecord),
}

impl Recorded {
    pub fn record(&self) -> &AttendanceRecord {
        match self {
            Self::Created(r) | Self::AlreadyExists(r) => r,
        }
    }

    pub fn into_record(self) -> AttendanceRecord {
        match self {
            Self::Created(r) | Self::AlreadyExists(r) => r,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Persistence for attendance records.
pub trait AttendanceStore: Send + Sync {
    /// Insert `record` unless one already exists for `record.key`.
    ///
    /// Must be atomic per key: of two concurrent calls with the same key,
    /// exactly one observes `Created`.
    fn insert_if_absent(&self, record: NewRecord) -> Result<Recorded, Error>;

    fn find(&self, key: &AttendanceKey) -> Result<Option<AttendanceRecord>, Error>;

    /// Change the status of one record. `None` if no such record.
    fn set_status(
        &self,
        id: RecordId,
        status: AttendanceStatus,
    ) -> Result<Option<AttendanceRecord>, Error>;

    /// Records for one identity, newest first.
    fn for_identity(&self, identity: IdentityId) -> Result<Vec<AttendanceRecord>, Error>;

    /// Records in one session bucket on one day, oldest first.
    fn for_session_day(
        &self,
        session: Option<SessionId>,
        day: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>, Error>;
}

impl<T: FeatureStore + ?Sized> FeatureStore for Arc<T> {
    fn list_all(&self) -> Result<Vec<Enrollment>, Error> {
        (**self).list_all()
    }

    fn get_one(&self, id: IdentityId) -> Result<Option<Enrollment>, Error> {
        (**self).get_one(id)
    }

    fn put(&self, enrollment: &Enrollment) -> Result<(), Error> {
        (**self).put(enrollment)
    }
}

impl<T: SessionCatalog + ?Sized> SessionCatalog for Arc<T> {
    fn sessions(&self) -> Result<Vec<Session>, Error> {
        (**self).sessions()
    }

    fn session(&self, id: SessionId) -> Result<Option<Session>, Error> {
        (**self).session(id)
    }

    fn put_session(&self, session: &Session) -> Result<(), Error> {
        (**self).put_session(session)
    }
}

impl<T: AttendanceStore + ?Sized> AttendanceStore for Arc<T> {
    fn insert_if_absent(&self, record: NewRecord) -> Result<Recorded, Error> {
        (**self).insert_if_absent(record)
    }

    fn find(&self, key: &AttendanceKey) -> Result<Option<AttendanceRecord>, Error> {
        (**self).find(key)
    }

    fn set_status(
        &self,
        id: RecordId,
        status: AttendanceStatus,
    ) -> Result<Option<AttendanceRecord>, Error> {
        (**self).set_status(id, status)
    }

    fn for_identity(&self, identity: IdentityId) -> Result<Vec<AttendanceRecord>, Error> {
        (**self).for_identity(identity)
    }

    fn for_session_day(
        &self,
        session: Option<SessionId>,
        day: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>, Error> {
        (**self).for_session_day(session, day)
    }
}

/// Feature vectors held in enrollment order.
#[derive(Debug, Default)]
pub struct MemoryFeatureStore {
    entries: RwLock<Vec<Enrollment>>,
}

impl MemoryFeatureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enrollments(enrollments: impl IntoIterator<Item = Enrollment>) -> Self {
        let store = Self::new();
        for e in enrollments {
            // Infallible for the in-memory store.
            let _ = store.put(&e);
        }
        store
    }
}

impl FeatureStore for MemoryFeatureStore {
    fn list_all(&self) -> Result<Vec<Enrollment>, Error> {
        Ok(self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn get_one(&self, id: IdentityId) -> Result<Option<Enrollment>, Error> {
        Ok(self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|e| e.id() == id)
            .cloned())
    }

    fn put(&self, enrollment: &Enrollment) -> Result<(), Error> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.iter_mut().find(|e| e.id() == enrollment.id()) {
            Some(slot) => *slot = enrollment.clone(),
            None => entries.push(enrollment.clone()),
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemorySessionCatalog {
    sessions: RwLock<BTreeMap<SessionId, Session>>,
}

impl MemorySessionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sessions(sessions: impl IntoIterator<Item = Session>) -> Result<Self, Error> {
        let catalog = Self::new();
        for s in sessions {
            catalog.put_session(&s)?;
        }
        Ok(catalog)
    }
}

impl SessionCatalog for MemorySessionCatalog {
    fn sessions(&self) -> Result<Vec<Session>, Error> {
        Ok(self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect())
    }

    fn session(&self, id: SessionId) -> Result<Option<Session>, Error> {
        Ok(self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned())
    }

    fn put_session(&self, session: &Session) -> Result<(), Error> {
        session.validate()?;
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.id, session.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct LedgerTables {
    next_id: i64,
    by_key: HashMap<AttendanceKey, RecordId>,
    records: BTreeMap<RecordId, AttendanceRecord>,
}

/// Attendance records behind one mutex; the lock makes lookup-or-insert
/// atomic per key.
#[derive(Debug, Default)]
pub struct MemoryAttendanceStore {
    tables: Mutex<LedgerTables>,
}

impl MemoryAttendanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, LedgerTables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.tables().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AttendanceStore for MemoryAttendanceStore {
    fn insert_if_absent(&self, record: NewRecord) -> Result<Recorded, Error> {
        let mut tables = self.tables();
        if let Some(id) = tables.by_key.get(&record.key) {
            if let Some(existing) = tables.records.get(id) {
                return Ok(Recorded::AlreadyExists(existing.clone()));
            }
        }

        tables.next_id += 1;
        let id = RecordId(tables.next_id);
        let created = AttendanceRecord {
            id,
            identity: record.key.identity,
            session: record.key.session,
            day: record.key.day,
            timestamp: record.timestamp,
            status: record.status,
        };
        tables.by_key.insert(record.key, id);
        tables.records.insert(id, created.clone());
        Ok(Recorded::Created(created))
    }

    fn find(&self, key: &AttendanceKey) -> Result<Option<AttendanceRecord>, Error> {
        let tables = self.tables();
        Ok(tables
            .by_key
            .get(key)
            .and_then(|id| tables.records.get(id))
            .cloned())
    }

    fn set_status(
        &self,
        id: RecordId,
        status: AttendanceStatus,
    ) -> Result<Option<AttendanceRecord>, Error> {
        let mut tables = self.tables();
        Ok(tables.records.get_mut(&id).map(|r| {
            r.status = status;
            r.clone()
        }))
    }

    fn for_identity(&self, identity: IdentityId) -> Result<Vec<AttendanceRecord>, Error> {
        let mut out: Vec<_> = self
            .tables()
            .records
            .values()
            .filter(|r| r.identity == identity)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        Ok(out)
    }

    fn for_session_day(
        &self,
        session: Option<SessionId>,
        day: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>, Error> {
        let mut out: Vec<_> = self
            .tables()
            .records
            .values()
            .filter(|r| r.session == session && r.day == day)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Ok(out)
    }
}
