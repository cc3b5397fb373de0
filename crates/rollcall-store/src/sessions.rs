use rollcall_core::{Error, Session, SessionCatalog, SessionId};
use rusqlite::{params, OptionalExtension, Row};

use crate::{SqliteStore, StoreError};

const SELECT_SESSION: &str =
    "SELECT id, name, code, department, start_time, end_time FROM sessions";

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: SessionId(row.get(0)?),
        name: row.get(1)?,
        code: row.get(2)?,
        department: row.get(3)?,
        start: row.get(4)?,
        end: row.get(5)?,
    })
}

impl SqliteStore {
    fn load_sessions(&self) -> Result<Vec<Session>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{SELECT_SESSION} ORDER BY start_time, id"))?;
        let sessions = stmt
            .query_map([], session_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sessions)
    }

    fn load_session(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                &format!("{SELECT_SESSION} WHERE id = ?1"),
                params![id.0],
                session_from_row,
            )
            .optional()?)
    }

    fn store_session(&self, session: &Session) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sessions (id, name, code, department, start_time, end_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 code = excluded.code,
                 department = excluded.department,
                 start_time = excluded.start_time,
                 end_time = excluded.end_time",
            params![
                session.id.0,
                session.name,
                session.code,
                session.department,
                session.start,
                session.end,
            ],
        )?;
        Ok(())
    }
}

impl SessionCatalog for SqliteStore {
    fn sessions(&self) -> Result<Vec<Session>, Error> {
        Ok(self.load_sessions()?)
    }

    fn session(&self, id: SessionId) -> Result<Option<Session>, Error> {
        Ok(self.load_session(id)?)
    }

    fn put_session(&self, session: &Session) -> Result<(), Error> {
        session.validate()?;
        self.store_session(session)?;
        tracing::info!(session = %session.id, name = %session.name, "session saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_sessions_round_trip_ordered_by_start() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut maths = Session::new(2, "Maths", hm(12, 0), hm(14, 0)).unwrap();
        maths.department = Some("Science".into());
        store.put_session(&maths).unwrap();
        store
            .put_session(&Session::new(1, "Physics", hm(9, 0), hm(12, 0)).unwrap())
            .unwrap();

        let sessions = store.sessions().unwrap();
        assert_eq!(
            sessions.iter().map(|s| s.id.0).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(store.session(SessionId(2)).unwrap(), Some(maths));
        assert!(store.session(SessionId(3)).unwrap().is_none());
    }

    #[test]
    fn test_put_session_rejects_inverted_window() {
        let store = SqliteStore::open_in_memory().unwrap();
        let bad = Session {
            id: SessionId(1),
            name: "Late lab".into(),
            code: None,
            department: None,
            start: hm(15, 0),
            end: hm(14, 0),
        };
        assert!(matches!(
            store.put_session(&bad),
            Err(Error::InvalidSchedule { .. })
        ));
        assert!(store.sessions().unwrap().is_empty());
    }

    #[test]
    fn test_put_session_updates_window() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .put_session(&Session::new(1, "Physics", hm(9, 0), hm(12, 0)).unwrap())
            .unwrap();
        store
            .put_session(&Session::new(1, "Physics", hm(10, 0), hm(11, 0)).unwrap())
            .unwrap();
        let s = store.session(SessionId(1)).unwrap().unwrap();
        assert_eq!((s.start, s.end), (hm(10, 0), hm(11, 0)));
    }
}
