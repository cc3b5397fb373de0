use chrono::Utc;
use rollcall_core::{Enrollment, Error, FeatureStore, FeatureVector, Identity, IdentityId};
use rusqlite::{params, OptionalExtension, Row};

use crate::{SqliteStore, StoreError};

const SELECT_IDENTITY: &str = "SELECT id, name, code, encoding FROM identities";

struct Stored {
    id: i64,
    name: Option<String>,
    code: Option<String>,
    encoding: String,
}

impl Stored {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            code: row.get(2)?,
            encoding: row.get(3)?,
        })
    }

    fn decode(self) -> Result<Enrollment, StoreError> {
        let vector: FeatureVector =
            serde_json::from_str(&self.encoding).map_err(|source| StoreError::Encoding {
                identity: self.id,
                source,
            })?;
        Ok(Enrollment {
            identity: Identity {
                id: IdentityId(self.id),
                name: self.name,
                code: self.code,
            },
            vector,
        })
    }
}

impl SqliteStore {
    fn load_enrollments(&self) -> Result<Vec<Enrollment>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{SELECT_IDENTITY} ORDER BY enrolled_at, id"))?;
        let rows = stmt.query_map([], Stored::from_row)?;

        let mut out = Vec::new();
        for row in rows {
            let stored = row?;
            let id = stored.id;
            match stored.decode() {
                Ok(enrollment) => out.push(enrollment),
                Err(err) => tracing::warn!(identity = id, error = %err, "skipping malformed face encoding"),
            }
        }
        Ok(out)
    }

    fn load_enrollment(&self, id: IdentityId) -> Result<Option<Enrollment>, StoreError> {
        let conn = self.conn()?;
        let stored = conn
            .query_row(
                &format!("{SELECT_IDENTITY} WHERE id = ?1"),
                params![id.0],
                Stored::from_row,
            )
            .optional()?;
        stored.map(Stored::decode).transpose()
    }

    fn store_enrollment(&self, enrollment: &Enrollment) -> Result<(), StoreError> {
        let encoding = serde_json::to_string(&enrollment.vector).map_err(|source| {
            StoreError::Encoding {
                identity: enrollment.id().0,
                source,
            }
        })?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO identities (id, name, code, encoding, enrolled_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                 name = COALESCE(excluded.name, identities.name),
                 code = COALESCE(excluded.code, identities.code),
                 encoding = excluded.encoding,
                 enrolled_at = excluded.enrolled_at",
            params![
                enrollment.id().0,
                enrollment.identity.name,
                enrollment.identity.code,
                encoding,
                Utc::now(),
            ],
        )?;
        Ok(())
    }
}

impl FeatureStore for SqliteStore {
    fn list_all(&self) -> Result<Vec<Enrollment>, Error> {
        Ok(self.load_enrollments()?)
    }

    fn get_one(&self, id: IdentityId) -> Result<Option<Enrollment>, Error> {
        Ok(self.load_enrollment(id)?)
    }

    fn put(&self, enrollment: &Enrollment) -> Result<(), Error> {
        Ok(self.store_enrollment(enrollment)?)
    }
}
