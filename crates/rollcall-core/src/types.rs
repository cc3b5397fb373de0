use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }
    };
}

id_type!(
    /// Opaque identifier of an enrolled person.
    IdentityId
);
id_type!(
    /// Identifier of a scheduled class session.
    SessionId
);
id_type!(
    /// Identifier of a persisted attendance record.
    RecordId
);

/// Face feature vector produced by the external extraction model
/// (128-dimensional in the deployed domain).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector {
    pub values: Vec<f32>,
}

impl FeatureVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// A zero-length vector is how the capture side reports "no face".
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Compute Euclidean distance between two vectors.
    ///
    /// Only meaningful for vectors of equal length; callers check
    /// dimensions before comparing.
    pub fn euclidean_distance(&self, other: &FeatureVector) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    pub(crate) fn check_dimension(&self, expected: usize) -> Result<(), Error> {
        if self.values.len() == expected {
            Ok(())
        } else {
            Err(Error::DimensionMismatch {
                expected,
                actual: self.values.len(),
            })
        }
    }
}

impl From<Vec<f32>> for FeatureVector {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// Who a feature vector belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Roll number or employee code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl Identity {
    pub fn new(id: i64) -> Self {
        Self {
            id: IdentityId(id),
            name: None,
            code: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// An identity together with its enrolled feature vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrollment {
    pub identity: Identity,
    pub vector: FeatureVector,
}

impl Enrollment {
    pub fn new(identity: Identity, vector: impl Into<FeatureVector>) -> Self {
        Self {
            identity,
            vector: vector.into(),
        }
    }

    pub fn id(&self) -> IdentityId {
        self.identity.id
    }
}

/// A time-windowed class session. The window repeats every day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Session {
    /// Build a session, rejecting windows that end before they start.
    pub fn new(
        id: i64,
        name: impl Into<String>,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<Self, Error> {
        let session = Self {
            id: SessionId(id),
            name: name.into(),
            code: None,
            department: None,
            start,
            end,
        };
        session.validate()?;
        Ok(session)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.start > self.end {
            return Err(Error::InvalidSchedule {
                session: self.id,
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }

    /// Both window edges are inclusive.
    pub fn is_active_at(&self, time: NaiveTime) -> bool {
        self.start <= time && time <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    #[default]
    Present,
    Absent,
    Late,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Absent => "absent",
            Self::Late => "late",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttendanceStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" => Ok(Self::Present),
            "absent" => Ok(Self::Absent),
            "late" => Ok(Self::Late),
            other => Err(Error::InvalidStatus(other.to_string())),
        }
    }
}

/// The deduplication key: one record per identity, session bucket and day.
/// `session == None` is the no-session bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttendanceKey {
    pub identity: IdentityId,
    pub session: Option<SessionId>,
    pub day: NaiveDate,
}

/// A record that has not been persisted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub key: AttendanceKey,
    pub timestamp: DateTime<Utc>,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: RecordId,
    pub identity: IdentityId,
    pub session: Option<SessionId>,
    pub day: NaiveDate,
    pub timestamp: DateTime<Utc>,
    pub status: AttendanceStatus,
}

impl AttendanceRecord {
    pub fn key(&self) -> AttendanceKey {
        AttendanceKey {
            identity: self.identity,
            session: self.session,
            day: self.day,
        }
    }
}
