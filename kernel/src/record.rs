// Ledger Records
//
// A buffered record is one pending mutation. Stamping turns it into
// the immutable row appended to the warehouse.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::LedgerError;
use crate::hash::ContentHash;
use crate::revision::Revision;
use crate::store::Row;

/// Separator between revision and uid in a record id.
pub const ID_DELIMITER: char = '-';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Insert or overwrite.
    #[serde(rename = "UPD")]
    Upd,

    /// Tombstone.
    #[serde(rename = "DEL")]
    Del,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Upd => "UPD",
            EventKind::Del => "DEL",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Document body. Always a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(pub Map<String, Value>);

impl Payload {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Accept an object. `null` and `[]` are taken as an empty object;
    /// anything else is rejected.
    pub fn from_value(value: Value) -> Result<Self, LedgerError> {
        match value {
            Value::Object(map) => Ok(Payload(map)),
            Value::Null => Ok(Payload::empty()),
            Value::Array(items) if items.is_empty() => Ok(Payload::empty()),
            other => Err(LedgerError::InvalidPayload(format!(
                "payload must be a JSON object, got {}",
                kind_of(&other)
            ))),
        }
    }

    /// Serialise any value and check the result is an object.
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self, LedgerError> {
        Self::from_value(serde_json::to_value(value)?)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(map: Map<String, Value>) -> Self {
        Payload(map)
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// A mutation waiting for the next flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedRecord {
    pub uid: String,
    pub parent_uid: Option<String>,
    pub event: EventKind,
    pub payload: Payload,
    pub version: String,
}

impl BufferedRecord {
    pub fn upsert(uid: &str, payload: Payload, parent_uid: Option<&str>, version: &str) -> Self {
        Self {
            uid: uid.to_string(),
            parent_uid: parent_uid.map(str::to_string),
            event: EventKind::Upd,
            payload,
            version: version.to_string(),
        }
    }

    pub fn tombstone(uid: &str, version: &str) -> Self {
        Self {
            uid: uid.to_string(),
            parent_uid: None,
            event: EventKind::Del,
            payload: Payload::empty(),
            version: version.to_string(),
        }
    }
}

/// Batch-scoped primary key, `<revision>-<uid>`.
///
/// Unique per revision only: every revision appends a fresh row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub revision: Revision,
    pub uid: String,
}

impl RecordId {
    pub fn new(revision: Revision, uid: &str) -> Self {
        Self {
            revision,
            uid: uid.to_string(),
        }
    }

    /// Split on the first delimiter. The uid may itself contain delimiters.
    pub fn parse(id: &str) -> Option<Self> {
        let (revision, uid) = id.split_once(ID_DELIMITER)?;
        if revision.is_empty() || !revision.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Self {
            revision: Revision(revision.parse().ok()?),
            uid: uid.to_string(),
        })
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.revision, ID_DELIMITER, self.uid)
    }
}

/// Commit-ready row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StampedRecord {
    pub id: String,
    pub revision: Revision,
    pub parent_uid: Option<String>,
    pub uid: String,
    pub hash: ContentHash,
    pub event: EventKind,
    pub version: String,
    pub json: String,
}

impl StampedRecord {
    pub fn to_row(&self) -> Result<Row, LedgerError> {
        match serde_json::to_value(self)? {
            Value::Object(row) => Ok(row),
            other => Err(LedgerError::InvalidPayload(format!(
                "stamped record serialised to {}",
                kind_of(&other)
            ))),
        }
    }
}
