//! Event vocabulary, interception-point names and event records.
//!
//! An interception point is a raw hook name such as `data_obj_put_post`; the
//! classifier turns it into one or more canonical [`Event`]s, each carried by
//! an [`EventRecord`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{keys, Document};

pub mod arguments;
pub mod classifier;
pub mod session;

/// Host prefixes that may precede an interception-point name.
const HOST_PREFIXES: &[&str] = &["pep_api_", "pep_resource_"];

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// Canonical event produced by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Event {
    /// Object uploaded through a put.
    Put,
    /// Object downloaded or opened for read.
    Get,
    /// Object opened for write and closed.
    Write,
    /// Object or collection created.
    Create,
    /// Collection removed, or an administrative entity removed.
    Remove,
    /// Metadata attached, modified or removed.
    Metadata,
    /// Replica created or moved.
    Replication,
    /// Physical file registered.
    Register,
    /// Physical file unregistered.
    Unregister,
    /// Object truncated, or opened with truncation.
    Truncate,
    /// Seek on an open object.
    Seek,
    /// Object copied.
    Copy,
    /// Object renamed.
    Rename,
    /// Replica trimmed.
    Trim,
    /// Object unlinked.
    Unlink,
    /// Checksum computed.
    Checksum,
    /// Administrative entity modified.
    Modify,
    /// Object opened; only seen as a hierarchy-resolution operation.
    Open,
}

impl Event {
    /// Upper-case wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Put => "PUT",
            Self::Get => "GET",
            Self::Write => "WRITE",
            Self::Create => "CREATE",
            Self::Remove => "REMOVE",
            Self::Metadata => "METADATA",
            Self::Replication => "REPLICATION",
            Self::Register => "REGISTER",
            Self::Unregister => "UNREGISTER",
            Self::Truncate => "TRUNCATE",
            Self::Seek => "SEEK",
            Self::Copy => "COPY",
            Self::Rename => "RENAME",
            Self::Trim => "TRIM",
            Self::Unlink => "UNLINK",
            Self::Checksum => "CHECKSUM",
            Self::Modify => "MODIFY",
            Self::Open => "OPEN",
        }
    }

    /// Every event, in declaration order.
    pub const ALL: [Self; 18] = [
        Self::Put,
        Self::Get,
        Self::Write,
        Self::Create,
        Self::Remove,
        Self::Metadata,
        Self::Replication,
        Self::Register,
        Self::Unregister,
        Self::Truncate,
        Self::Seek,
        Self::Copy,
        Self::Rename,
        Self::Trim,
        Self::Unlink,
        Self::Checksum,
        Self::Modify,
        Self::Open,
    ];
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Event {
    type Err = String;

    /// Case-insensitive; configuration may spell events in any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Self::ALL
            .iter()
            .copied()
            .find(|e| e.as_str() == upper)
            .ok_or_else(|| format!("unknown event [{s}]"))
    }
}

// ---------------------------------------------------------------------------
// Interception points
// ---------------------------------------------------------------------------

/// Phase suffix of an interception point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Before the native operation.
    Pre,
    /// After a successful native operation.
    Post,
    /// After a failed native operation.
    Except,
    /// After the operation regardless of outcome.
    Finally,
}

impl Phase {
    /// Lower-case suffix.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pre => "pre",
            Self::Post => "post",
            Self::Except => "except",
            Self::Finally => "finally",
        }
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pre" => Ok(Self::Pre),
            "post" => Ok(Self::Post),
            "except" => Ok(Self::Except),
            "finally" => Ok(Self::Finally),
            other => Err(format!("unknown phase [{other}]")),
        }
    }
}

/// A parsed interception-point name `<base_operation>_<phase>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptionPoint {
    /// Name exactly as the host supplied it.
    pub name: String,
    /// Base operation with any host prefix removed.
    pub base: String,
    /// Phase suffix.
    pub phase: Phase,
}

impl InterceptionPoint {
    /// Parse a raw name; `None` when it has no recognizable phase suffix.
    pub fn parse(name: &str) -> Option<Self> {
        let stripped = HOST_PREFIXES
            .iter()
            .find_map(|p| name.strip_prefix(p))
            .unwrap_or(name);
        let (base, phase) = stripped.rsplit_once('_')?;
        if base.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_owned(),
            base: base.to_owned(),
            phase: phase.parse().ok()?,
        })
    }
}

// ---------------------------------------------------------------------------
// EventRecord
// ---------------------------------------------------------------------------

/// Open document describing one classified event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventRecord(Document);

impl EventRecord {
    /// Wrap an existing document.
    pub fn from_document(document: Document) -> Self {
        Self(document)
    }

    /// String field, or `""` when absent or not a string.
    pub fn field(&self, key: &str) -> &str {
        self.0.get(key).and_then(Value::as_str).unwrap_or_default()
    }

    /// String field inside the `metadata` sub-document.
    pub fn metadata_field(&self, key: &str) -> &str {
        self.0
            .get(keys::METADATA)
            .and_then(|m| m.get(key))
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Raw value for a key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Set a key, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Set a key only when it is absent or an empty string.
    pub fn insert_if_empty(&mut self, key: &str, value: &str) {
        if self.field(key).is_empty() && !value.is_empty() {
            self.insert(key, value);
        }
    }

    /// Stamp the canonical event and the raw interception-point name.
    pub fn stamp(&mut self, event: Event, pep: &str) {
        self.insert(keys::EVENT, event.as_str());
        self.insert(keys::POLICY_ENFORCEMENT_POINT, pep);
    }

    /// The canonical event, if stamped and recognizable.
    pub fn event(&self) -> Option<Event> {
        self.field(keys::EVENT).parse().ok()
    }

    /// Borrow the underlying document.
    pub fn as_document(&self) -> &Document {
        &self.0
    }

    /// Consume into the underlying document.
    pub fn into_document(self) -> Document {
        self.0
    }

    /// Clone into a JSON value.
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl From<Document> for EventRecord {
    fn from(document: Document) -> Self {
        Self(document)
    }
}
