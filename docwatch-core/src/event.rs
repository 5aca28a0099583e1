// Copyright 2025 Docwatch Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Change records and normalized events.
//!
//! A data source reports mutations as [`ChangeRecord`]s grouped into a
//! [`ChangeBatch`]. The diff engine turns each record into a
//! [`NormalizedEvent`], which is the unit that is logged and posted to the
//! webhook.
//!
//! # Examples
//!
//! ```rust
//! use docwatch_core::event::{ChangeKind, ChangeRecord};
//! use serde_json::json;
//!
//! let record = ChangeRecord::added("d1", json!({ "a": 1 }).as_object().cloned().unwrap());
//! assert_eq!(record.kind, ChangeKind::Added);
//! assert_eq!(record.document_id, "d1");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Field values of a single document.
pub type Fields = Map<String, Value>;

/// A set of change records delivered together by one notification.
pub type ChangeBatch = Vec<ChangeRecord>;

/// Source-provided classification of a single document mutation.
///
/// The `Other` variant keeps classifications this crate does not know about,
/// so a newer source never breaks the stream. They become
/// [`EventType::Unknown`] events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// The document appeared in the collection
    Added,

    /// The document's fields changed
    Modified,

    /// The document was removed from the collection
    Removed,

    /// Any other classification, carried verbatim
    #[serde(untagged)]
    Other(String),
}

impl ChangeKind {
    /// Returns the classification as it appears on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Removed => "removed",
            Self::Other(kind) => kind,
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One document's classified mutation plus its current field values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    /// How the document changed
    pub kind: ChangeKind,

    /// Identifier of the document, unique within its collection
    pub document_id: String,

    /// Current field values; absent for removals
    pub fields: Option<Fields>,
}

impl ChangeRecord {
    /// Creates an `Added` record.
    pub fn added(document_id: impl Into<String>, fields: Fields) -> Self {
        Self {
            kind: ChangeKind::Added,
            document_id: document_id.into(),
            fields: Some(fields),
        }
    }

    /// Creates a `Modified` record.
    pub fn modified(document_id: impl Into<String>, fields: Fields) -> Self {
        Self {
            kind: ChangeKind::Modified,
            document_id: document_id.into(),
            fields: Some(fields),
        }
    }

    /// Creates a `Removed` record.
    pub fn removed(document_id: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::Removed,
            document_id: document_id.into(),
            fields: None,
        }
    }
}

/// Event type posted to the webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// Derived from [`ChangeKind::Added`]
    Create,
    /// Derived from [`ChangeKind::Modified`]
    Update,
    /// Derived from [`ChangeKind::Removed`]
    Delete,
    /// Derived from any other classification
    Unknown,
}

impl EventType {
    /// Returns the event type as a static string for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Unknown => "unknown",
        }
    }
}

impl From<&ChangeKind> for EventType {
    fn from(kind: &ChangeKind) -> Self {
        match kind {
            ChangeKind::Added => Self::Create,
            ChangeKind::Modified => Self::Update,
            ChangeKind::Removed => Self::Delete,
            ChangeKind::Other(_) => Self::Unknown,
        }
    }
}

/// Provenance attached to every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    /// Classification exactly as received from the source
    pub change_type: ChangeKind,

    /// Tag identifying the emitting process
    pub source: String,
}

/// The normalized event derived from one change record.
///
/// Serializes to the webhook body:
///
/// ```json
/// {
///   "eventType": "update",
///   "collection": "notes",
///   "documentId": "d1",
///   "timestamp": "2025-01-01T00:00:00Z",
///   "oldData": { "a": 1 },
///   "newData": { "a": 2 },
///   "metadata": { "changeType": "modified", "source": "docwatch" }
/// }
/// ```
///
/// `oldData` and `newData` are always present on the wire, as `null` when
/// there is no value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedEvent {
    /// Kind of event
    pub event_type: EventType,

    /// Collection the document belongs to
    pub collection: String,

    /// Identifier of the document
    pub document_id: String,

    /// Time the event was processed
    pub timestamp: DateTime<Utc>,

    /// Last known field values before this change, if observed
    pub old_data: Option<Fields>,

    /// Field values after this change; absent for deletes
    pub new_data: Option<Fields>,

    /// Provenance
    pub metadata: EventMetadata,
}

impl NormalizedEvent {
    /// Returns true if this is a create event.
    #[inline]
    pub fn is_create(&self) -> bool {
        self.event_type == EventType::Create
    }

    /// Returns true if this is an update event.
    #[inline]
    pub fn is_update(&self) -> bool {
        self.event_type == EventType::Update
    }

    /// Returns true if this is a delete event.
    #[inline]
    pub fn is_delete(&self) -> bool {
        self.event_type == EventType::Delete
    }

    /// Returns the previous-value cache key, `"<collection>/<id>"`.
    pub fn document_key(&self) -> String {
        document_key(&self.collection, &self.document_id)
    }
}

/// Builds the key a document is cached under.
pub fn document_key(collection: &str, document_id: &str) -> String {
    format!("{collection}/{document_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_change_kind_wire_names() {
        assert_eq!(serde_json::to_value(ChangeKind::Added).unwrap(), json!("added"));
        assert_eq!(
            serde_json::to_value(ChangeKind::Other("renamed".into())).unwrap(),
            json!("renamed")
        );

        let parsed: ChangeKind = serde_json::from_value(json!("removed")).unwrap();
        assert_eq!(parsed, ChangeKind::Removed);

        let parsed: ChangeKind = serde_json::from_value(json!("truncated")).unwrap();
        assert_eq!(parsed, ChangeKind::Other("truncated".into()));
    }

    #[test]
    fn test_event_type_from_kind() {
        assert_eq!(EventType::from(&ChangeKind::Added), EventType::Create);
        assert_eq!(EventType::from(&ChangeKind::Modified), EventType::Update);
        assert_eq!(EventType::from(&ChangeKind::Removed), EventType::Delete);
        assert_eq!(
            EventType::from(&ChangeKind::Other("x".into())),
            EventType::Unknown
        );
    }

    #[test]
    fn test_normalized_event_json_shape() {
        let event = NormalizedEvent {
            event_type: EventType::Create,
            collection: "notes".into(),
            document_id: "d1".into(),
            timestamp: Utc::now(),
            old_data: None,
            new_data: Some(fields(json!({ "a": 1 }))),
            metadata: EventMetadata {
                change_type: ChangeKind::Added,
                source: "docwatch".into(),
            },
        };

        let value = serde_json::to_value(&event).unwrap();
        let object = value.as_object().unwrap();

        assert_eq!(object["eventType"], json!("create"));
        assert_eq!(object["collection"], json!("notes"));
        assert_eq!(object["documentId"], json!("d1"));
        assert_eq!(object["oldData"], Value::Null);
        assert_eq!(object["newData"], json!({ "a": 1 }));
        assert_eq!(object["metadata"], json!({ "changeType": "added", "source": "docwatch" }));
        assert!(object["timestamp"].as_str().unwrap().contains('T'));
        assert_eq!(object.len(), 7);
    }

    #[test]
    fn test_document_key() {
        assert_eq!(document_key("notes", "d1"), "notes/d1");
    }
}
