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

//! Snapshot diff engine.
//!
//! Turns a [`ChangeBatch`] for one collection into [`NormalizedEvent`]s,
//! filling `oldData` from a cache of the last field values seen for each
//! document.
//!
//! The cache only knows about documents observed since the process started.
//! A modify or remove for a document that was never seen yields
//! `oldData: null`.
//!
//! # Examples
//!
//! ```rust
//! use docwatch_core::diff::DiffEngine;
//! use docwatch_core::event::{ChangeRecord, EventType};
//! use serde_json::json;
//!
//! let engine = DiffEngine::new("docwatch");
//! let fields = |v: serde_json::Value| v.as_object().cloned().unwrap();
//!
//! let events = engine.diff("notes", vec![ChangeRecord::added("d1", fields(json!({ "a": 1 })))]);
//! assert_eq!(events[0].event_type, EventType::Create);
//!
//! let events = engine.diff("notes", vec![ChangeRecord::modified("d1", fields(json!({ "a": 2 })))]);
//! assert_eq!(events[0].old_data, Some(fields(json!({ "a": 1 }))));
//! ```

use crate::event::{
    document_key, ChangeBatch, ChangeKind, EventMetadata, EventType, Fields, NormalizedEvent,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::trace;

/// Last known field values keyed by `"<collection>/<id>"`.
#[derive(Debug, Default)]
pub struct PreviousValueCache {
    entries: HashMap<String, Fields>,
}

impl PreviousValueCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached values for a key.
    pub fn get(&self, key: &str) -> Option<&Fields> {
        self.entries.get(key)
    }

    /// Stores values for a key, returning what was there before.
    pub fn insert(&mut self, key: String, fields: Fields) -> Option<Fields> {
        self.entries.insert(key, fields)
    }

    /// Removes a key, returning its last values.
    pub fn remove(&mut self, key: &str) -> Option<Fields> {
        self.entries.remove(key)
    }

    /// Returns true if the key is cached.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of cached documents.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Classifies change records and tracks previous values.
///
/// Shared by every watch task. The cache lock is held for one whole batch so
/// records touching the same document in one batch see each other in order.
#[derive(Debug)]
pub struct DiffEngine {
    cache: Mutex<PreviousValueCache>,
    source_tag: String,
}

impl DiffEngine {
    /// Creates an engine that stamps events with `source_tag`.
    pub fn new(source_tag: impl Into<String>) -> Self {
        Self {
            cache: Mutex::new(PreviousValueCache::new()),
            source_tag: source_tag.into(),
        }
    }

    /// Returns the tag written into `metadata.source`.
    pub fn source_tag(&self) -> &str {
        &self.source_tag
    }

    /// Derives one event per record, in batch order.
    ///
    /// An empty batch yields no events. Records are never coalesced, even
    /// when several touch the same document.
    pub fn diff(&self, collection: &str, batch: ChangeBatch) -> Vec<NormalizedEvent> {
        if batch.is_empty() {
            return Vec::new();
        }

        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        let timestamp = Utc::now();

        batch
            .into_iter()
            .map(|record| {
                let key = document_key(collection, &record.document_id);
                let event_type = EventType::from(&record.kind);

                let (old_data, new_data) = match &record.kind {
                    ChangeKind::Added => {
                        if let Some(new_data) = &record.fields {
                            cache.insert(key, new_data.clone());
                        }
                        (None, record.fields.clone())
                    }
                    // Without field values the last known ones stay cached.
                    ChangeKind::Modified => match &record.fields {
                        Some(new_data) => (cache.insert(key, new_data.clone()), Some(new_data.clone())),
                        None => (cache.get(&key).cloned(), None),
                    },
                    ChangeKind::Removed => (cache.remove(&key), None),
                    ChangeKind::Other(kind) => {
                        trace!(collection, kind = %kind, "Unrecognized change kind");
                        (None, None)
                    }
                };

                NormalizedEvent {
                    event_type,
                    collection: collection.to_string(),
                    document_id: record.document_id,
                    timestamp,
                    old_data,
                    new_data,
                    metadata: EventMetadata {
                        change_type: record.kind,
                        source: self.source_tag.clone(),
                    },
                }
            })
            .collect()
    }

    /// Returns true if the document has cached values.
    pub fn is_cached(&self, collection: &str, document_id: &str) -> bool {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&document_key(collection, document_id))
    }

    /// Number of cached documents.
    pub fn cached_documents(&self) -> usize {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Forgets every cached document.
    pub fn clear(&self) {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ChangeRecord;
    use serde_json::{json, Value};

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let engine = DiffEngine::new("docwatch");
        assert!(engine.diff("notes", Vec::new()).is_empty());
        assert_eq!(engine.cached_documents(), 0);
    }

    #[test]
    fn test_create_update_delete_sequence() {
        let engine = DiffEngine::new("docwatch");

        let created = engine.diff("notes", vec![ChangeRecord::added("d1", fields(json!({"a": 1})))]);
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].event_type, EventType::Create);
        assert_eq!(created[0].collection, "notes");
        assert_eq!(created[0].document_id, "d1");
        assert_eq!(created[0].old_data, None);
        assert_eq!(created[0].new_data, Some(fields(json!({"a": 1}))));
        assert_eq!(created[0].metadata.change_type, ChangeKind::Added);
        assert_eq!(created[0].metadata.source, "docwatch");

        let updated =
            engine.diff("notes", vec![ChangeRecord::modified("d1", fields(json!({"a": 2})))]);
        assert_eq!(updated[0].event_type, EventType::Update);
        assert_eq!(updated[0].old_data, Some(fields(json!({"a": 1}))));
        assert_eq!(updated[0].new_data, Some(fields(json!({"a": 2}))));

        let deleted = engine.diff("notes", vec![ChangeRecord::removed("d1")]);
        assert_eq!(deleted[0].event_type, EventType::Delete);
        assert_eq!(deleted[0].old_data, Some(fields(json!({"a": 2}))));
        assert_eq!(deleted[0].new_data, None);
        assert!(!engine.is_cached("notes", "d1"));
    }

    #[test]
    fn test_unseen_document_has_no_old_data() {
        let engine = DiffEngine::new("docwatch");

        let updated =
            engine.diff("notes", vec![ChangeRecord::modified("d9", fields(json!({"b": true})))]);
        assert_eq!(updated[0].old_data, None);
        assert!(engine.is_cached("notes", "d9"));

        let deleted = engine.diff("notes", vec![ChangeRecord::removed("d7")]);
        assert_eq!(deleted[0].old_data, None);
    }

    #[test]
    fn test_batch_order_preserved_without_coalescing() {
        let engine = DiffEngine::new("docwatch");
        let batch = vec![
            ChangeRecord::added("d1", fields(json!({"v": 1}))),
            ChangeRecord::modified("d1", fields(json!({"v": 2}))),
            ChangeRecord::modified("d1", fields(json!({"v": 3}))),
            ChangeRecord::removed("d1"),
        ];

        let events = engine.diff("notes", batch);
        let types: Vec<_> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![
                EventType::Create,
                EventType::Update,
                EventType::Update,
                EventType::Delete
            ]
        );
        assert_eq!(events[2].old_data, Some(fields(json!({"v": 2}))));
        assert_eq!(events[3].old_data, Some(fields(json!({"v": 3}))));
        assert_eq!(engine.cached_documents(), 0);
    }

    #[test]
    fn test_other_kind_leaves_cache_untouched() {
        let engine = DiffEngine::new("docwatch");
        engine.diff("notes", vec![ChangeRecord::added("d1", fields(json!({"a": 1})))]);

        let events = engine.diff(
            "notes",
            vec![ChangeRecord {
                kind: ChangeKind::Other("renamed".into()),
                document_id: "d1".into(),
                fields: Some(fields(json!({"a": 5}))),
            }],
        );

        assert_eq!(events[0].event_type, EventType::Unknown);
        assert_eq!(events[0].old_data, None);
        assert_eq!(events[0].new_data, None);
        assert_eq!(
            events[0].metadata.change_type,
            ChangeKind::Other("renamed".into())
        );

        let next = engine.diff("notes", vec![ChangeRecord::removed("d1")]);
        assert_eq!(next[0].old_data, Some(fields(json!({"a": 1}))));
    }

    #[test]
    fn test_keys_are_scoped_by_collection() {
        let engine = DiffEngine::new("docwatch");
        engine.diff("notes", vec![ChangeRecord::added("d1", fields(json!({"a": 1})))]);

        let events =
            engine.diff("tasks", vec![ChangeRecord::modified("d1", fields(json!({"a": 2})))]);
        assert_eq!(events[0].old_data, None);
        assert_eq!(engine.cached_documents(), 2);
    }

    #[test]
    fn test_clear_forgets_history() {
        let engine = DiffEngine::new("docwatch");
        engine.diff("notes", vec![ChangeRecord::added("d1", fields(json!({"a": 1})))]);
        engine.clear();

        let events =
            engine.diff("notes", vec![ChangeRecord::modified("d1", fields(json!({"a": 2})))]);
        assert_eq!(events[0].old_data, None);
    }

    #[test]
    fn test_missing_fields_are_not_invented() {
        let engine = DiffEngine::new("docwatch");
        let without_fields = |kind: ChangeKind| ChangeRecord {
            kind,
            document_id: "d1".to_string(),
            fields: None,
        };

        let created = engine.diff("notes", vec![without_fields(ChangeKind::Added)]);
        assert_eq!(created[0].event_type, EventType::Create);
        assert_eq!(created[0].new_data, None);
        assert!(!engine.is_cached("notes", "d1"));

        engine.diff("notes", vec![ChangeRecord::added("d1", fields(json!({"a": 1})))]);
        let updated = engine.diff("notes", vec![without_fields(ChangeKind::Modified)]);
        assert_eq!(updated[0].event_type, EventType::Update);
        assert_eq!(updated[0].old_data, Some(fields(json!({"a": 1}))));
        assert_eq!(updated[0].new_data, None);

        let removed = engine.diff("notes", vec![ChangeRecord::removed("d1")]);
        assert_eq!(removed[0].old_data, Some(fields(json!({"a": 1}))));
        assert_eq!(removed[0].new_data, None);
        assert!(!engine.is_cached("notes", "d1"));
    }
}
