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

//! In-memory data source.
//!
//! Holds collections of documents in process and notifies open change
//! streams of every mutation. Useful for development, demos and tests
//! without a running database.
//!
//! Every stream starts with one batch of `Added` records describing the
//! documents present when it was opened. After that each call to
//! [`MemorySource::insert`], [`MemorySource::update`],
//! [`MemorySource::remove`] or [`MemorySource::push_batch`] produces one
//! batch on every stream open on that collection.
//!
//! # Examples
//!
//! ```rust
//! use docwatch_sources::memory::MemorySource;
//! use serde_json::json;
//!
//! let source = MemorySource::new();
//! source.create_collection("notes");
//! source.insert("notes", "d1", json!({ "title": "hello" }).as_object().cloned().unwrap());
//!
//! assert_eq!(source.collection_names(), vec!["notes".to_string()]);
//! ```

use async_trait::async_trait;
use docwatch_core::event::{ChangeBatch, ChangeRecord, Fields};
use docwatch_core::source::{BatchStream, DataSource, SourceError};
use futures::channel::mpsc;
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

type Subscriber = mpsc::UnboundedSender<Result<ChangeBatch, SourceError>>;

#[derive(Default)]
struct Inner {
    collections: BTreeMap<String, BTreeMap<String, Fields>>,
    subscribers: HashMap<String, Vec<Subscriber>>,
    open_counts: HashMap<String, usize>,
    failing_opens: HashSet<String>,
    fail_listing: bool,
}

impl Inner {
    fn notify(&mut self, collection: &str, batch: ChangeBatch) {
        if let Some(subscribers) = self.subscribers.get_mut(collection) {
            subscribers.retain(|tx| tx.unbounded_send(Ok(batch.clone())).is_ok());
        }
    }
}

/// Scriptable in-process document store.
#[derive(Default)]
pub struct MemorySource {
    inner: Mutex<Inner>,
}

impl MemorySource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates an empty collection if it does not exist.
    pub fn create_collection(&self, name: &str) {
        self.inner()
            .collections
            .entry(name.to_string())
            .or_default();
    }

    /// Drops a collection and invalidates its open streams.
    pub fn drop_collection(&self, name: &str) {
        let mut inner = self.inner();
        inner.collections.remove(name);
        for tx in inner.subscribers.remove(name).unwrap_or_default() {
            let _ = tx.unbounded_send(Err(SourceError::Invalidated {
                collection: name.to_string(),
            }));
        }
    }

    /// Inserts a document and emits an `Added` record.
    ///
    /// The collection is created if needed.
    pub fn insert(&self, collection: &str, id: &str, fields: Fields) {
        let mut inner = self.inner();
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), fields.clone());
        inner.notify(collection, vec![ChangeRecord::added(id, fields)]);
    }

    /// Replaces a document's fields and emits a `Modified` record.
    pub fn update(&self, collection: &str, id: &str, fields: Fields) {
        let mut inner = self.inner();
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), fields.clone());
        inner.notify(collection, vec![ChangeRecord::modified(id, fields)]);
    }

    /// Removes a document and emits a `Removed` record.
    pub fn remove(&self, collection: &str, id: &str) {
        let mut inner = self.inner();
        if let Some(documents) = inner.collections.get_mut(collection) {
            documents.remove(id);
        }
        inner.notify(collection, vec![ChangeRecord::removed(id)]);
    }

    /// Emits `batch` verbatim without touching the stored documents.
    pub fn push_batch(&self, collection: &str, batch: ChangeBatch) {
        self.inner().notify(collection, batch);
    }

    /// Makes collection listing fail until reset.
    pub fn fail_listing(&self, fail: bool) {
        self.inner().fail_listing = fail;
    }

    /// Makes opening a stream on `collection` fail until reset.
    pub fn fail_open(&self, collection: &str, fail: bool) {
        let mut inner = self.inner();
        if fail {
            inner.failing_opens.insert(collection.to_string());
        } else {
            inner.failing_opens.remove(collection);
        }
    }

    /// Fails every open stream on `collection`.
    pub fn fail_stream(&self, collection: &str, message: &str) {
        let subscribers = self.inner().subscribers.remove(collection).unwrap_or_default();
        debug!(collection, streams = subscribers.len(), "Failing streams");
        for tx in subscribers {
            let _ = tx.unbounded_send(Err(SourceError::stream(collection, message)));
        }
    }

    /// Ends every open stream on `collection` without an error.
    pub fn close_streams(&self, collection: &str) {
        self.inner().subscribers.remove(collection);
    }

    /// Number of streams ever opened on `collection`.
    pub fn open_count(&self, collection: &str) -> usize {
        self.inner().open_counts.get(collection).copied().unwrap_or(0)
    }

    /// Number of streams on `collection` whose consumer is still listening.
    pub fn active_streams(&self, collection: &str) -> usize {
        let mut inner = self.inner();
        match inner.subscribers.get_mut(collection) {
            Some(subscribers) => {
                subscribers.retain(|tx| !tx.is_closed());
                subscribers.len()
            }
            None => 0,
        }
    }

    /// Names of the stored collections, sorted.
    pub fn collection_names(&self) -> Vec<String> {
        self.inner().collections.keys().cloned().collect()
    }

    /// Current documents of a collection.
    pub fn documents(&self, collection: &str) -> BTreeMap<String, Fields> {
        self.inner()
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl DataSource for MemorySource {
    async fn list_collections(&self) -> Result<Vec<String>, SourceError> {
        let inner = self.inner();
        if inner.fail_listing {
            return Err(SourceError::listing_msg("simulated listing failure"));
        }
        Ok(inner.collections.keys().cloned().collect())
    }

    async fn open_change_stream(&self, collection: &str) -> Result<BatchStream, SourceError> {
        let mut inner = self.inner();
        if inner.failing_opens.contains(collection) {
            return Err(SourceError::open(collection, "simulated open failure"));
        }

        let snapshot: ChangeBatch = inner
            .collections
            .get(collection)
            .map(|documents| {
                documents
                    .iter()
                    .map(|(id, fields)| ChangeRecord::added(id.as_str(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default();

        let (tx, rx) = mpsc::unbounded();
        // The receiver is alive, so the first send cannot fail.
        let _ = tx.unbounded_send(Ok(snapshot));

        inner
            .subscribers
            .entry(collection.to_string())
            .or_default()
            .push(tx);
        *inner.open_counts.entry(collection.to_string()).or_default() += 1;

        debug!(collection, "Memory change stream opened");
        Ok(rx.boxed())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
