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

//! Collection registry.
//!
//! Tracks which collections currently have a watch. Membership is the only
//! answer to "is this collection watched". A name is added with
//! [`CollectionRegistry::reserve`], which inserts only if absent, so two
//! concurrent subscribe attempts can never open two streams for the same
//! collection.
//!
//! Each reservation carries a numeric id. A watch task that fails releases
//! the entry only if the id still matches, so a stale task can never remove a
//! newer subscription.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

/// Cancellation handle for one live change stream.
#[derive(Debug)]
pub struct WatchHandle {
    cancel_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl WatchHandle {
    /// Wraps the cancel channel and the task consuming the stream.
    pub fn new(cancel_tx: oneshot::Sender<()>, task: JoinHandle<()>) -> Self {
        Self { cancel_tx, task }
    }

    /// Signals the watch task to stop and waits for it to finish.
    ///
    /// A task that already exited is not an error. A task that panicked is
    /// reported through the returned [`tokio::task::JoinError`].
    pub async fn cancel(self) -> Result<(), tokio::task::JoinError> {
        if self.cancel_tx.send(()).is_err() {
            debug!("Watch task already finished before cancellation");
        }
        self.task.await
    }

    /// Returns true once the watch task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[derive(Debug)]
enum Entry {
    /// Reserved while the stream is being opened
    Pending { id: u64 },
    /// Stream open and consumed by a task
    Active { id: u64, handle: WatchHandle },
}

impl Entry {
    fn id(&self) -> u64 {
        match self {
            Self::Pending { id } | Self::Active { id, .. } => *id,
        }
    }
}

/// Watched collections keyed by name.
#[derive(Debug, Default)]
pub struct CollectionRegistry {
    entries: Mutex<HashMap<String, Entry>>,
    next_id: AtomicU64,
}

impl CollectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserves `name` if it is not registered yet.
    ///
    /// Returns the reservation id, or `None` when the name is already present.
    pub fn reserve(&self, name: &str) -> Option<u64> {
        let mut entries = self.entries();
        if entries.contains_key(name) {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        entries.insert(name.to_string(), Entry::Pending { id });
        Some(id)
    }

    /// Attaches a live handle to a reservation.
    ///
    /// Fails with the handle when the reservation was released or drained in
    /// the meantime; the caller is then responsible for cancelling it.
    pub fn activate(&self, name: &str, id: u64, handle: WatchHandle) -> Result<(), WatchHandle> {
        let mut entries = self.entries();
        match entries.get(name) {
            Some(Entry::Pending { id: pending }) if *pending == id => {
                entries.insert(name.to_string(), Entry::Active { id, handle });
                Ok(())
            }
            _ => Err(handle),
        }
    }

    /// Removes `name` if its current entry carries `id`.
    ///
    /// Returns true if an entry was removed.
    pub fn release(&self, name: &str, id: u64) -> bool {
        let mut entries = self.entries();
        if entries.get(name).map(Entry::id) == Some(id) {
            entries.remove(name);
            true
        } else {
            false
        }
    }

    /// Empties the registry and returns the live handles.
    ///
    /// Pending reservations are dropped; their subscribe call notices on
    /// [`activate`](Self::activate) and cancels its own stream.
    pub fn drain(&self) -> Vec<(String, WatchHandle)> {
        self.entries()
            .drain()
            .filter_map(|(name, entry)| match entry {
                Entry::Active { handle, .. } => Some((name, handle)),
                Entry::Pending { .. } => None,
            })
            .collect()
    }

    /// Returns true if `name` is registered, pending or active.
    pub fn contains(&self, name: &str) -> bool {
        self.entries().contains_key(name)
    }

    /// Number of registered collections.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries().keys().cloned().collect();
        names.sort();
        names
    }
}
