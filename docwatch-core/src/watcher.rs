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

//! Watch subscription manager.
//!
//! Opens one change stream per collection and consumes it in its own task.
//!
//! # Stream lifecycle
//!
//! ```text
//! subscribe(name)
//!   ├─ already registered ──────────────► no-op
//!   ├─ open fails ──► release, warn ────► retried by the next discovery cycle
//!   └─ open ok ──► consume task
//!                    ├─ first batch ────► discarded (initial snapshot)
//!                    ├─ later batches ──► diff ─► sink.record, in order
//!                    ├─ Err / end ──────► release, schedule retry after delay
//!                    └─ cancel ─────────► exit
//! ```
//!
//! Delayed re-subscriptions are tracked per collection. A scheduled retry
//! sends the collection name on the retry channel when its delay elapses;
//! the monitor's control loop receives it and calls [`WatchManager::subscribe`].
//! [`WatchManager::unsubscribe_all`] aborts every pending retry.

use crate::diff::DiffEngine;
use crate::event::ChangeBatch;
use crate::metrics;
use crate::registry::{CollectionRegistry, WatchHandle};
use crate::sink::EventSink;
use crate::source::{BatchStream, DataSource, SourceError};
use crate::stats::StatsCounters;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Why a consume loop stopped on its own.
enum StreamEnd {
    Failed(SourceError),
    Ended,
}

impl StreamEnd {
    fn kind(&self) -> &'static str {
        match self {
            Self::Failed(e) => e.kind(),
            Self::Ended => "ended",
        }
    }
}

/// Owns the live change streams and their retry schedule.
pub struct WatchManager {
    source: Arc<dyn DataSource>,
    registry: CollectionRegistry,
    engine: DiffEngine,
    sink: EventSink,
    retries: Mutex<HashMap<String, JoinHandle<()>>>,
    retry_tx: mpsc::UnboundedSender<String>,
    resubscribe_delay: Duration,
    stats: Arc<StatsCounters>,
}

impl WatchManager {
    /// Creates a manager and the receiving end of its retry channel.
    pub(crate) fn new(
        source: Arc<dyn DataSource>,
        engine: DiffEngine,
        sink: EventSink,
        resubscribe_delay: Duration,
        stats: Arc<StatsCounters>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (retry_tx, retry_rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            source,
            registry: CollectionRegistry::new(),
            engine,
            sink,
            retries: Mutex::new(HashMap::new()),
            retry_tx,
            resubscribe_delay,
            stats,
        });
        (manager, retry_rx)
    }

    fn retries(&self) -> MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        self.retries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts watching `name` unless it is already watched.
    ///
    /// Returns true if a new stream was opened and registered. Failures to
    /// open are logged and leave the collection unwatched.
    #[instrument(skip(self, name), fields(collection = %name))]
    pub async fn subscribe(self: &Arc<Self>, name: &str) -> bool {
        let Some(id) = self.registry.reserve(name) else {
            debug!("Collection already watched");
            return false;
        };

        let stream = match self.source.open_change_stream(name).await {
            Ok(stream) => stream,
            Err(e) => {
                self.registry.release(name, id);
                metrics::increment_subscription_failures(name);
                warn!(error = %e, "Failed to open change stream");
                return false;
            }
        };

        self.stats.subscription_opened();
        metrics::increment_subscriptions_opened(name);

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let task = tokio::spawn(Arc::clone(self).consume(
            name.to_string(),
            id,
            stream,
            cancel_rx,
        ));

        if let Err(handle) = self.registry.activate(name, id, WatchHandle::new(cancel_tx, task)) {
            debug!("Subscription removed while opening; closing stream");
            if let Err(e) = handle.cancel().await {
                error!(error = %e, "Watch task failed while closing");
            }
            return false;
        }

        metrics::set_active_collections(self.registry.len());
        info!("Watching collection");
        true
    }

    async fn consume(
        self: Arc<Self>,
        name: String,
        id: u64,
        mut stream: BatchStream,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let mut snapshot_pending = true;

        let end = loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    debug!(collection = %name, "Watch cancelled");
                    return;
                }
                next = stream.next() => match next {
                    Some(Ok(batch)) if snapshot_pending => {
                        snapshot_pending = false;
                        metrics::increment_snapshots_suppressed(&name);
                        debug!(
                            collection = %name,
                            documents = batch.len(),
                            "Initial snapshot discarded"
                        );
                    }
                    Some(Ok(batch)) => self.process_batch(&name, batch),
                    Some(Err(e)) => break StreamEnd::Failed(e),
                    None => break StreamEnd::Ended,
                },
            }
        };

        self.handle_stream_end(&name, id, end);
    }

    fn process_batch(&self, collection: &str, batch: ChangeBatch) {
        let events = self.engine.diff(collection, batch);
        if events.is_empty() {
            debug!(collection, "Empty batch ignored");
            return;
        }

        debug!(collection, events = events.len(), "Processing batch");
        for event in events {
            self.sink.record(event);
        }
    }

    fn handle_stream_end(&self, name: &str, id: u64, end: StreamEnd) {
        self.stats.stream_failed();
        metrics::increment_stream_failures(name, end.kind());

        match &end {
            StreamEnd::Failed(e) => warn!(collection = %name, error = %e, "Change stream failed"),
            StreamEnd::Ended => warn!(collection = %name, "Change stream ended unexpectedly"),
        }

        if !self.registry.release(name, id) {
            debug!(collection = %name, "Watch already torn down; not rescheduling");
            return;
        }

        metrics::set_active_collections(self.registry.len());
        self.schedule_retry(name);
    }

    fn schedule_retry(&self, name: &str) {
        let delay = self.resubscribe_delay;
        let retry_tx = self.retry_tx.clone();
        let collection = name.to_string();

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if retry_tx.send(collection).is_err() {
                debug!("Retry channel closed; re-subscription dropped");
            }
        });

        if let Some(previous) = self.retries().insert(name.to_string(), task) {
            previous.abort();
        }

        info!(
            collection = %name,
            delay_ms = delay.as_millis() as u64,
            "Re-subscription scheduled"
        );
    }

    /// Forgets the retry entry of a collection whose delay has elapsed.
    pub(crate) fn retry_fired(&self, name: &str) {
        self.retries().remove(name);
    }

    /// Collections with a re-subscription waiting, sorted.
    pub fn pending_retries(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .retries()
            .iter()
            .filter(|(_, task)| !task.is_finished())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Cancels every stream, drops every pending retry and clears the
    /// previous-value cache.
    ///
    /// Safe to call when nothing is watched. Cancellation failures are
    /// logged per collection and never returned.
    pub async fn unsubscribe_all(&self) {
        let handles = self.registry.drain();
        if !handles.is_empty() {
            info!(count = handles.len(), "Unsubscribing from all collections");
        }

        for (name, handle) in handles {
            match handle.cancel().await {
                Ok(()) => info!(collection = %name, "Unsubscribed"),
                Err(e) => error!(collection = %name, error = %e, "Watch task failed during unsubscribe"),
            }
        }

        let retries: Vec<(String, JoinHandle<()>)> = self.retries().drain().collect();
        for (name, task) in retries {
            task.abort();
            debug!(collection = %name, "Pending re-subscription cancelled");
        }

        self.engine.clear();
        metrics::set_active_collections(0);
    }

    /// Returns true if `name` has a live or opening stream.
    pub fn is_watched(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    /// Watched collection names, sorted.
    pub fn watched_collections(&self) -> Vec<String> {
        self.registry.names()
    }

    /// The diff engine shared by every stream.
    pub fn engine(&self) -> &DiffEngine {
        &self.engine
    }

    /// The event sink shared by every stream.
    pub fn sink(&self) -> &EventSink {
        &self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ChangeRecord, EventType};
    use crate::source::BatchStream;
    use async_trait::async_trait;
    use futures::channel::mpsc as fmpsc;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Feed = fmpsc::UnboundedSender<Result<ChangeBatch, SourceError>>;

    /// Source whose streams are fed by the test.
    #[derive(Default)]
    struct FeedSource {
        feeds: Mutex<HashMap<String, Feed>>,
        opens: AtomicUsize,
        refuse: Mutex<bool>,
    }

    impl FeedSource {
        fn feed(&self, name: &str) -> Feed {
            self.feeds.lock().unwrap()[name].clone()
        }
    }

    #[async_trait]
    impl DataSource for FeedSource {
        async fn list_collections(&self) -> Result<Vec<String>, SourceError> {
            Ok(Vec::new())
        }

        async fn open_change_stream(&self, collection: &str) -> Result<BatchStream, SourceError> {
            if *self.refuse.lock().unwrap() {
                return Err(SourceError::open(collection, "refused"));
            }
            self.opens.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = fmpsc::unbounded();
            self.feeds.lock().unwrap().insert(collection.to_string(), tx);
            Ok(rx.boxed())
        }
    }

    fn manager(source: Arc<FeedSource>) -> (Arc<WatchManager>, mpsc::UnboundedReceiver<String>) {
        let stats = Arc::new(StatsCounters::default());
        WatchManager::new(
            source,
            DiffEngine::new("docwatch"),
            EventSink::new(100, None, true, stats.clone()),
            Duration::from_secs(5),
            stats,
        )
    }

    fn added(id: &str) -> ChangeRecord {
        ChangeRecord::added(id, json!({ "id": id }).as_object().cloned().unwrap())
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let source = Arc::new(FeedSource::default());
        let (manager, _retry_rx) = manager(source.clone());

        assert!(manager.subscribe("notes").await);
        assert!(!manager.subscribe("notes").await);
        assert_eq!(source.opens.load(Ordering::SeqCst), 1);
        assert_eq!(manager.watched_collections(), vec!["notes".to_string()]);

        manager.unsubscribe_all().await;
    }

    #[tokio::test]
    async fn test_first_batch_is_suppressed() {
        let source = Arc::new(FeedSource::default());
        let (manager, _retry_rx) = manager(source.clone());
        manager.subscribe("notes").await;

        let feed = source.feed("notes");
        feed.unbounded_send(Ok(vec![added("existing-1"), added("existing-2")]))
            .unwrap();
        settle().await;
        assert!(manager.sink().log().is_empty());

        feed.unbounded_send(Ok(vec![added("d1")])).unwrap();
        settle().await;

        let events = manager.sink().log().snapshot();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].document_id, "d1");
        assert_eq!(events[0].event_type, EventType::Create);

        manager.unsubscribe_all().await;
    }

    #[tokio::test]
    async fn test_open_failure_leaves_collection_unwatched() {
        let source = Arc::new(FeedSource::default());
        *source.refuse.lock().unwrap() = true;
        let (manager, _retry_rx) = manager(source.clone());

        assert!(!manager.subscribe("notes").await);
        assert!(!manager.is_watched("notes"));
        assert!(manager.pending_retries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_error_schedules_retry() {
        let source = Arc::new(FeedSource::default());
        let (manager, mut retry_rx) = manager(source.clone());
        manager.subscribe("notes").await;

        source
            .feed("notes")
            .unbounded_send(Err(SourceError::stream("notes", "cursor killed")))
            .unwrap();
        settle().await;

        assert!(!manager.is_watched("notes"));
        assert_eq!(manager.pending_retries(), vec!["notes".to_string()]);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(retry_rx.recv().await.as_deref(), Some("notes"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_end_is_treated_as_failure() {
        let source = Arc::new(FeedSource::default());
        let (manager, _retry_rx) = manager(source.clone());
        manager.subscribe("notes").await;

        source.feeds.lock().unwrap().remove("notes");
        settle().await;

        assert!(!manager.is_watched("notes"));
        assert_eq!(manager.pending_retries(), vec!["notes".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_all_cancels_streams_and_retries() {
        let source = Arc::new(FeedSource::default());
        let (manager, mut retry_rx) = manager(source.clone());
        manager.subscribe("notes").await;
        manager.subscribe("tasks").await;

        let notes = source.feed("notes");
        notes.unbounded_send(Ok(Vec::new())).unwrap();
        notes.unbounded_send(Ok(vec![added("d1")])).unwrap();
        source
            .feed("tasks")
            .unbounded_send(Err(SourceError::stream("tasks", "boom")))
            .unwrap();
        settle().await;

        assert_eq!(manager.engine().cached_documents(), 1);
        assert_eq!(manager.pending_retries(), vec!["tasks".to_string()]);

        manager.unsubscribe_all().await;

        assert!(manager.watched_collections().is_empty());
        assert!(manager.pending_retries().is_empty());
        assert_eq!(manager.engine().cached_documents(), 0);
        assert!(notes.is_closed());

        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert!(retry_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_all_when_empty() {
        let source = Arc::new(FeedSource::default());
        let (manager, _retry_rx) = manager(source);

        manager.unsubscribe_all().await;
        manager.unsubscribe_all().await;
        assert!(manager.watched_collections().is_empty());
    }
}
