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

//! Event sink and the bounded in-memory event log.
//!
//! Every normalized event is appended to the [`EventLog`] first. Only then,
//! if delivery is enabled and a destination is configured, a delivery task is
//! spawned. The task never blocks the watch loop that recorded the event, so
//! a slow endpoint does not stall the stream.
//!
//! A failed delivery is logged with the response status and body when there
//! is one, counted, and dropped. It is not retried and it is never reported
//! back to the caller. The event stays in the log.

use crate::destination::Destination;
use crate::event::NormalizedEvent;
use crate::metrics::{self, Timer};
use crate::stats::StatsCounters;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

/// Ring of the most recent events, oldest evicted first.
#[derive(Debug, Clone)]
pub struct EventLog {
    events: VecDeque<NormalizedEvent>,
    capacity: usize,
}

impl EventLog {
    /// Creates an empty log holding at most `capacity` events.
    ///
    /// A capacity of 0 is raised to 1.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Appends an event, returning the evicted one if the log was full.
    pub fn push(&mut self, event: NormalizedEvent) -> Option<NormalizedEvent> {
        self.events.push_back(event);
        if self.events.len() > self.capacity {
            self.events.pop_front()
        } else {
            None
        }
    }

    /// All retained events in arrival order.
    pub fn snapshot(&self) -> Vec<NormalizedEvent> {
        self.events.iter().cloned().collect()
    }

    /// The last `n` events in arrival order.
    pub fn recent(&self, n: usize) -> Vec<NormalizedEvent> {
        let skip = self.events.len().saturating_sub(n);
        self.events.iter().skip(skip).cloned().collect()
    }

    /// Iterates retained events in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = &NormalizedEvent> {
        self.events.iter()
    }

    /// Number of retained events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if no event was retained.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Maximum number of retained events.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Cloneable handle to the event log shared by the sink and its readers.
#[derive(Debug, Clone)]
pub struct SharedEventLog {
    inner: Arc<Mutex<EventLog>>,
}

impl SharedEventLog {
    /// Creates an empty shared log.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(EventLog::new(capacity))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EventLog> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends an event and returns the resulting length.
    pub(crate) fn push(&self, event: NormalizedEvent) -> usize {
        let mut log = self.lock();
        log.push(event);
        log.len()
    }

    /// All retained events in arrival order.
    pub fn snapshot(&self) -> Vec<NormalizedEvent> {
        self.lock().snapshot()
    }

    /// The last `n` events in arrival order.
    pub fn recent(&self, n: usize) -> Vec<NormalizedEvent> {
        self.lock().recent(n)
    }

    /// Number of retained events.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if no event was retained.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Maximum number of retained events.
    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }
}

/// Appends events to the log and hands them to the destination.
pub struct EventSink {
    log: SharedEventLog,
    destination: Option<Arc<dyn Destination>>,
    delivery_enabled: bool,
    stats: Arc<StatsCounters>,
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("capacity", &self.log.capacity())
            .field("has_destination", &self.destination.is_some())
            .field("delivery_enabled", &self.delivery_enabled)
            .finish_non_exhaustive()
    }
}

impl EventSink {
    pub(crate) fn new(
        capacity: usize,
        destination: Option<Arc<dyn Destination>>,
        delivery_enabled: bool,
        stats: Arc<StatsCounters>,
    ) -> Self {
        Self {
            log: SharedEventLog::new(capacity),
            destination,
            delivery_enabled,
            stats,
        }
    }

    /// Appends `event` to the log, then starts its delivery.
    ///
    /// Returns the delivery task, or `None` when nothing is delivered
    /// because delivery is disabled or no destination is configured.
    pub fn record(&self, event: NormalizedEvent) -> Option<JoinHandle<()>> {
        let size = self.log.push(event.clone());
        self.stats.event_recorded();
        metrics::increment_events_recorded(&event.collection, event.event_type.as_str());
        metrics::set_event_log_size(size);

        debug!(
            collection = %event.collection,
            document_id = %event.document_id,
            event_type = event.event_type.as_str(),
            "Event recorded"
        );

        if !self.delivery_enabled {
            return None;
        }
        let destination = self.destination.clone()?;
        let stats = Arc::clone(&self.stats);

        Some(tokio::spawn(deliver(destination, event, stats)))
    }

    /// The event log.
    pub fn log(&self) -> &SharedEventLog {
        &self.log
    }

    /// The configured destination, if any.
    pub fn destination(&self) -> Option<&Arc<dyn Destination>> {
        self.destination.as_ref()
    }
}

#[instrument(
    skip(destination, event, stats),
    fields(collection = %event.collection, document_id = %event.document_id)
)]
async fn deliver(
    destination: Arc<dyn Destination>,
    event: NormalizedEvent,
    stats: Arc<StatsCounters>,
) {
    let destination_type = destination.metadata().destination_type;
    let timer = Timer::new(destination_type.clone(), |duration, dest_type| {
        metrics::record_delivery_duration(duration, dest_type);
    });

    match destination.send_event(&event).await {
        Ok(()) => {
            stats.delivery_succeeded();
            metrics::increment_deliveries_succeeded(&destination_type);
            debug!(
                event_type = event.event_type.as_str(),
                elapsed_ms = timer.elapsed().as_millis() as u64,
                "Event delivered"
            );
        }
        Err(e) => {
            stats.delivery_failed();
            metrics::increment_deliveries_failed(&destination_type, e.kind());
            warn!(
                event_type = event.event_type.as_str(),
                status = ?e.status(),
                body = ?e.body(),
                error = %e,
                "Event delivery failed; event dropped"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::MockDestination;
    use crate::event::{ChangeKind, EventMetadata, EventType};
    use chrono::Utc;

    fn create_test_event(id: &str) -> NormalizedEvent {
        NormalizedEvent {
            event_type: EventType::Create,
            collection: "notes".to_string(),
            document_id: id.to_string(),
            timestamp: Utc::now(),
            old_data: None,
            new_data: Some(serde_json::Map::new()),
            metadata: EventMetadata {
                change_type: ChangeKind::Added,
                source: "docwatch".to_string(),
            },
        }
    }

    fn ids(events: &[NormalizedEvent]) -> Vec<&str> {
        events.iter().map(|e| e.document_id.as_str()).collect()
    }

    #[test]
    fn test_event_log_evicts_oldest_first() {
        let mut log = EventLog::new(3);
        for i in 0..5 {
            log.push(create_test_event(&format!("d{i}")));
            assert!(log.len() <= 3);
        }

        assert_eq!(ids(&log.snapshot()), vec!["d2", "d3", "d4"]);
        assert_eq!(ids(&log.recent(2)), vec!["d3", "d4"]);
        assert_eq!(ids(&log.recent(10)), vec!["d2", "d3", "d4"]);
        assert_eq!(log.capacity(), 3);
    }

    #[test]
    fn test_event_log_push_returns_evicted() {
        let mut log = EventLog::new(1);
        assert!(log.push(create_test_event("a")).is_none());
        let evicted = log.push(create_test_event("b")).unwrap();
        assert_eq!(evicted.document_id, "a");
    }

    #[test]
    fn test_event_log_zero_capacity_raised() {
        let log = EventLog::new(0);
        assert_eq!(log.capacity(), 1);
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_record_without_destination_only_logs() {
        let stats = Arc::new(StatsCounters::default());
        let sink = EventSink::new(10, None, true, stats.clone());

        assert!(sink.record(create_test_event("d1")).is_none());
        assert_eq!(sink.log().len(), 1);
        assert_eq!(stats.snapshot().events_recorded, 1);
    }

    #[tokio::test]
    async fn test_record_with_delivery_disabled() {
        let mock = Arc::new(MockDestination::new());
        let stats = Arc::new(StatsCounters::default());
        let sink = EventSink::new(10, Some(mock.clone()), false, stats);

        assert!(sink.record(create_test_event("d1")).is_none());
        assert_eq!(sink.log().len(), 1);
        assert_eq!(mock.attempts(), 0);
    }

    #[tokio::test]
    async fn test_record_delivers_after_logging() {
        let mock = Arc::new(MockDestination::new());
        let stats = Arc::new(StatsCounters::default());
        let sink = EventSink::new(10, Some(mock.clone()), true, stats.clone());

        let handle = sink.record(create_test_event("d1")).unwrap();
        assert_eq!(sink.log().len(), 1);
        handle.await.unwrap();

        assert_eq!(ids(&mock.events()), vec!["d1"]);
        assert_eq!(stats.snapshot().deliveries_succeeded, 1);
    }

    #[tokio::test]
    async fn test_rejected_delivery_keeps_event_in_log() {
        let mock = Arc::new(MockDestination::new().with_rejection(500));
        let stats = Arc::new(StatsCounters::default());
        let sink = EventSink::new(10, Some(mock.clone()), true, stats.clone());

        sink.record(create_test_event("d1")).unwrap().await.unwrap();
        sink.record(create_test_event("d2")).unwrap().await.unwrap();

        assert_eq!(ids(&sink.log().snapshot()), vec!["d1", "d2"]);
        assert_eq!(mock.attempts(), 2);
        assert_eq!(mock.total_events_sent(), 0);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.deliveries_failed, 2);
        assert_eq!(snapshot.events_recorded, 2);
    }

    #[tokio::test]
    async fn test_connection_failure_is_not_retried() {
        let mock = Arc::new(MockDestination::new().with_connection_failures());
        let stats = Arc::new(StatsCounters::default());
        let sink = EventSink::new(10, Some(mock.clone()), true, stats.clone());

        sink.record(create_test_event("d1")).unwrap().await.unwrap();

        assert_eq!(mock.attempts(), 1);
        assert_eq!(stats.snapshot().deliveries_failed, 1);
    }
}
