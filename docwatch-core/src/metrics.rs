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

//! Metrics instrumentation for the change monitor.
//!
//! Recorded through the `metrics` facade. Nothing is exported unless the
//! host application installs a recorder; without one every call is a no-op.
//!
//! # Naming Conventions
//!
//! - Prefixed with `docwatch_`
//! - Counters end with `_total`
//! - Units are part of the name (`_seconds`)
//!
//! # Labels
//!
//! - **collection**: collection name (low cardinality)
//! - **event\_type**: create, update, delete, unknown
//! - **destination\_type**: e.g. "webhook"
//! - **outcome**: success, failure
//! - **error\_type**: short error kind
//!
//! Document ids and error messages are never used as labels.
//!
//! # Examples
//!
//! ```rust
//! use docwatch_core::metrics;
//!
//! metrics::init_metrics();
//! metrics::increment_events_recorded("notes", "create");
//! metrics::set_active_collections(3);
//! ```

use crate::monitor::MonitorState;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Metric name prefix for all metrics.
#[doc(hidden)]
pub const METRIC_PREFIX: &str = "docwatch";

// ============================================================================
// Metric Name Constants
// ============================================================================

/// Events appended to the event log.
///
/// Type: Counter
/// Labels: collection, event_type
const EVENTS_RECORDED_TOTAL: &str = "docwatch_events_recorded_total";

/// Initial snapshot batches discarded after subscribing.
///
/// Type: Counter
/// Labels: collection
const SNAPSHOTS_SUPPRESSED_TOTAL: &str = "docwatch_snapshots_suppressed_total";

/// Delivery attempts by outcome.
///
/// Type: Counter
/// Labels: destination_type, outcome
const DELIVERIES_TOTAL: &str = "docwatch_deliveries_total";

/// Failed deliveries by error kind.
///
/// Type: Counter
/// Labels: destination_type, error_type
const DELIVERY_ERRORS_TOTAL: &str = "docwatch_delivery_errors_total";

/// Time taken by one delivery attempt.
///
/// Type: Histogram
/// Labels: destination_type
/// Unit: seconds
const DELIVERY_DURATION_SECONDS: &str = "docwatch_delivery_duration_seconds";

/// Change streams opened.
///
/// Type: Counter
/// Labels: collection
const SUBSCRIPTIONS_OPENED_TOTAL: &str = "docwatch_subscriptions_opened_total";

/// Failed subscription attempts.
///
/// Type: Counter
/// Labels: collection
const SUBSCRIPTION_FAILURES_TOTAL: &str = "docwatch_subscription_failures_total";

/// Change streams that failed or ended after opening.
///
/// Type: Counter
/// Labels: collection, error_type
const STREAM_FAILURES_TOTAL: &str = "docwatch_stream_failures_total";

/// Collection listings that failed.
///
/// Type: Counter
const DISCOVERY_FAILURES_TOTAL: &str = "docwatch_discovery_failures_total";

/// Collections currently watched.
///
/// Type: Gauge
const ACTIVE_COLLECTIONS: &str = "docwatch_active_collections";

/// Events currently held in the event log.
///
/// Type: Gauge
const EVENT_LOG_SIZE: &str = "docwatch_event_log_size";

/// Monitor lifecycle state (0=stopped, 1=starting, 2=running, 3=stopping).
///
/// Type: Gauge
const MONITOR_STATUS: &str = "docwatch_monitor_status";

// ============================================================================
// Initialization
// ============================================================================

/// Registers metric descriptions.
///
/// Call once at startup, after installing a recorder.
pub fn init_metrics() {
    describe_counter!(
        EVENTS_RECORDED_TOTAL,
        "Total number of normalized events appended to the event log"
    );

    describe_counter!(
        SNAPSHOTS_SUPPRESSED_TOTAL,
        "Total number of initial snapshot batches discarded after subscribing"
    );

    describe_counter!(
        DELIVERIES_TOTAL,
        "Total number of delivery attempts by outcome"
    );

    describe_counter!(
        DELIVERY_ERRORS_TOTAL,
        "Total number of failed deliveries by error kind"
    );

    describe_histogram!(
        DELIVERY_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Time taken by a single delivery attempt"
    );

    describe_counter!(
        SUBSCRIPTIONS_OPENED_TOTAL,
        "Total number of change streams opened"
    );

    describe_counter!(
        SUBSCRIPTION_FAILURES_TOTAL,
        "Total number of change streams that could not be opened"
    );

    describe_counter!(
        STREAM_FAILURES_TOTAL,
        "Total number of change streams that failed or ended after opening"
    );

    describe_counter!(
        DISCOVERY_FAILURES_TOTAL,
        "Total number of failed collection listings"
    );

    describe_gauge!(
        ACTIVE_COLLECTIONS,
        metrics::Unit::Count,
        "Number of collections currently watched"
    );

    describe_gauge!(
        EVENT_LOG_SIZE,
        metrics::Unit::Count,
        "Number of events currently held in the in-memory event log"
    );

    describe_gauge!(
        MONITOR_STATUS,
        "Current monitor state: 0=stopped, 1=starting, 2=running, 3=stopping"
    );
}

// ============================================================================
// Counter Metrics
// ============================================================================

/// Increments the count of recorded events.
pub fn increment_events_recorded(collection: &str, event_type: &str) {
    counter!(EVENTS_RECORDED_TOTAL, "collection" => collection.to_string(), "event_type" => event_type.to_string())
        .increment(1);
}

/// Increments the count of discarded initial snapshots.
pub fn increment_snapshots_suppressed(collection: &str) {
    counter!(SNAPSHOTS_SUPPRESSED_TOTAL, "collection" => collection.to_string()).increment(1);
}

/// Increments the count of successful deliveries.
pub fn increment_deliveries_succeeded(destination_type: &str) {
    counter!(DELIVERIES_TOTAL, "destination_type" => destination_type.to_string(), "outcome" => "success")
        .increment(1);
}

/// Increments the count of failed deliveries.
///
/// # Arguments
///
/// * `destination_type` - Destination type, e.g. "webhook"
/// * `error_type` - Short error kind, e.g. "timeout" or "rejected"
pub fn increment_deliveries_failed(destination_type: &str, error_type: &str) {
    counter!(DELIVERIES_TOTAL, "destination_type" => destination_type.to_string(), "outcome" => "failure")
        .increment(1);
    counter!(DELIVERY_ERRORS_TOTAL, "destination_type" => destination_type.to_string(), "error_type" => error_type.to_string())
        .increment(1);
}

/// Increments the count of opened change streams.
pub fn increment_subscriptions_opened(collection: &str) {
    counter!(SUBSCRIPTIONS_OPENED_TOTAL, "collection" => collection.to_string()).increment(1);
}

/// Increments the count of change streams that could not be opened.
pub fn increment_subscription_failures(collection: &str) {
    counter!(SUBSCRIPTION_FAILURES_TOTAL, "collection" => collection.to_string()).increment(1);
}

/// Increments the count of failed streams.
///
/// `error_type` is `"ended"` when the stream closed without an error.
pub fn increment_stream_failures(collection: &str, error_type: &str) {
    counter!(STREAM_FAILURES_TOTAL, "collection" => collection.to_string(), "error_type" => error_type.to_string())
        .increment(1);
}

/// Increments the count of failed collection listings.
pub fn increment_discovery_failures() {
    counter!(DISCOVERY_FAILURES_TOTAL).increment(1);
}

// ============================================================================
// Histogram Metrics
// ============================================================================

/// Records how long one delivery attempt took.
pub fn record_delivery_duration(duration: Duration, destination_type: &str) {
    histogram!(DELIVERY_DURATION_SECONDS, "destination_type" => destination_type.to_string())
        .record(duration.as_secs_f64());
}

// ============================================================================
// Gauge Metrics
// ============================================================================

/// Sets the number of watched collections.
pub fn set_active_collections(count: usize) {
    gauge!(ACTIVE_COLLECTIONS).set(count as f64);
}

/// Sets the number of events held in the event log.
pub fn set_event_log_size(size: usize) {
    gauge!(EVENT_LOG_SIZE).set(size as f64);
}

/// Sets the monitor lifecycle state.
///
/// ```rust
/// use docwatch_core::metrics;
/// use docwatch_core::monitor::MonitorState;
///
/// metrics::set_monitor_status(MonitorState::Running);
/// ```
pub fn set_monitor_status(state: MonitorState) {
    gauge!(MONITOR_STATUS).set(f64::from(state as u8));
}

// ============================================================================
// Metric Helper Utilities
// ============================================================================

/// Records the elapsed time when dropped.
///
/// ```rust
/// use docwatch_core::metrics::{self, Timer};
///
/// {
///     let _timer = Timer::new("webhook", |duration, dest_type| {
///         metrics::record_delivery_duration(duration, dest_type);
///     });
///     // ... delivery ...
/// }
/// ```
pub struct Timer<F>
where
    F: FnOnce(Duration, &str),
{
    start: std::time::Instant,
    label: String,
    record_fn: Option<F>,
}

impl<F> Timer<F>
where
    F: FnOnce(Duration, &str),
{
    /// Creates a timer that records on drop.
    pub fn new(label: impl Into<String>, record_fn: F) -> Self {
        Self {
            start: std::time::Instant::now(),
            label: label.into(),
            record_fn: Some(record_fn),
        }
    }

    /// Time elapsed since the timer was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<F> Drop for Timer<F>
where
    F: FnOnce(Duration, &str),
{
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        if let Some(record_fn) = self.record_fn.take() {
            record_fn(duration, &self.label);
        }
    }
}
