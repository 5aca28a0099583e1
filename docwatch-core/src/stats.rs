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

//! Running counters kept by the monitor.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the monitor counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorStats {
    /// Events appended to the event log
    pub events_recorded: u64,

    /// Deliveries the destination accepted
    pub deliveries_succeeded: u64,

    /// Deliveries that failed and were dropped
    pub deliveries_failed: u64,

    /// Streams that failed or ended after opening
    pub stream_failures: u64,

    /// Change streams opened
    pub subscriptions_opened: u64,
}

/// Shared counters updated by the watch tasks and the sink.
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    events_recorded: AtomicU64,
    deliveries_succeeded: AtomicU64,
    deliveries_failed: AtomicU64,
    stream_failures: AtomicU64,
    subscriptions_opened: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn event_recorded(&self) {
        self.events_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn delivery_succeeded(&self) {
        self.deliveries_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn delivery_failed(&self) {
        self.deliveries_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn stream_failed(&self) {
        self.stream_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn subscription_opened(&self) {
        self.subscriptions_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> MonitorStats {
        MonitorStats {
            events_recorded: self.events_recorded.load(Ordering::Relaxed),
            deliveries_succeeded: self.deliveries_succeeded.load(Ordering::Relaxed),
            deliveries_failed: self.deliveries_failed.load(Ordering::Relaxed),
            stream_failures: self.stream_failures.load(Ordering::Relaxed),
            subscriptions_opened: self.subscriptions_opened.load(Ordering::Relaxed),
        }
    }
}
