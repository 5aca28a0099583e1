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

//! Lifecycle controller.
//!
//! The [`Monitor`] ties discovery, the watch manager and the event sink
//! together and drives them through
//! `Stopped → Starting → Running → Stopping → Stopped`.
//!
//! # Starting
//!
//! 1. Tear down any existing subscriptions
//! 2. Discover collections once
//! 3. Subscribe to each, one at a time, pausing between them
//! 4. Arm the control loop (periodic discovery and due re-subscriptions)
//!
//! # Stopping
//!
//! The control loop is shut down, every stream and pending retry is
//! cancelled, the previous-value cache is cleared and the destination is
//! closed.
//!
//! # Example
//!
//! ```rust,no_run
//! use docwatch_core::config::MonitorConfig;
//! use docwatch_core::monitor::Monitor;
//! # use docwatch_core::source::DataSource;
//! # use std::sync::Arc;
//!
//! # async fn example(source: Arc<dyn DataSource>) -> Result<(), Box<dyn std::error::Error>> {
//! let monitor = Monitor::new(MonitorConfig::default(), source, None)?;
//!
//! monitor
//!     .run_until(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::config::{ConfigError, MonitorConfig};
use crate::destination::Destination;
use crate::diff::DiffEngine;
use crate::discovery::Discovery;
use crate::metrics;
use crate::sink::{EventSink, SharedEventLog};
use crate::source::DataSource;
use crate::stats::{MonitorStats, StatsCounters};
use crate::watcher::WatchManager;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

/// Lifecycle state of the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MonitorState {
    /// Nothing is watched
    Stopped = 0,
    /// Initial discovery and subscriptions in progress
    Starting = 1,
    /// Streams are consumed and discovery runs periodically
    Running = 2,
    /// Teardown in progress
    Stopping = 3,
}

impl MonitorState {
    /// Returns the state as a static string for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

/// Monitor errors.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// `start` was called while not stopped
    #[error("Monitor is already running")]
    AlreadyRunning,

    /// Configuration error
    #[error(transparent)]
    Configuration(#[from] ConfigError),
}

struct ControlLoop {
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

/// Watches every discovered collection and forwards changes.
pub struct Monitor {
    config: MonitorConfig,
    discovery: Arc<Discovery>,
    manager: Arc<WatchManager>,
    retry_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    control: std::sync::Mutex<Option<ControlLoop>>,
    state: Arc<RwLock<MonitorState>>,
    stats: Arc<StatsCounters>,
}

impl Monitor {
    /// Creates a stopped monitor.
    ///
    /// Without a destination, events are only kept in the event log.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Configuration`] if `config` is invalid.
    pub fn new(
        config: MonitorConfig,
        source: Arc<dyn DataSource>,
        destination: Option<Arc<dyn Destination>>,
    ) -> Result<Self, MonitorError> {
        config.validate()?;

        info!(
            source = source.name(),
            destination = ?destination.as_ref().map(|d| d.metadata().name),
            excluded = ?config.excluded_collections,
            max_events = config.max_events_in_memory,
            discovery_interval = ?config.discovery_interval,
            monitoring_enabled = config.monitoring_enabled,
            "Creating monitor"
        );

        let stats = Arc::new(StatsCounters::default());
        let sink = EventSink::new(
            config.max_events_in_memory,
            destination,
            config.monitoring_enabled,
            Arc::clone(&stats),
        );
        let engine = DiffEngine::new(config.source_tag.clone());
        let (manager, retry_rx) = WatchManager::new(
            Arc::clone(&source),
            engine,
            sink,
            config.resubscribe_delay,
            Arc::clone(&stats),
        );
        let discovery = Arc::new(Discovery::new(source, config.excluded_collections.clone()));

        Ok(Self {
            config,
            discovery,
            manager,
            retry_rx: Arc::new(Mutex::new(retry_rx)),
            control: std::sync::Mutex::new(None),
            state: Arc::new(RwLock::new(MonitorState::Stopped)),
            stats,
        })
    }

    async fn set_state(&self, state: MonitorState) {
        *self.state.write().await = state;
        metrics::set_monitor_status(state);
        debug!(state = state.as_str(), "Monitor state changed");
    }

    /// Discovers and subscribes, then arms the control loop.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::AlreadyRunning`] unless the monitor is stopped.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<(), MonitorError> {
        {
            let mut state = self.state.write().await;
            if *state != MonitorState::Stopped {
                return Err(MonitorError::AlreadyRunning);
            }
            *state = MonitorState::Starting;
        }
        metrics::set_monitor_status(MonitorState::Starting);
        info!("Starting monitor");

        self.manager.unsubscribe_all().await;
        self.drain_retry_queue().await;

        let collections = self.discovery.discover().await;
        info!(count = collections.len(), "Initial discovery complete");

        for (i, name) in collections.iter().enumerate() {
            if i > 0 && !self.config.subscribe_pause.is_zero() {
                tokio::time::sleep(self.config.subscribe_pause).await;
            }
            self.manager.subscribe(name).await;
        }

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(control_loop(
            Arc::clone(&self.discovery),
            Arc::clone(&self.manager),
            Arc::clone(&self.retry_rx),
            self.config.discovery_interval,
            shutdown_rx,
        ));
        *self.control.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(ControlLoop { shutdown_tx, task });

        self.set_state(MonitorState::Running).await;
        info!(
            watched = self.manager.watched_collections().len(),
            "Monitor running"
        );

        Ok(())
    }

    /// Tears everything down and returns to `Stopped`.
    ///
    /// Safe to call in any state; a stopped monitor is left untouched.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        {
            let mut state = self.state.write().await;
            if *state == MonitorState::Stopped {
                debug!("Monitor is not running");
                return;
            }
            *state = MonitorState::Stopping;
        }
        metrics::set_monitor_status(MonitorState::Stopping);
        info!("Stopping monitor");

        let control = self
            .control
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(control) = control {
            if control.shutdown_tx.send(()).is_err() {
                debug!("Control loop already exited");
            }
            if let Err(e) = control.task.await {
                error!(error = %e, "Control loop panicked");
            }
        }

        self.manager.unsubscribe_all().await;
        self.drain_retry_queue().await;

        if let Some(destination) = self.manager.sink().destination() {
            if let Err(e) = destination.close().await {
                warn!(error = %e, "Failed to close destination");
            }
        }

        self.set_state(MonitorState::Stopped).await;

        let stats = self.stats.snapshot();
        info!(
            events_recorded = stats.events_recorded,
            deliveries_succeeded = stats.deliveries_succeeded,
            deliveries_failed = stats.deliveries_failed,
            stream_failures = stats.stream_failures,
            "Monitor stopped"
        );
    }

    /// Runs the whole lifecycle until `shutdown` resolves.
    ///
    /// Waits the configured startup delay, starts, keeps running until the
    /// shutdown future completes, then stops. A shutdown that arrives during
    /// the delay or while starting is honored right away.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::AlreadyRunning`] if the monitor was not stopped.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<(), MonitorError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let delay = self.config.startup_delay;
        if !delay.is_zero() {
            info!(delay_ms = delay.as_millis() as u64, "Waiting before first discovery");
            tokio::select! {
                () = &mut shutdown => {
                    info!("Shutdown requested before startup");
                    return Ok(());
                }
                () = tokio::time::sleep(delay) => {}
            }
        }

        tokio::select! {
            result = self.start() => result?,
            () = &mut shutdown => {
                info!("Shutdown requested during startup");
                self.stop().await;
                return Ok(());
            }
        }

        shutdown.await;
        info!("Shutdown requested");
        self.stop().await;
        Ok(())
    }

    /// Runs one discovery cycle and subscribes to new collections.
    ///
    /// Returns how many streams were opened.
    pub async fn discover_new(&self) -> usize {
        discover_new(&self.discovery, &self.manager).await
    }

    /// Lists watchable collections without subscribing.
    pub async fn discover(&self) -> BTreeSet<String> {
        self.discovery.discover().await
    }

    /// Subscribes to one collection. No-op if it is already watched.
    pub async fn subscribe(&self, name: &str) -> bool {
        self.manager.subscribe(name).await
    }

    /// Cancels every stream and pending retry and clears the cache.
    pub async fn unsubscribe_all(&self) {
        self.manager.unsubscribe_all().await;
    }

    async fn drain_retry_queue(&self) {
        let mut retry_rx = self.retry_rx.lock().await;
        let mut dropped = 0usize;
        while retry_rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "Discarded due re-subscriptions");
        }
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> MonitorState {
        *self.state.read().await
    }

    /// Watched collection names, sorted.
    #[must_use]
    pub fn watched_collections(&self) -> Vec<String> {
        self.manager.watched_collections()
    }

    /// Collections waiting for a delayed re-subscription, sorted.
    #[must_use]
    pub fn pending_retries(&self) -> Vec<String> {
        self.manager.pending_retries()
    }

    /// Running counters.
    #[must_use]
    pub fn stats(&self) -> MonitorStats {
        self.stats.snapshot()
    }

    /// Handle to the in-memory event log.
    #[must_use]
    pub fn event_log(&self) -> SharedEventLog {
        self.manager.sink().log().clone()
    }

    /// Number of documents with cached previous values.
    #[must_use]
    pub fn cached_documents(&self) -> usize {
        self.manager.engine().cached_documents()
    }

    /// The frozen configuration.
    #[must_use]
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }
}

async fn discover_new(discovery: &Discovery, manager: &Arc<WatchManager>) -> usize {
    let unseen: Vec<String> = discovery
        .discover()
        .await
        .into_iter()
        .filter(|name| !manager.is_watched(name))
        .collect();

    if unseen.is_empty() {
        debug!("No new collections");
        return 0;
    }

    info!(count = unseen.len(), collections = ?unseen, "New collections discovered");
    let mut opened = 0;
    for name in &unseen {
        if manager.subscribe(name).await {
            opened += 1;
        }
    }
    opened
}

async fn control_loop(
    discovery: Arc<Discovery>,
    manager: Arc<WatchManager>,
    retry_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut retry_rx = retry_rx.lock().await;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(period_ms = period.as_millis() as u64, "Control loop started");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Control loop stopping");
                break;
            }
            _ = ticker.tick() => {
                discover_new(&discovery, &manager).await;
            }
            Some(name) = retry_rx.recv() => {
                manager.retry_fired(&name);
                info!(collection = %name, "Re-subscribing after stream failure");
                manager.subscribe(&name).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{BatchStream, SourceError};
    use async_trait::async_trait;
    use futures::{stream, StreamExt};

    struct StaticSource(Vec<&'static str>);

    #[async_trait]
    impl DataSource for StaticSource {
        async fn list_collections(&self) -> Result<Vec<String>, SourceError> {
            Ok(self.0.iter().map(|s| s.to_string()).collect())
        }

        async fn open_change_stream(&self, _collection: &str) -> Result<BatchStream, SourceError> {
            Ok(stream::pending().boxed())
        }
    }

    fn config() -> MonitorConfig {
        MonitorConfig::builder()
            .subscribe_pause(Duration::ZERO)
            .startup_delay(Duration::ZERO)
            .build()
            .unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = MonitorConfig {
            max_events_in_memory: 0,
            ..MonitorConfig::default()
        };
        let result = Monitor::new(config, Arc::new(StaticSource(vec![])), None);
        assert!(matches!(result, Err(MonitorError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_start_and_stop_transitions() {
        let monitor = Monitor::new(config(), Arc::new(StaticSource(vec!["a", "b"])), None).unwrap();
        assert_eq!(monitor.state().await, MonitorState::Stopped);

        monitor.start().await.unwrap();
        assert_eq!(monitor.state().await, MonitorState::Running);
        assert_eq!(monitor.watched_collections(), vec!["a".to_string(), "b".to_string()]);

        monitor.stop().await;
        assert_eq!(monitor.state().await, MonitorState::Stopped);
        assert!(monitor.watched_collections().is_empty());
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let monitor = Monitor::new(config(), Arc::new(StaticSource(vec!["a"])), None).unwrap();
        monitor.start().await.unwrap();

        assert!(matches!(monitor.start().await, Err(MonitorError::AlreadyRunning)));
        monitor.stop().await;
    }

    #[tokio::test]
    async fn test_stop_when_stopped_is_noop() {
        let monitor = Monitor::new(config(), Arc::new(StaticSource(vec![])), None).unwrap();
        monitor.stop().await;
        assert_eq!(monitor.state().await, MonitorState::Stopped);
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let monitor = Monitor::new(config(), Arc::new(StaticSource(vec!["a"])), None).unwrap();
        monitor.start().await.unwrap();
        monitor.stop().await;
        monitor.start().await.unwrap();

        assert_eq!(monitor.watched_collections(), vec!["a".to_string()]);
        assert_eq!(monitor.stats().subscriptions_opened, 2);
        monitor.stop().await;
    }

    #[test]
    fn test_state_names() {
        assert_eq!(MonitorState::Running.as_str(), "running");
        assert_eq!(MonitorState::Stopping as u8, 3);
    }
}
