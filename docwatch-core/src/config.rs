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

//! Monitor configuration.
//!
//! [`MonitorConfig`] is frozen once the monitor is constructed. Build it with
//! [`MonitorConfig::builder`], or deserialize it; durations are given in
//! milliseconds and missing fields take their defaults.
//!
//! ```rust
//! use docwatch_core::config::MonitorConfig;
//! use std::time::Duration;
//!
//! let config = MonitorConfig::builder()
//!     .exclude_collection("orders")
//!     .max_events_in_memory(500)
//!     .discovery_interval(Duration::from_secs(10))
//!     .build()
//!     .unwrap();
//!
//! assert!(config.is_excluded("orders"));
//! assert_eq!(config.resubscribe_delay, Duration::from_secs(5));
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;

/// Default number of events kept in memory.
pub const DEFAULT_MAX_EVENTS: usize = 1000;

/// Default tag written into `metadata.source`.
pub const DEFAULT_SOURCE_TAG: &str = "docwatch";

/// Invalid configuration value.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid configuration for '{field}': {message}")]
pub struct ConfigError {
    /// Name of the offending field
    pub field: &'static str,
    /// What is wrong with it
    pub message: String,
}

impl ConfigError {
    /// Creates a configuration error for `field`.
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Settings consumed by the [`Monitor`](crate::monitor::Monitor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Whether events are delivered to the destination
    pub monitoring_enabled: bool,

    /// Collections never watched
    pub excluded_collections: BTreeSet<String>,

    /// Capacity of the event log
    pub max_events_in_memory: usize,

    /// Period of the discovery loop
    #[serde(with = "millis", rename = "discovery_interval_ms")]
    pub discovery_interval: Duration,

    /// Wait before re-subscribing after a stream failure
    #[serde(with = "millis", rename = "resubscribe_delay_ms")]
    pub resubscribe_delay: Duration,

    /// Pause between initial subscriptions at startup
    #[serde(with = "millis", rename = "subscribe_pause_ms")]
    pub subscribe_pause: Duration,

    /// Wait before the first discovery after boot
    #[serde(with = "millis", rename = "startup_delay_ms")]
    pub startup_delay: Duration,

    /// Tag written into every event's `metadata.source`
    pub source_tag: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            monitoring_enabled: true,
            excluded_collections: BTreeSet::new(),
            max_events_in_memory: DEFAULT_MAX_EVENTS,
            discovery_interval: Duration::from_secs(30),
            resubscribe_delay: Duration::from_secs(5),
            subscribe_pause: Duration::from_millis(100),
            startup_delay: Duration::from_secs(3),
            source_tag: DEFAULT_SOURCE_TAG.to_string(),
        }
    }
}

impl MonitorConfig {
    /// Creates a new builder starting from the defaults.
    #[must_use]
    pub fn builder() -> MonitorConfigBuilder {
        MonitorConfigBuilder::default()
    }

    /// Returns true if `collection` must never be watched.
    pub fn is_excluded(&self, collection: &str) -> bool {
        self.excluded_collections.contains(collection)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// - `max_events_in_memory` is 0
    /// - `discovery_interval` or `resubscribe_delay` is zero
    /// - `source_tag` is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_events_in_memory == 0 {
            return Err(ConfigError::new(
                "max_events_in_memory",
                "must be greater than 0",
            ));
        }

        if self.discovery_interval.is_zero() {
            return Err(ConfigError::new(
                "discovery_interval",
                "must be greater than 0",
            ));
        }

        if self.resubscribe_delay.is_zero() {
            return Err(ConfigError::new(
                "resubscribe_delay",
                "must be greater than 0",
            ));
        }

        if self.source_tag.trim().is_empty() {
            return Err(ConfigError::new("source_tag", "must not be empty"));
        }

        Ok(())
    }
}

/// Builder for [`MonitorConfig`].
#[derive(Debug, Default)]
pub struct MonitorConfigBuilder {
    config: MonitorConfig,
}

impl MonitorConfigBuilder {
    /// Enables or disables delivery.
    #[must_use]
    pub fn monitoring_enabled(mut self, enabled: bool) -> Self {
        self.config.monitoring_enabled = enabled;
        self
    }

    /// Excludes one collection.
    #[must_use]
    pub fn exclude_collection(mut self, name: impl Into<String>) -> Self {
        self.config.excluded_collections.insert(name.into());
        self
    }

    /// Replaces the exclusion set.
    #[must_use]
    pub fn excluded_collections<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.excluded_collections = names.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the event log capacity.
    #[must_use]
    pub fn max_events_in_memory(mut self, max: usize) -> Self {
        self.config.max_events_in_memory = max;
        self
    }

    /// Sets the discovery period.
    #[must_use]
    pub fn discovery_interval(mut self, interval: Duration) -> Self {
        self.config.discovery_interval = interval;
        self
    }

    /// Sets the re-subscribe delay.
    #[must_use]
    pub fn resubscribe_delay(mut self, delay: Duration) -> Self {
        self.config.resubscribe_delay = delay;
        self
    }

    /// Sets the pause between initial subscriptions.
    #[must_use]
    pub fn subscribe_pause(mut self, pause: Duration) -> Self {
        self.config.subscribe_pause = pause;
        self
    }

    /// Sets the startup delay.
    #[must_use]
    pub fn startup_delay(mut self, delay: Duration) -> Self {
        self.config.startup_delay = delay;
        self
    }

    /// Sets the source tag.
    #[must_use]
    pub fn source_tag(mut self, tag: impl Into<String>) -> Self {
        self.config.source_tag = tag.into();
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if validation fails.
    pub fn build(self) -> Result<MonitorConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MonitorConfig::default();
        assert!(config.monitoring_enabled);
        assert!(config.excluded_collections.is_empty());
        assert_eq!(config.max_events_in_memory, 1000);
        assert_eq!(config.discovery_interval, Duration::from_secs(30));
        assert_eq!(config.resubscribe_delay, Duration::from_secs(5));
        assert_eq!(config.subscribe_pause, Duration::from_millis(100));
        assert_eq!(config.startup_delay, Duration::from_secs(3));
        assert_eq!(config.source_tag, "docwatch");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_rejects_zero_capacity() {
        let err = MonitorConfig::builder()
            .max_events_in_memory(0)
            .build()
            .unwrap_err();
        assert_eq!(err.field, "max_events_in_memory");
    }

    #[test]
    fn test_builder_rejects_zero_interval() {
        let err = MonitorConfig::builder()
            .discovery_interval(Duration::ZERO)
            .build()
            .unwrap_err();
        assert_eq!(err.field, "discovery_interval");
        assert_eq!(
            err.to_string(),
            "Invalid configuration for 'discovery_interval': must be greater than 0"
        );
    }

    #[test]
    fn test_builder_rejects_empty_source_tag() {
        let err = MonitorConfig::builder().source_tag("  ").build().unwrap_err();
        assert_eq!(err.field, "source_tag");
    }

    #[test]
    fn test_exclusions() {
        let config = MonitorConfig::builder()
            .excluded_collections(["orders", "audit"])
            .build()
            .unwrap();
        assert!(config.is_excluded("orders"));
        assert!(config.is_excluded("audit"));
        assert!(!config.is_excluded("notes"));
    }

    #[test]
    fn test_deserialize_partial_uses_defaults() {
        let config: MonitorConfig = serde_json::from_str(
            r#"{ "excluded_collections": ["orders"], "discovery_interval_ms": 1500 }"#,
        )
        .unwrap();

        assert!(config.is_excluded("orders"));
        assert_eq!(config.discovery_interval, Duration::from_millis(1500));
        assert_eq!(config.max_events_in_memory, 1000);
        assert!(config.monitoring_enabled);
    }
}
