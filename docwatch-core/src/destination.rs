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

//! Destination trait for delivering normalized events.
//!
//! A destination receives one [`NormalizedEvent`] per call. The event sink
//! shares a single destination across every watch task as
//! `Arc<dyn Destination>`, so several deliveries may be in flight at once and
//! implementations take `&self`.
//!
//! Delivery is attempted exactly once. A failed delivery is logged by the
//! sink and dropped; destinations must not retry internally.
//!
//! # Implementing a destination
//!
//! ```rust
//! use async_trait::async_trait;
//! use docwatch_core::destination::{Destination, DestinationError, DestinationMetadata};
//! use docwatch_core::event::NormalizedEvent;
//!
//! struct Stdout;
//!
//! #[async_trait]
//! impl Destination for Stdout {
//!     async fn send_event(&self, event: &NormalizedEvent) -> Result<(), DestinationError> {
//!         let body = serde_json::to_string(event)
//!             .map_err(|e| DestinationError::serialization(e, "event to JSON"))?;
//!         println!("{body}");
//!         Ok(())
//!     }
//!
//!     fn metadata(&self) -> DestinationMetadata {
//!         DestinationMetadata::new("Stdout", "stdout")
//!     }
//! }
//! ```

use crate::event::NormalizedEvent;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when delivering an event.
#[derive(Error, Debug)]
pub enum DestinationError {
    /// The endpoint could not be reached.
    ///
    /// Examples include DNS failures, refused connections and TLS errors.
    #[error("Connection error: {message}")]
    ConnectionError {
        /// Human-readable error message
        message: String,
        /// The underlying connection error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The request did not complete within the configured timeout.
    #[error("Request timed out after {timeout:?}")]
    Timeout {
        /// Timeout that elapsed
        timeout: Duration,
    },

    /// The endpoint answered with a non-success status.
    #[error("Endpoint rejected event with status {status}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Response body, if one could be read
        body: Option<String>,
    },

    /// The event could not be serialized.
    #[error("Serialization error: {message}")]
    SerializationError {
        /// Human-readable error message
        message: String,
        /// The underlying serialization error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Invalid destination configuration.
    #[error("Configuration error: {message}")]
    ConfigurationError {
        /// Human-readable error message
        message: String,
        /// Configuration parameter name if applicable
        parameter: Option<String>,
    },
}

impl DestinationError {
    /// Creates a connection error from any error type.
    #[must_use]
    pub fn connection(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::ConnectionError {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a connection error with a custom message.
    #[must_use]
    pub fn connection_msg(message: impl Into<String>) -> Self {
        Self::ConnectionError {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a rejection error.
    #[must_use]
    pub fn rejected(status: u16, body: Option<String>) -> Self {
        Self::Rejected { status, body }
    }

    /// Creates a serialization error from any error type.
    #[must_use]
    pub fn serialization(
        source: impl std::error::Error + Send + Sync + 'static,
        message: impl Into<String>,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>, parameter: Option<String>) -> Self {
        Self::ConfigurationError {
            message: message.into(),
            parameter,
        }
    }

    /// HTTP status of the response, when the endpoint answered.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Response body of a rejection, when one was read.
    #[must_use]
    pub fn body(&self) -> Option<&str> {
        match self {
            Self::Rejected { body, .. } => body.as_deref(),
            _ => None,
        }
    }

    /// Short label used for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionError { .. } => "connection",
            Self::Timeout { .. } => "timeout",
            Self::Rejected { .. } => "rejected",
            Self::SerializationError { .. } => "serialization",
            Self::ConfigurationError { .. } => "configuration",
        }
    }
}

/// Descriptive information about a destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationMetadata {
    /// Human-readable destination name (e.g., "Webhook")
    pub name: String,

    /// Destination type identifier (e.g., "webhook")
    pub destination_type: String,

    /// Additional destination-specific metadata
    pub properties: HashMap<String, String>,
}

impl DestinationMetadata {
    /// Creates new metadata with required fields.
    #[must_use]
    pub fn new(name: impl Into<String>, destination_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            destination_type: destination_type.into(),
            properties: HashMap::new(),
        }
    }

    /// Adds a custom property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Receives normalized events.
///
/// Implementations must be `Send + Sync` because the sink calls
/// [`send_event`](Self::send_event) from many tasks concurrently.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Delivers one event.
    ///
    /// Called once per event. Errors are logged by the caller and the event
    /// is not retried.
    async fn send_event(&self, event: &NormalizedEvent) -> Result<(), DestinationError>;

    /// Releases resources. Called once during shutdown.
    async fn close(&self) -> Result<(), DestinationError> {
        Ok(())
    }

    /// Returns metadata about this destination.
    fn metadata(&self) -> DestinationMetadata {
        DestinationMetadata::new("Unknown", "unknown")
    }
}

/// In-memory destination for tests.
///
/// Records every accepted event and can be told to reject deliveries with a
/// fixed status or to fail as if the endpoint were unreachable.
///
/// ```rust
/// # use docwatch_core::destination::{Destination, MockDestination};
/// let mock = MockDestination::new().with_rejection(500);
/// assert_eq!(mock.attempts(), 0);
/// ```
#[derive(Debug, Default)]
pub struct MockDestination {
    events: Mutex<Vec<NormalizedEvent>>,
    attempts: AtomicUsize,
    close_count: AtomicUsize,
    reject_status: Mutex<Option<u16>>,
    fail_connections: bool,
    latency: Option<Duration>,
    metadata: Option<DestinationMetadata>,
}

impl MockDestination {
    /// Creates a mock that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects every delivery with `status`.
    #[must_use]
    pub fn with_rejection(self, status: u16) -> Self {
        self.set_rejection(Some(status));
        self
    }

    /// Fails every delivery with a connection error.
    #[must_use]
    pub const fn with_connection_failures(mut self) -> Self {
        self.fail_connections = true;
        self
    }

    /// Waits `latency` before answering each delivery.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Sets custom metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: DestinationMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Changes the rejection status; `None` accepts again.
    pub fn set_rejection(&self, status: Option<u16>) {
        *self
            .reject_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = status;
    }

    /// Returns every accepted event, in arrival order.
    #[must_use]
    pub fn events(&self) -> Vec<NormalizedEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of accepted events.
    #[must_use]
    pub fn total_events_sent(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of delivery attempts, accepted or not.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Number of times close was called.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Destination for MockDestination {
    async fn send_event(&self, event: &NormalizedEvent) -> Result<(), DestinationError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if self.fail_connections {
            return Err(DestinationError::connection_msg(
                "Simulated connection failure",
            ));
        }

        let rejection = *self
            .reject_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(status) = rejection {
            return Err(DestinationError::rejected(
                status,
                Some("Simulated rejection".to_string()),
            ));
        }

        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), DestinationError> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn metadata(&self) -> DestinationMetadata {
        self.metadata
            .clone()
            .unwrap_or_else(|| DestinationMetadata::new("MockDestination", "mock"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ChangeKind, EventMetadata, EventType};
    use chrono::Utc;

    fn create_test_event(id: &str) -> NormalizedEvent {
        NormalizedEvent {
            event_type: EventType::Delete,
            collection: "notes".to_string(),
            document_id: id.to_string(),
            timestamp: Utc::now(),
            old_data: None,
            new_data: None,
            metadata: EventMetadata {
                change_type: ChangeKind::Removed,
                source: "docwatch".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_mock_destination_records_events() {
        let dest = MockDestination::new();

        dest.send_event(&create_test_event("d1")).await.unwrap();
        dest.send_event(&create_test_event("d2")).await.unwrap();

        assert_eq!(dest.total_events_sent(), 2);
        assert_eq!(dest.attempts(), 2);
        assert_eq!(dest.events()[1].document_id, "d2");
    }

    #[tokio::test]
    async fn test_mock_destination_rejection() {
        let dest = MockDestination::new().with_rejection(500);

        let err = dest.send_event(&create_test_event("d1")).await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert_eq!(err.body(), Some("Simulated rejection"));
        assert_eq!(err.kind(), "rejected");
        assert_eq!(dest.total_events_sent(), 0);
        assert_eq!(dest.attempts(), 1);

        dest.set_rejection(None);
        dest.send_event(&create_test_event("d2")).await.unwrap();
        assert_eq!(dest.total_events_sent(), 1);
    }

    #[tokio::test]
    async fn test_mock_destination_connection_failure() {
        let dest = MockDestination::new().with_connection_failures();

        let err = dest.send_event(&create_test_event("d1")).await.unwrap_err();
        assert!(matches!(err, DestinationError::ConnectionError { .. }));
        assert_eq!(err.status(), None);
    }

    #[tokio::test]
    async fn test_mock_destination_close_and_metadata() {
        let dest = MockDestination::new();
        dest.close().await.unwrap();
        assert_eq!(dest.close_count(), 1);
        assert_eq!(dest.metadata().destination_type, "mock");

        let dest = MockDestination::new()
            .with_metadata(DestinationMetadata::new("Hook", "webhook").with_property("url", "x"));
        assert_eq!(dest.metadata().name, "Hook");
        assert_eq!(dest.metadata().properties["url"], "x");
    }

    #[test]
    fn test_error_display() {
        let err = DestinationError::Timeout {
            timeout: Duration::from_secs(10),
        };
        assert_eq!(err.to_string(), "Request timed out after 10s");
        assert_eq!(
            DestinationError::rejected(404, None).to_string(),
            "Endpoint rejected event with status 404"
        );
    }
}
