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

//! Data source abstraction.
//!
//! A [`DataSource`] exposes the two capabilities the monitor needs from the
//! document database: listing collections and opening a change stream on
//! one of them.
//!
//! # Stream contract
//!
//! [`DataSource::open_change_stream`] returns a [`BatchStream`]. The first
//! batch it yields describes the current contents of the collection, not a
//! change; consumers must discard it. Every later batch carries real changes
//! in the order the source observed them.
//!
//! An `Err` item ends the stream. A stream that simply ends is treated the
//! same way by the watcher.
//!
//! # Implementing a source
//!
//! ```rust
//! use async_trait::async_trait;
//! use docwatch_core::source::{BatchStream, DataSource, SourceError};
//!
//! struct Empty;
//!
//! #[async_trait]
//! impl DataSource for Empty {
//!     async fn list_collections(&self) -> Result<Vec<String>, SourceError> {
//!         Ok(Vec::new())
//!     }
//!
//!     async fn open_change_stream(&self, collection: &str) -> Result<BatchStream, SourceError> {
//!         Err(SourceError::open(collection, "no such collection"))
//!     }
//! }
//! ```

use crate::event::ChangeBatch;
use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

/// Live sequence of change batches for one collection.
pub type BatchStream = BoxStream<'static, Result<ChangeBatch, SourceError>>;

/// Errors raised by a data source.
#[derive(Error, Debug)]
pub enum SourceError {
    /// Could not establish the connection at startup
    #[error("Connection error: {message}")]
    Connection {
        /// Human-readable error message
        message: String,
        /// The underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Listing collections failed
    #[error("Failed to list collections: {message}")]
    Listing {
        /// Human-readable error message
        message: String,
        /// The underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Opening a change stream failed
    #[error("Failed to open change stream on '{collection}': {message}")]
    Open {
        /// Collection the stream was requested for
        collection: String,
        /// Human-readable error message
        message: String,
    },

    /// An open stream failed
    #[error("Change stream error on '{collection}': {message}")]
    Stream {
        /// Collection the stream belongs to
        collection: String,
        /// Human-readable error message
        message: String,
    },

    /// The source invalidated the stream, e.g. the collection was dropped
    #[error("Change stream on '{collection}' was invalidated")]
    Invalidated {
        /// Collection the stream belongs to
        collection: String,
    },
}

impl SourceError {
    /// Creates a connection error from any error type.
    #[must_use]
    pub fn connection(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Connection {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a connection error with a custom message.
    #[must_use]
    pub fn connection_msg(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a listing error from any error type.
    #[must_use]
    pub fn listing(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Listing {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a listing error with a custom message.
    #[must_use]
    pub fn listing_msg(message: impl Into<String>) -> Self {
        Self::Listing {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a stream-open error.
    #[must_use]
    pub fn open(collection: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Open {
            collection: collection.into(),
            message: message.into(),
        }
    }

    /// Creates an error for a failure on an open stream.
    #[must_use]
    pub fn stream(collection: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Stream {
            collection: collection.into(),
            message: message.into(),
        }
    }

    /// Short label used for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "connection",
            Self::Listing { .. } => "listing",
            Self::Open { .. } => "open",
            Self::Stream { .. } => "stream",
            Self::Invalidated { .. } => "invalidated",
        }
    }
}

/// Capability set the monitor needs from the document database.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Lists every collection the source exposes.
    async fn list_collections(&self) -> Result<Vec<String>, SourceError>;

    /// Opens a change stream scoped to `collection`.
    ///
    /// The first batch of the returned stream is the present state of the
    /// collection. Dropping the stream closes it.
    async fn open_change_stream(&self, collection: &str) -> Result<BatchStream, SourceError>;

    /// Name used in logs.
    fn name(&self) -> &str {
        "unknown"
    }
}
