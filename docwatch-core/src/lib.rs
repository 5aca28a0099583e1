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

//! Docwatch Core - change watching and webhook forwarding
//!
//! This crate watches every collection a document database exposes, turns
//! raw change notifications into normalized create/update/delete events and
//! hands them to a destination, usually a webhook.
//!
//! # Key Components
//!
//! - **Events**: [`event`] defines change records and the normalized event shape
//! - **Diff engine**: [`diff`] classifies records and tracks previous values
//! - **Registry**: [`registry`] tracks which collections are watched
//! - **Discovery**: [`discovery`] lists watchable collections
//! - **Watcher**: [`watcher`] owns the change streams and their retries
//! - **Sink**: [`sink`] keeps the bounded event log and dispatches deliveries
//! - **Monitor**: [`monitor`] drives the whole lifecycle
//! - **Traits**: [`source::DataSource`] and [`destination::Destination`]
//!
//! # Example
//!
//! ```rust
//! use docwatch_core::diff::DiffEngine;
//! use docwatch_core::event::{ChangeRecord, EventType};
//!
//! let engine = DiffEngine::new("docwatch");
//! let events = engine.diff("notes", vec![ChangeRecord::removed("d1")]);
//!
//! assert_eq!(events[0].event_type, EventType::Delete);
//! assert!(events[0].old_data.is_none());
//! ```

pub mod config;
pub mod destination;
pub mod diff;
pub mod discovery;
pub mod event;
pub mod metrics;
pub mod monitor;
pub mod registry;
pub mod sink;
pub mod source;
pub mod stats;
pub mod watcher;
