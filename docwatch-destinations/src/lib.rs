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

//! Docwatch Destinations - where normalized events are delivered
//!
//! Implementations of [`docwatch_core::destination::Destination`].
//!
//! # Available Destinations
//!
//! - **Webhook**: POSTs each event as JSON to an HTTP endpoint
//!
//! # Features
//!
//! - `webhook` - HTTP webhook destination (default)
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use docwatch_destinations::webhook::{WebhookConfig, WebhookDestination};
//! use std::time::Duration;
//!
//! let config = WebhookConfig::builder()
//!     .url("https://hooks.example.com/changes")
//!     .timeout(Duration::from_secs(5))
//!     .header("Authorization", "Bearer secret")
//!     .build()
//!     .unwrap();
//!
//! let destination = WebhookDestination::new(config).unwrap();
//! ```

#[cfg(feature = "webhook")]
pub mod webhook;

#[cfg(feature = "webhook")]
pub use webhook::{WebhookConfig, WebhookDestination};
