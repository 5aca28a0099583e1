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

//! Webhook destination.
//!
//! Sends every normalized event as a single JSON `POST` to a configured
//! endpoint. Any 2xx response counts as delivered. Anything else is
//! returned as a
//! [`DestinationError`](docwatch_core::destination::DestinationError)
//! and the caller decides what to do with it (the monitor logs and drops).
//!
//! # Request shape
//!
//! ```text
//! POST <url>
//! Content-Type: application/json
//! User-Agent: docwatch/<version>
//!
//! {"eventType":"update","collection":"notes","documentId":"d1",
//!  "timestamp":"...","oldData":{...},"newData":{...},
//!  "metadata":{"changeType":"modified","source":"docwatch"}}
//! ```

mod config;
mod destination;

pub use config::{WebhookConfig, WebhookConfigBuilder, DEFAULT_TIMEOUT, DEFAULT_USER_AGENT};
pub use destination::WebhookDestination;
