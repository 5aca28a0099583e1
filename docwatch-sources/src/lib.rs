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

//! Docwatch Sources - change sources for the docwatch monitor
//!
//! Implementations of [`docwatch_core::source::DataSource`]:
//!
//! - [`memory::MemorySource`]: in-process collections, for development and tests
//! - [`mongodb::MongoSource`]: MongoDB change streams (feature `mongodb`, enabled by default)
//!
//! # Example
//!
//! ```rust
//! use docwatch_core::config::MonitorConfig;
//! use docwatch_core::monitor::Monitor;
//! use docwatch_sources::memory::MemorySource;
//! use std::sync::Arc;
//!
//! let source = Arc::new(MemorySource::new());
//! source.create_collection("notes");
//!
//! let monitor = Monitor::new(MonitorConfig::default(), source, None).unwrap();
//! assert!(monitor.watched_collections().is_empty());
//! ```

pub mod memory;

#[cfg(feature = "mongodb")]
pub mod mongodb;

pub use memory::MemorySource;

#[cfg(feature = "mongodb")]
pub use self::mongodb::MongoSource;
