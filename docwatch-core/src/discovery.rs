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

//! Collection discovery.

use crate::metrics;
use crate::source::DataSource;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Lists the collections that should be watched.
pub struct Discovery {
    source: Arc<dyn DataSource>,
    excluded: BTreeSet<String>,
}

impl Discovery {
    /// Creates a discovery over `source` that skips `excluded` names.
    pub fn new(source: Arc<dyn DataSource>, excluded: BTreeSet<String>) -> Self {
        Self { source, excluded }
    }

    /// Lists collections and drops excluded names.
    ///
    /// A failed listing is logged and yields an empty set; the next cycle
    /// tries again.
    pub async fn discover(&self) -> BTreeSet<String> {
        let names = match self.source.list_collections().await {
            Ok(names) => names,
            Err(e) => {
                metrics::increment_discovery_failures();
                warn!(source = self.source.name(), error = %e, "Collection discovery failed");
                return BTreeSet::new();
            }
        };

        let listed = names.len();
        let discovered: BTreeSet<String> = names
            .into_iter()
            .filter(|name| !self.excluded.contains(name))
            .collect();

        debug!(
            listed,
            watchable = discovered.len(),
            "Collections discovered"
        );
        discovered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{BatchStream, SourceError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct ListingSource {
        names: Vec<String>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl DataSource for ListingSource {
        async fn list_collections(&self) -> Result<Vec<String>, SourceError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(SourceError::listing_msg("server unavailable"));
            }
            Ok(self.names.clone())
        }

        async fn open_change_stream(&self, collection: &str) -> Result<BatchStream, SourceError> {
            Err(SourceError::open(collection, "not supported"))
        }
    }

    fn source(names: &[&str]) -> Arc<ListingSource> {
        Arc::new(ListingSource {
            names: names.iter().map(|s| s.to_string()).collect(),
            fail: AtomicBool::new(false),
        })
    }

    #[tokio::test]
    async fn test_discover_filters_exclusions() {
        let excluded = BTreeSet::from(["orders".to_string()]);
        let discovery = Discovery::new(source(&["notes", "orders", "tasks"]), excluded);

        let found = discovery.discover().await;
        assert_eq!(
            found,
            BTreeSet::from(["notes".to_string(), "tasks".to_string()])
        );
    }

    #[tokio::test]
    async fn test_discover_failure_yields_empty_set() {
        let src = source(&["notes"]);
        let discovery = Discovery::new(src.clone(), BTreeSet::new());

        src.fail.store(true, Ordering::SeqCst);
        assert!(discovery.discover().await.is_empty());

        src.fail.store(false, Ordering::SeqCst);
        assert_eq!(discovery.discover().await.len(), 1);
    }
}
