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

//! MongoDB data source.
//!
//! Lists the collections of one database and opens a change stream per
//! collection. MongoDB change streams carry no initial state, so each
//! stream yields one empty batch as soon as it is open, standing in for
//! the snapshot the monitor discards. After that it yields one
//! single-record batch per change event.
//!
//! Document changes without a `documentKey._id` are logged and skipped.
//!
//! Update events are requested with `fullDocument: updateLookup` so that
//! modified records carry the whole document. Change streams require a
//! replica set or sharded cluster.
//!
//! # Examples
//!
//! ```rust,no_run
//! use docwatch_sources::mongodb::MongoSource;
//! use docwatch_core::source::DataSource;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let source = MongoSource::connect("mongodb://localhost:27017/?replicaSet=rs0", "app").await?;
//! let collections = source.list_collections().await?;
//! println!("watchable: {collections:?}");
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use docwatch_core::event::{ChangeBatch, ChangeKind, ChangeRecord, Fields};
use docwatch_core::source::{BatchStream, DataSource, SourceError};
use futures::{stream, Stream, StreamExt};
use mongodb::bson::{doc, Bson, Document};
use mongodb::change_stream::event::{ChangeStreamEvent, OperationType};
use mongodb::options::{ChangeStreamOptions, FullDocumentType};
use mongodb::{Client, Collection, Database};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Prefix of server-internal collections, which are never watched.
const SYSTEM_PREFIX: &str = "system.";

/// Change source backed by a MongoDB database.
#[derive(Clone, Debug)]
pub struct MongoSource {
    database: Database,
}

impl MongoSource {
    /// Connects to `uri` and verifies the connection with a `ping`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Connection`] if the URI is invalid or the
    /// server does not answer.
    pub async fn connect(uri: &str, database: &str) -> Result<Self, SourceError> {
        let client = Client::with_uri_str(uri)
            .await
            .map_err(SourceError::connection)?;
        let database = client.database(database);

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(SourceError::connection)?;

        info!(database = %database.name(), "Connected to MongoDB");
        Ok(Self { database })
    }

    /// Wraps an existing database handle without checking connectivity.
    #[must_use]
    pub fn from_database(database: Database) -> Self {
        Self { database }
    }

    /// The watched database.
    pub fn database(&self) -> &Database {
        &self.database
    }
}

#[async_trait]
impl DataSource for MongoSource {
    async fn list_collections(&self) -> Result<Vec<String>, SourceError> {
        let mut names = self
            .database
            .list_collection_names()
            .await
            .map_err(SourceError::listing)?;
        names.retain(|name| !name.starts_with(SYSTEM_PREFIX));
        names.sort();
        Ok(names)
    }

    async fn open_change_stream(&self, collection: &str) -> Result<BatchStream, SourceError> {
        let coll: Collection<Document> = self.database.collection(collection);

        let mut options = ChangeStreamOptions::default();
        options.full_document = Some(FullDocumentType::UpdateLookup);

        let changes = coll
            .watch()
            .with_options(options)
            .await
            .map_err(|e| SourceError::open(collection, e.to_string()))?;

        debug!(collection, "MongoDB change stream opened");

        let name = collection.to_string();
        let changes = changes.map(move |result| match result {
            Ok(event) => convert_event(&name, event),
            Err(e) => Err(SourceError::stream(&name, e.to_string())),
        });

        Ok(with_snapshot_marker(changes))
    }

    fn name(&self) -> &str {
        "mongodb"
    }
}

/// Prefixes a change stream with the empty batch marking its initial state.
fn with_snapshot_marker<S>(changes: S) -> BatchStream
where
    S: Stream<Item = Result<ChangeBatch, SourceError>> + Send + 'static,
{
    stream::once(async { Ok(Vec::new()) }).chain(changes).boxed()
}

fn convert_event(
    collection: &str,
    event: ChangeStreamEvent<Document>,
) -> Result<ChangeBatch, SourceError> {
    let Some(kind) = classify(&event.operation_type) else {
        return Err(SourceError::Invalidated {
            collection: collection.to_string(),
        });
    };

    Ok(to_record(
        collection,
        kind,
        event.document_key.as_ref(),
        event.full_document,
    )
    .into_iter()
    .collect())
}

/// Builds the record for one change event.
///
/// Returns `None` for a document change whose key has no `_id`. Other
/// kinds (drop, rename, ...) are kept with an empty id since they never
/// touch the previous-value cache.
fn to_record(
    collection: &str,
    kind: ChangeKind,
    document_key: Option<&Document>,
    full_document: Option<Document>,
) -> Option<ChangeRecord> {
    let document_id = document_key.and_then(|key| key.get("_id")).map(id_to_string);

    let document_id = match (document_id, &kind) {
        (Some(id), _) => id,
        (None, ChangeKind::Other(_)) => String::new(),
        (None, _) => {
            warn!(collection, kind = %kind, "Change event without document id; skipped");
            return None;
        }
    };

    let fields = match kind {
        ChangeKind::Removed => None,
        _ => full_document.map(document_to_fields),
    };

    if matches!(kind, ChangeKind::Modified) && fields.is_none() {
        warn!(
            collection,
            document_id = %document_id,
            "Update event without full document; document may have been deleted"
        );
    }

    Some(ChangeRecord {
        kind,
        document_id,
        fields,
    })
}

/// Maps a driver operation type to a change kind.
///
/// Returns `None` for `invalidate`, which ends the stream.
pub fn classify(operation: &OperationType) -> Option<ChangeKind> {
    match operation {
        OperationType::Insert => Some(ChangeKind::Added),
        OperationType::Update | OperationType::Replace => Some(ChangeKind::Modified),
        OperationType::Delete => Some(ChangeKind::Removed),
        OperationType::Invalidate => None,
        other => Some(ChangeKind::Other(operation_name(other))),
    }
}

fn operation_name(operation: &OperationType) -> String {
    match mongodb::bson::to_bson(operation) {
        Ok(Bson::String(name)) => name,
        _ => format!("{operation:?}"),
    }
}

/// Renders a document `_id` as a string.
///
/// Strings are kept verbatim, object ids become their hex form, and any
/// other value is rendered as relaxed extended JSON.
pub fn id_to_string(id: &Bson) -> String {
    match id {
        Bson::String(s) => s.clone(),
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::Int32(n) => n.to_string(),
        Bson::Int64(n) => n.to_string(),
        other => other.clone().into_relaxed_extjson().to_string(),
    }
}

/// Converts a BSON document to a JSON field map using relaxed extended JSON.
pub fn document_to_fields(document: Document) -> Fields {
    match Bson::Document(document).into_relaxed_extjson() {
        Value::Object(map) => map,
        _ => Fields::new(),
    }
}
