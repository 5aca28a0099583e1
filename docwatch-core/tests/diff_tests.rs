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

//! Integration tests for the diff engine.
//!
//! Feeds mixed record sequences for one document and checks that `oldData`
//! always equals the `newData` of the most recent create or update.

use docwatch_core::diff::DiffEngine;
use docwatch_core::event::{ChangeKind, ChangeRecord, EventType, Fields};
use serde_json::json;

fn fields(n: i64) -> Fields {
    json!({ "n": n }).as_object().cloned().unwrap()
}

fn record(kind: &str, n: i64) -> ChangeRecord {
    match kind {
        "add" => ChangeRecord::added("doc", fields(n)),
        "mod" => ChangeRecord::modified("doc", fields(n)),
        "del" => ChangeRecord::removed("doc"),
        other => ChangeRecord {
            kind: ChangeKind::Other(other.to_string()),
            document_id: "doc".to_string(),
            fields: Some(fields(n)),
        },
    }
}

#[test]
fn test_old_data_tracks_last_written_value() {
    let sequences: &[&[&str]] = &[
        &["add", "mod", "mod", "del"],
        &["mod", "del", "del", "add"],
        &["add", "del", "mod", "other", "mod"],
        &["del", "other", "add", "add", "del"],
    ];

    for sequence in sequences {
        let engine = DiffEngine::new("docwatch");
        let mut expected_cache: Option<Fields> = None;

        for (n, kind) in sequence.iter().enumerate() {
            let events = engine.diff("c", vec![record(kind, n as i64)]);
            assert_eq!(events.len(), 1);
            let event = &events[0];

            match *kind {
                "add" => {
                    assert_eq!(event.event_type, EventType::Create);
                    assert_eq!(event.old_data, None);
                    expected_cache = event.new_data.clone();
                }
                "mod" => {
                    assert_eq!(event.event_type, EventType::Update);
                    assert_eq!(event.old_data, expected_cache, "sequence {sequence:?}");
                    expected_cache = event.new_data.clone();
                }
                "del" => {
                    assert_eq!(event.event_type, EventType::Delete);
                    assert_eq!(event.old_data, expected_cache, "sequence {sequence:?}");
                    assert_eq!(event.new_data, None);
                    expected_cache = None;
                }
                _ => {
                    assert_eq!(event.event_type, EventType::Unknown);
                    assert_eq!(event.old_data, None);
                    assert_eq!(event.new_data, None);
                }
            }

            assert_eq!(engine.is_cached("c", "doc"), expected_cache.is_some());
        }
    }
}

#[test]
fn test_single_batch_matches_split_batches() {
    let kinds = ["add", "mod", "del", "add", "mod"];

    let batched = DiffEngine::new("docwatch");
    let together = batched.diff(
        "c",
        kinds
            .iter()
            .enumerate()
            .map(|(n, k)| record(k, n as i64))
            .collect(),
    );

    let split = DiffEngine::new("docwatch");
    let apart: Vec<_> = kinds
        .iter()
        .enumerate()
        .flat_map(|(n, k)| split.diff("c", vec![record(k, n as i64)]))
        .collect();

    assert_eq!(together.len(), apart.len());
    for (a, b) in together.iter().zip(&apart) {
        assert_eq!(a.event_type, b.event_type);
        assert_eq!(a.old_data, b.old_data);
        assert_eq!(a.new_data, b.new_data);
    }
}

#[test]
fn test_events_serialize_with_nulls() {
    let engine = DiffEngine::new("edge-1");
    let events = engine.diff("notes", vec![ChangeRecord::removed("d1")]);

    let value = serde_json::to_value(&events[0]).unwrap();
    assert_eq!(value["eventType"], json!("delete"));
    assert_eq!(value["oldData"], serde_json::Value::Null);
    assert_eq!(value["newData"], serde_json::Value::Null);
    assert_eq!(value["metadata"]["changeType"], json!("removed"));
    assert_eq!(value["metadata"]["source"], json!("edge-1"));
}
