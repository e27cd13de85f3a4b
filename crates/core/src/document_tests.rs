// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tests for worker-document extraction.

use super::*;
use serde_json::json;

#[test]
fn string_list_extracts_versions() {
    let doc = json!({"all": ["42.0", "42.1"], "current": "42.0"});
    assert_eq!(string_list(&doc, "all").unwrap(), vec!["42.0", "42.1"]);
}

#[test]
fn string_list_missing_key_is_hard_error() {
    let doc = json!({"current": "42.0"});
    assert_eq!(string_list(&doc, "all"), Err(DocumentError::MissingKey("all")));
}

#[test]
fn string_list_rejects_non_string_elements() {
    let doc = json!({"all": ["42.0", 7]});
    assert_eq!(string_list(&doc, "all"), Err(DocumentError::BadType("all")));
}

#[test]
fn optional_string_null_means_absent() {
    let doc = json!({"available": null});
    assert_eq!(optional_string(&doc, "available").unwrap(), None);

    let doc = json!({"available": "43"});
    assert_eq!(optional_string(&doc, "available").unwrap(), Some("43".to_string()));
}

#[test]
fn optional_string_missing_key_is_hard_error() {
    let doc = json!({});
    assert_eq!(optional_string(&doc, "current"), Err(DocumentError::MissingKey("current")));
}

#[test]
fn unsigned_extracts_removed_count() {
    let doc = json!({"removed": 3});
    assert_eq!(unsigned(&doc, "removed").unwrap(), 3);
    assert_eq!(unsigned(&json!({"removed": -1}), "removed"), Err(DocumentError::BadType("removed")));
}

#[test]
fn components_output_requires_both_keys() {
    let doc = json!({"default": true, "components": ["kernel", "boot"]});
    let out = ComponentsOutput::from_document(&doc).unwrap();
    assert!(out.default);
    assert_eq!(out.components, vec!["kernel", "boot"]);

    assert!(ComponentsOutput::from_document(&json!({"default": false})).is_err());
}

#[test]
fn compact_format_round_trips_structurally() {
    let doc = json!({"b": [1, 2, {"c": null}], "a": "x"});
    let text = format_compact(&doc);
    let reparsed: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(reparsed, doc);
}
