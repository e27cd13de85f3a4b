// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Extraction from the worker's JSON stdout documents.
//!
//! Each verb consumes only the keys it needs, so extraction is per-key
//! rather than schema-wide: a `list` document missing `appstream_urls`
//! still yields its versions.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("no output from worker")]
    Empty,
    #[error("missing key '{0}'")]
    MissingKey(&'static str),
    #[error("unexpected type for key '{0}'")]
    BadType(&'static str),
    #[error("malformed document: {0}")]
    Malformed(String),
}

fn key<'a>(doc: &'a Value, name: &'static str) -> Result<&'a Value, DocumentError> {
    doc.get(name).ok_or(DocumentError::MissingKey(name))
}

/// Extract an array of strings at `name`.
pub fn string_list(doc: &Value, name: &'static str) -> Result<Vec<String>, DocumentError> {
    key(doc, name)?
        .as_array()
        .ok_or(DocumentError::BadType(name))?
        .iter()
        .map(|v| v.as_str().map(str::to_owned).ok_or(DocumentError::BadType(name)))
        .collect()
}

/// Extract a string at `name`, where JSON `null` means absent.
pub fn optional_string(doc: &Value, name: &'static str) -> Result<Option<String>, DocumentError> {
    let v = key(doc, name)?;
    if v.is_null() {
        return Ok(None);
    }
    v.as_str().map(str::to_owned).map(Some).ok_or(DocumentError::BadType(name))
}

/// Extract an unsigned integer at `name`.
pub fn unsigned(doc: &Value, name: &'static str) -> Result<u64, DocumentError> {
    key(doc, name)?.as_u64().ok_or(DocumentError::BadType(name))
}

/// Compact re-serialization, used for the `Describe` reply.
///
/// The document is emitted exactly as parsed so that re-parsing the reply
/// yields a structurally equal document.
pub fn format_compact(doc: &Value) -> String {
    doc.to_string()
}

/// Output of the worker's `components` verb.
#[derive(Debug, Clone, Deserialize)]
pub struct ComponentsOutput {
    pub default: bool,
    pub components: Vec<String>,
}

impl ComponentsOutput {
    pub fn from_document(doc: &Value) -> Result<Self, DocumentError> {
        serde_json::from_value(doc.clone()).map_err(|e| DocumentError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
#[path = "document_tests.rs"]
mod tests;
