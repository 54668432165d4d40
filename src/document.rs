//! Documents and their log encoding
//!
//! A document is a JSON object. The reserved `_key` property always equals
//! the document's own key; it is attached on read and stripped on write.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::storage::{is_tombstone_value, TOMBSTONE};

/// A stored document.
pub type Document = Map<String, Value>;

/// Reserved property carrying the document key.
pub const KEY_PROPERTY: &str = "_key";

/// Failure to turn stored bytes into a document.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("stored value is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("stored value is not an object")]
    NotAnObject,
}

/// Encodes `doc` as compact JSON without its `_key` property.
pub fn encode_document(doc: &Document) -> Result<Vec<u8>, serde_json::Error> {
    if doc.contains_key(KEY_PROPERTY) {
        let mut stripped = doc.clone();
        stripped.remove(KEY_PROPERTY);
        serde_json::to_vec(&stripped)
    } else {
        serde_json::to_vec(doc)
    }
}

/// Decodes stored value bytes. Returns `None` for a tombstone.
pub fn decode_document(key: &str, bytes: &[u8]) -> Result<Option<Document>, DecodeError> {
    if bytes == TOMBSTONE {
        return Ok(None);
    }
    match serde_json::from_slice::<Value>(bytes)? {
        Value::Object(mut doc) => {
            doc.insert(KEY_PROPERTY.to_string(), Value::String(key.to_string()));
            Ok(Some(doc))
        }
        ref v if is_tombstone_value(v) => Ok(None),
        _ => Err(DecodeError::NotAnObject),
    }
}

/// Shallow merge: every top-level property of `patch` replaces the one in
/// `base`.
pub fn merge_documents(base: &Document, patch: &Document) -> Document {
    let mut merged = base.clone();
    for (name, value) in patch {
        merged.insert(name.clone(), value.clone());
    }
    merged
}

/// Returns a copy of `doc` with `_key` set to `key`.
pub fn with_key(mut doc: Document, key: &str) -> Document {
    doc.insert(KEY_PROPERTY.to_string(), Value::String(key.to_string()));
    doc
}

/// Returns `doc` without its `_key` property.
pub fn without_key(mut doc: Document) -> Document {
    doc.remove(KEY_PROPERTY);
    doc
}
