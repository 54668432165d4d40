//! Log record format
//!
//! A log file is a sequence of lines:
//!
//! ```text
//! KEY \t JSON-VALUE \n
//! ```
//!
//! The value is compact JSON and therefore never contains a raw tab or
//! line feed. Keys are validated before they reach the log.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Separates the key from the value.
pub const TAB: u8 = 0x09;

/// Terminates a record.
pub const LINE_FEED: u8 = 0x0A;

/// Reserved for composite `documentKey <sep> propertyKey` keys.
pub const PROPERTY_SEPARATOR: u8 = 0x1F;

/// Encoded value written in place of a removed document.
///
/// This is the JSON string `"\u0000"`. Stored documents are always JSON
/// objects, so no live record can encode to these bytes.
pub const TOMBSTONE: &[u8] = b"\"\\u0000\"";

/// Byte range of a record's value inside the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slot {
    /// Offset of the first value byte
    pub offset: u64,
    /// Number of value bytes
    pub length: u32,
}

impl Slot {
    pub fn new(offset: u64, length: u32) -> Self {
        Self { offset, length }
    }

    /// Offset one past the last value byte.
    pub fn end(&self) -> u64 {
        self.offset + self.length as u64
    }

    /// Whether the slot lies entirely within `end_of_file`.
    pub fn within(&self, end_of_file: u64) -> bool {
        self.length > 0 && self.end() <= end_of_file
    }
}

/// A single `key \t value \n` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub key: String,
    pub value: Vec<u8>,
}

impl LogRecord {
    pub fn new(key: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    /// A record marking `key` as removed.
    pub fn tombstone(key: impl Into<String>) -> Self {
        Self::new(key, TOMBSTONE.to_vec())
    }

    /// Encoded length of the whole line.
    pub fn line_len(&self) -> usize {
        self.key.len() + 1 + self.value.len() + 1
    }

    /// Appends the encoded line to `buf` and returns the value's slot,
    /// given the absolute offset at which `buf` will be written.
    pub fn encode_into(&self, buf: &mut Vec<u8>, buf_offset: u64) -> Slot {
        let value_offset = buf_offset + buf.len() as u64 + self.key.len() as u64 + 1;
        buf.extend_from_slice(self.key.as_bytes());
        buf.push(TAB);
        buf.extend_from_slice(&self.value);
        buf.push(LINE_FEED);
        Slot::new(value_offset, self.value.len() as u32)
    }

    pub fn is_tombstone(&self) -> bool {
        self.value == TOMBSTONE
    }
}

/// Returns true when `key` can be stored as a log key.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && !key
            .bytes()
            .any(|b| b == TAB || b == LINE_FEED || b == PROPERTY_SEPARATOR)
}

/// Returns true when the decoded value is the removal sentinel.
pub fn is_tombstone_value(value: &Value) -> bool {
    matches!(value, Value::String(s) if s == "\u{0}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_computes_value_slot() {
        let record = LogRecord::new("abc", b"{\"a\":1}".to_vec());
        let mut buf = b"xx".to_vec();
        let slot = record.encode_into(&mut buf, 100);

        assert_eq!(buf, b"xxabc\t{\"a\":1}\n");
        // 100 + 2 bytes already buffered + "abc\t"
        assert_eq!(slot, Slot::new(106, 7));
        assert_eq!(record.line_len(), 12);
    }

    #[test]
    fn test_tombstone_matches_serde_encoding() {
        let encoded = serde_json::to_vec(&json!("\u{0}")).unwrap();
        assert_eq!(encoded, TOMBSTONE);
        assert!(is_tombstone_value(&serde_json::from_slice(TOMBSTONE).unwrap()));
        assert!(LogRecord::tombstone("k").is_tombstone());
    }

    #[test]
    fn test_key_validation() {
        assert!(is_valid_key("users:1"));
        assert!(is_valid_key("dotted.key"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("tab\tkey"));
        assert!(!is_valid_key("line\nkey"));
        assert!(!is_valid_key("sep\u{1f}key"));
    }

    #[test]
    fn test_slot_bounds() {
        let slot = Slot::new(10, 5);
        assert_eq!(slot.end(), 15);
        assert!(slot.within(15));
        assert!(!slot.within(14));
        assert!(!Slot::new(10, 0).within(100));
    }
}
