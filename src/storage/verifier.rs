//! Shape-level integrity checks
//!
//! A slot passes when its first and last bytes agree on a JSON value
//! class. This catches the dominant failure, a truncated write, without
//! decoding the value.

use tracing::warn;

use super::errors::{StorageError, StorageResult};
use super::log_store::LogStore;
use super::record::Slot;

/// Expected closing byte class for a value, selected by its opening byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    String,
    Array,
    Object,
    Boolean,
    Null,
    Number,
}

impl Shape {
    fn classify(first: u8) -> Option<Self> {
        match first {
            b'"' => Some(Shape::String),
            b'[' => Some(Shape::Array),
            b'{' => Some(Shape::Object),
            b't' | b'f' => Some(Shape::Boolean),
            b'n' => Some(Shape::Null),
            b'-' | b'0'..=b'9' => Some(Shape::Number),
            _ => None,
        }
    }

    fn closes_with(self, last: u8) -> bool {
        match self {
            Shape::String => last == b'"',
            Shape::Array => last == b']',
            Shape::Object => last == b'}',
            Shape::Boolean => last == b'e',
            Shape::Null => last == b'l',
            Shape::Number => last.is_ascii_digit(),
        }
    }
}

/// Outcome of verifying a key's slot history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verified {
    /// The newest slot that passed
    pub slot: Slot,
    /// How many newer slots were skipped as corrupt
    pub fallbacks: usize,
}

/// Checks slots against the log they were parsed from.
pub struct IntegrityVerifier<'a> {
    log: &'a LogStore,
}

impl<'a> IntegrityVerifier<'a> {
    pub fn new(log: &'a LogStore) -> Self {
        Self { log }
    }

    /// Verifies a single slot.
    pub fn verify(&self, slot: Slot) -> StorageResult<Slot> {
        if !slot.within(self.log.current_end()) {
            return Err(StorageError::corruption_at_offset(
                slot.offset,
                "slot outside the log",
            ));
        }

        let first = self.log.read_byte(slot.offset)?;
        let last = if slot.length == 1 {
            first
        } else {
            self.log.read_byte(slot.end() - 1)?
        };

        match Shape::classify(first) {
            Some(shape) if shape.closes_with(last) => Ok(slot),
            Some(shape) => Err(StorageError::corruption_at_offset(
                slot.offset,
                format!("{:?} value ends with byte 0x{:02x}", shape, last),
            )),
            None => Err(StorageError::corruption_at_offset(
                slot.offset,
                format!("value starts with byte 0x{:02x}", first),
            )),
        }
    }

    /// Verifies `history` newest-first and returns the first slot that
    /// passes. `history` is ordered oldest to newest, as parsed.
    ///
    /// Read failures propagate; shape failures fall back to the previous
    /// version until none remain.
    pub fn verify_history(&self, key: &str, history: &[Slot]) -> StorageResult<Verified> {
        let mut fallbacks = 0;
        for slot in history.iter().rev() {
            match self.verify(*slot) {
                Ok(slot) => {
                    if fallbacks > 0 {
                        warn!(key, offset = slot.offset, fallbacks, "recovered earlier version");
                    }
                    return Ok(Verified { slot, fallbacks });
                }
                Err(e) if e.is_corruption() => {
                    warn!(key, error = %e, "corrupt record");
                    fallbacks += 1;
                }
                Err(e) => return Err(e),
            }
        }

        let offset = history.last().map(|s| s.offset).unwrap_or(0);
        Err(StorageError::non_recoverable(key, offset))
    }
}
