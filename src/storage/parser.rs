//! Streaming record parser
//!
//! Splits the log into `(key, value_offset, value_length)` triples with a
//! small state machine over raw bytes:
//!
//! - `Key`: accumulate key bytes until a tab
//! - `Value`: skip value bytes until a line feed, then emit
//! - `Resync`: discard bytes until the next line feed
//!
//! Stray delimiters are logged and skipped rather than failing the load.
//! A torn trailing record (crash mid-append) must not abort the scan.

use tracing::debug;

use super::errors::StorageResult;
use super::log_store::LogStore;
use super::record::{Slot, LINE_FEED, TAB};

/// Chunk size used when scanning the log.
const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Key,
    Value,
    Resync,
}

/// Outcome of a parse pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParseSummary {
    /// Offset one past the last byte scanned
    pub end: u64,
    /// Offset one past the last complete record
    pub last_boundary: u64,
    /// Number of records emitted
    pub records: usize,
    /// Number of stray delimiters skipped
    pub resyncs: usize,
}

/// Scans a log file for records.
pub struct RecordParser<'a> {
    log: &'a LogStore,
}

impl<'a> RecordParser<'a> {
    pub fn new(log: &'a LogStore) -> Self {
        Self { log }
    }

    /// Scans from `from_offset` to the end of the file, calling `on_record`
    /// for every complete record.
    ///
    /// When `from_offset` is not zero and the preceding byte is not a line
    /// feed, the scan first skips to the next line boundary so that a
    /// partially observed record is never emitted.
    pub fn parse<F>(&self, from_offset: u64, mut on_record: F) -> StorageResult<ParseSummary>
    where
        F: FnMut(&str, Slot),
    {
        let mut state = State::Key;
        if from_offset > 0 {
            let mut prev = [0u8; 1];
            let n = self.log.read_chunk(from_offset - 1, &mut prev)?;
            if n == 0 || prev[0] != LINE_FEED {
                state = State::Resync;
            }
        }

        let mut summary = ParseSummary {
            end: from_offset,
            last_boundary: from_offset,
            ..ParseSummary::default()
        };
        let mut key: Vec<u8> = Vec::new();
        let mut value_start = 0u64;
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut pos = from_offset;

        loop {
            let bytes = self.log.read_chunk(pos, &mut buf)?;
            if bytes == 0 {
                break;
            }

            for &byte in &buf[..bytes] {
                match state {
                    State::Key => match byte {
                        TAB => {
                            state = State::Value;
                            value_start = pos + 1;
                        }
                        LINE_FEED => {
                            debug!(offset = pos, "unexpected line feed in key");
                            summary.resyncs += 1;
                            key.clear();
                            summary.last_boundary = pos + 1;
                        }
                        _ => key.push(byte),
                    },
                    State::Value => match byte {
                        LINE_FEED => {
                            state = State::Key;
                            summary.last_boundary = pos + 1;
                            if !key.is_empty() {
                                match std::str::from_utf8(&key) {
                                    Ok(k) => {
                                        let length = (pos - value_start) as u32;
                                        on_record(k, Slot::new(value_start, length));
                                        summary.records += 1;
                                    }
                                    Err(_) => {
                                        debug!(offset = value_start, "skipping record with non-utf8 key");
                                        summary.resyncs += 1;
                                    }
                                }
                            }
                            key.clear();
                        }
                        TAB => {
                            // The record this value belonged to cannot be
                            // trusted; drop its key and keep scanning.
                            debug!(offset = pos, "unexpected tab in value");
                            summary.resyncs += 1;
                            key.clear();
                            value_start = pos + 1;
                        }
                        _ => {}
                    },
                    State::Resync => {
                        if byte == LINE_FEED {
                            state = State::Key;
                            key.clear();
                            summary.last_boundary = pos + 1;
                        }
                    }
                }
                pos += 1;
            }
        }

        summary.end = pos;
        Ok(summary)
    }
}
