//! Pending writes and their encoded batch
//!
//! A batch concatenates the encoded lines of every pending write into one
//! buffer so that a flush is exactly one append. Each item's slot is
//! computed up front from the base offset and its position in the buffer.

use tokio::sync::oneshot;

use crate::document::Document;
use crate::storage::{LogRecord, Slot};
use crate::store::StoreResult;

/// Completion handler for a single write.
pub type Completion = oneshot::Sender<StoreResult<()>>;

/// A queued write waiting for the next flush.
#[derive(Debug)]
pub struct PendingWrite {
    /// Record to append
    pub record: LogRecord,
    /// Decoded document for the cache; `None` for removals
    pub doc: Option<Document>,
    /// Enqueue sequence number
    pub seq: u64,
    /// Sequence number of the not-yet-durable write this one was prepared
    /// against, if any
    pub basis: Option<u64>,
    /// Resolved once the batch containing this write lands or fails
    pub done: Option<Completion>,
}

impl PendingWrite {
    pub fn put(key: String, value: Vec<u8>, doc: Document, seq: u64, done: Completion) -> Self {
        Self {
            record: LogRecord::new(key, value),
            doc: Some(doc),
            seq,
            basis: None,
            done: Some(done),
        }
    }

    pub fn remove(key: String, seq: u64, done: Completion) -> Self {
        Self {
            record: LogRecord::tombstone(key),
            doc: None,
            seq,
            basis: None,
            done: Some(done),
        }
    }

    /// Marks this write as depending on the staged write `basis`.
    pub fn built_on(mut self, basis: Option<u64>) -> Self {
        self.basis = basis;
        self
    }

    pub fn key(&self) -> &str {
        &self.record.key
    }

    /// Resolves the completion handler. A caller that stopped waiting is
    /// not an error.
    pub fn complete(&mut self, result: StoreResult<()>) {
        if let Some(done) = self.done.take() {
            let _ = done.send(result);
        }
    }
}

/// Pending writes encoded for one append.
#[derive(Debug)]
pub struct CommitBatch {
    /// Offset the buffer will be written at
    base: u64,
    /// Concatenated lines
    buffer: Vec<u8>,
    /// Writes in enqueue order, with their value slots
    items: Vec<(PendingWrite, Slot)>,
}

impl CommitBatch {
    /// Encodes `writes` for an append at `base`.
    pub fn encode(writes: Vec<PendingWrite>, base: u64) -> Self {
        let capacity = writes.iter().map(|w| w.record.line_len()).sum();
        let mut buffer = Vec::with_capacity(capacity);
        let items = writes
            .into_iter()
            .map(|write| {
                let slot = write.record.encode_into(&mut buffer, base);
                (write, slot)
            })
            .collect();
        Self {
            base,
            buffer,
            items,
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> impl Iterator<Item = &(PendingWrite, Slot)> {
        self.items.iter()
    }

    pub fn items_mut(&mut self) -> impl Iterator<Item = &mut (PendingWrite, Slot)> {
        self.items.iter_mut()
    }

    /// Releases the buffer once it has been written.
    pub fn release_buffer(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }
}
