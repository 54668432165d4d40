//! JSON dump of every live document
//!
//! Writes one JSON object mapping each key to its document, without the
//! `_key` property. Documents are streamed to the file as they resolve.

use std::path::Path;
use std::sync::Arc;

use futures_util::pin_mut;
use futures_util::stream::TryStreamExt;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::info;

use super::errors::{StoreError, StoreResult};
use super::state::StoreState;
use crate::document::{without_key, Document};
use crate::query::resolve_entries;
use crate::storage::StorageError;

/// Dumps every live document to `path`. Returns the number written.
pub(crate) async fn dump_documents(
    state: &Arc<StoreState>,
    path: &Path,
    pretty: bool,
) -> StoreResult<usize> {
    let (log, entries) = {
        let view = state.view()?;
        (Arc::clone(&view.log), view.catalog.entries())
    };

    let file = File::create(path).await.map_err(|e| io_error(path, e))?;
    let mut out = BufWriter::new(file);
    let documents = resolve_entries(Arc::clone(state), log, entries, None);
    pin_mut!(documents);
    let mut written = 0usize;

    out.write_all(b"{").await.map_err(|e| io_error(path, e))?;
    while let Some(resolved) = documents.try_next().await? {
        if let Some((key, doc)) = resolved {
            let entry = encode_entry(&key, doc, pretty, written == 0)?;
            out.write_all(&entry).await.map_err(|e| io_error(path, e))?;
            written += 1;
        }
    }
    let close: &[u8] = if pretty && written > 0 { b"\n}\n" } else { b"}" };
    out.write_all(close).await.map_err(|e| io_error(path, e))?;
    out.flush().await.map_err(|e| io_error(path, e))?;
    out.get_ref()
        .sync_all()
        .await
        .map_err(|e| io_error(path, e))?;

    info!(path = %path.display(), documents = written, "dump written");
    Ok(written)
}

fn encode_entry(key: &str, doc: Document, pretty: bool, first: bool) -> StoreResult<Vec<u8>> {
    let doc = without_key(doc);
    let encode = |e: serde_json::Error| StoreError::BadValue(e.to_string());

    let mut entry = Vec::new();
    if !first {
        entry.push(b',');
    }
    if pretty {
        entry.extend_from_slice(b"\n  ");
        entry.extend_from_slice(&serde_json::to_vec(key).map_err(encode)?);
        entry.extend_from_slice(b": ");
        let body = serde_json::to_string_pretty(&doc).map_err(encode)?;
        entry.extend_from_slice(body.replace('\n', "\n  ").as_bytes());
    } else {
        entry.extend_from_slice(&serde_json::to_vec(key).map_err(encode)?);
        entry.push(b':');
        entry.extend_from_slice(&serde_json::to_vec(&doc).map_err(encode)?);
    }
    Ok(entry)
}

fn io_error(path: &Path, e: std::io::Error) -> StoreError {
    StorageError::io_error(format!("Failed to write dump {}", path.display()), e).into()
}
