//! Append-only log file
//!
//! The store owns the file handle and the known end-of-file. Writes are
//! positional and only ever land at or after the known end; reads are
//! positional and never reach past it. Both take `&self`, so one handle
//! can serve concurrent readers while the commit pipeline appends.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use super::errors::{StorageError, StorageResult};
use super::record::Slot;

/// Handle over a single log file.
#[derive(Debug)]
pub struct LogStore {
    /// Path to the log file
    path: PathBuf,
    /// Underlying file handle
    file: File,
    /// Known end-of-file. Advanced only after an append completes.
    end: AtomicU64,
    #[cfg(test)]
    faults: std::sync::Mutex<std::collections::VecDeque<WriteFault>>,
}

/// Scripted outcome for the next positional write.
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteFault {
    /// Fail without writing
    Fail(io::ErrorKind),
    /// Write at most this many bytes
    Short(usize),
    /// Sleep, then write normally
    Delay(std::time::Duration),
}

impl LogStore {
    /// Opens or creates the log file at `path`.
    ///
    /// Parent directories are created if missing. The known end-of-file
    /// starts at the file's current length.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    StorageError::io_error(
                        format!("Failed to create log directory: {}", parent.display()),
                        e,
                    )
                })?;
            }
        }

        // Not O_APPEND: positional writes must land at the requested offset.
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| {
                StorageError::io_error(format!("Failed to open log file: {}", path.display()), e)
            })?;

        let end = file
            .metadata()
            .map_err(|e| StorageError::io_error("Failed to read log metadata", e))?
            .len();

        Ok(Self {
            path: path.to_path_buf(),
            file,
            end: AtomicU64::new(end),
            #[cfg(test)]
            faults: Default::default(),
        })
    }

    /// Returns the path to the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the known end-of-file.
    pub fn current_end(&self) -> u64 {
        self.end.load(Ordering::Acquire)
    }

    /// Returns the length the filesystem reports for the log.
    pub fn file_len(&self) -> StorageResult<u64> {
        Ok(self
            .file
            .metadata()
            .map_err(|e| StorageError::io_error("Failed to read log metadata", e))?
            .len())
    }

    /// Issues one positional write at `offset` and returns the number of
    /// bytes the OS accepted. A short count is not an error; the caller
    /// continues with the remainder.
    ///
    /// `offset` must not precede the known end-of-file.
    pub fn write_at(&self, offset: u64, bytes: &[u8]) -> io::Result<usize> {
        let end = self.current_end();
        if offset < end {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("append at {} would overwrite data ending at {}", offset, end),
            ));
        }
        self.write_positional(offset, bytes)
    }

    #[cfg(not(test))]
    fn write_positional(&self, offset: u64, bytes: &[u8]) -> io::Result<usize> {
        positional::write_at(&self.file, bytes, offset)
    }

    #[cfg(test)]
    fn write_positional(&self, offset: u64, bytes: &[u8]) -> io::Result<usize> {
        match self.next_fault() {
            Some(WriteFault::Fail(kind)) => Err(io::Error::from(kind)),
            Some(WriteFault::Short(limit)) => {
                positional::write_at(&self.file, &bytes[..limit.min(bytes.len())], offset)
            }
            Some(WriteFault::Delay(pause)) => {
                std::thread::sleep(pause);
                positional::write_at(&self.file, bytes, offset)
            }
            None => positional::write_at(&self.file, bytes, offset),
        }
    }

    /// Queues faults for the next positional writes, in order.
    #[cfg(test)]
    pub(crate) fn inject_faults(&self, faults: impl IntoIterator<Item = WriteFault>) {
        if let Ok(mut queue) = self.faults.lock() {
            queue.extend(faults);
        }
    }

    #[cfg(test)]
    fn next_fault(&self) -> Option<WriteFault> {
        self.faults.lock().ok().and_then(|mut queue| queue.pop_front())
    }

    /// Appends `bytes` at the known end-of-file and advances it by the
    /// number of bytes written.
    pub fn append_at(&self, offset: u64, bytes: &[u8]) -> io::Result<usize> {
        let end = self.current_end();
        if offset != end {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("append at {} but end-of-file is {}", offset, end),
            ));
        }
        let written = positional::write_at(&self.file, bytes, offset)?;
        self.end.fetch_add(written as u64, Ordering::AcqRel);
        Ok(written)
    }

    /// Moves the known end-of-file forward after a completed append.
    pub fn advance(&self, from: u64, bytes: u64) {
        debug_assert_eq!(self.current_end(), from);
        self.end.store(from + bytes, Ordering::Release);
    }

    /// Drops bytes past the known end-of-file left behind by a failed append.
    pub fn discard_tail(&self) -> StorageResult<()> {
        let end = self.current_end();
        if self.file_len()? > end {
            self.file
                .set_len(end)
                .map_err(|e| StorageError::io_error("Failed to discard partial append", e))?;
        }
        Ok(())
    }

    /// Reads `length` bytes at `offset`. Never reads past the known end.
    pub fn read_at(&self, offset: u64, length: usize) -> StorageResult<Vec<u8>> {
        let end = self.current_end();
        if offset + length as u64 > end {
            return Err(StorageError::corruption_at_offset(
                offset,
                format!("read of {} bytes past end-of-file {}", length, end),
            ));
        }
        let mut buf = vec![0u8; length];
        self.read_exact(offset, &mut buf)?;
        Ok(buf)
    }

    /// Reads the value bytes of `slot`.
    pub fn read_slot(&self, slot: Slot) -> StorageResult<Vec<u8>> {
        self.read_at(slot.offset, slot.length as usize)
    }

    /// Reads a single byte at `offset`.
    pub fn read_byte(&self, offset: u64) -> StorageResult<u8> {
        let byte = self.read_at(offset, 1)?;
        Ok(byte[0])
    }

    /// Reads up to `buf.len()` bytes at `offset` without the end-of-file
    /// bound. Used by the parser, which discovers the end itself.
    pub fn read_chunk(&self, offset: u64, buf: &mut [u8]) -> StorageResult<usize> {
        loop {
            match positional::read_at(&self.file, buf, offset) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    return Err(StorageError::transient(
                        format!("Read at offset {} did not complete", offset),
                        e,
                    ))
                }
                Err(e) => {
                    return Err(StorageError::read_failed(
                        format!("Failed to read log at offset {}", offset),
                        e,
                    ))
                }
            }
        }
    }

    fn read_exact(&self, mut offset: u64, mut buf: &mut [u8]) -> StorageResult<()> {
        while !buf.is_empty() {
            let n = self.read_chunk(offset, buf)?;
            if n == 0 {
                return Err(StorageError::corruption_at_offset(
                    offset,
                    "unexpected end of log file",
                ));
            }
            offset += n as u64;
            buf = &mut buf[n..];
        }
        Ok(())
    }

    /// Flushes file contents and metadata to disk.
    pub fn sync(&self) -> StorageResult<()> {
        self.file
            .sync_all()
            .map_err(|e| StorageError::io_error("fsync failed on log file", e))
    }

    /// Syncs and releases the file handle.
    pub fn close(self) -> StorageResult<()> {
        self.sync()
    }
}

#[cfg(unix)]
mod positional {
    use std::fs::File;
    use std::io;
    use std::os::unix::fs::FileExt;

    pub fn write_at(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
        file.write_at(buf, offset)
    }

    pub fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        file.read_at(buf, offset)
    }
}

#[cfg(windows)]
mod positional {
    use std::fs::File;
    use std::io;
    use std::os::windows::fs::FileExt;

    pub fn write_at(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
        file.seek_write(buf, offset)
    }

    pub fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        file.seek_read(buf, offset)
    }
}
