//! Bounded-retry append
//!
//! Writes a whole buffer at a fixed base offset. Short writes continue
//! from where the previous call stopped. Retryable failures sleep for the
//! configured delay and try again until the attempt bound is reached; any
//! other failure ends the append immediately.

use std::io;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::storage::{LogStore, StorageError, StorageResult};

/// Retry bounds for one append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of failed attempts before giving up
    pub attempts: u32,
    /// Pause between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_millis(50),
        }
    }
}

/// Positional write primitive an append is issued against.
pub trait AppendTarget {
    /// One write at `offset`; returns how many bytes were accepted.
    fn write_at(&self, offset: u64, bytes: &[u8]) -> io::Result<usize>;
}

impl AppendTarget for LogStore {
    fn write_at(&self, offset: u64, bytes: &[u8]) -> io::Result<usize> {
        LogStore::write_at(self, offset, bytes)
    }
}

/// Whether an I/O failure may succeed if repeated.
pub fn is_retryable(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::WriteZero
    )
}

/// Writes all of `buf` at `base`. `on_retry` is called with the attempt
/// number before each retry.
///
/// On success every byte has been written; the caller advances the known
/// end-of-file. On failure some prefix may have reached the file.
pub fn append_all<T, F>(
    target: &T,
    base: u64,
    buf: &[u8],
    policy: RetryPolicy,
    mut on_retry: F,
) -> StorageResult<()>
where
    T: AppendTarget + ?Sized,
    F: FnMut(u32),
{
    let mut written = 0usize;
    let mut failures = 0u32;

    while written < buf.len() {
        let offset = base + written as u64;
        let result = match target.write_at(offset, &buf[written..]) {
            Ok(0) => Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "append accepted no bytes",
            )),
            other => other,
        };

        match result {
            Ok(n) => {
                written += n;
                if written < buf.len() {
                    debug!(offset, written, total = buf.len(), "short write, continuing");
                }
            }
            Err(e) if is_retryable(e.kind()) => {
                failures += 1;
                if failures >= policy.attempts {
                    return Err(StorageError::write_failed(
                        format!("Append at {} failed after {} attempts", base, failures),
                        e,
                    ));
                }
                warn!(offset, attempt = failures, error = %e, "append failed, retrying");
                on_retry(failures);
                if !policy.delay.is_zero() {
                    thread::sleep(policy.delay);
                }
            }
            Err(e) => {
                return Err(StorageError::write_failed(
                    format!("Append at {} failed", base),
                    e,
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Scripted target: each call pops the next outcome. `Ok(n)` accepts
    /// up to `n` bytes.
    struct Scripted {
        script: RefCell<VecDeque<io::Result<usize>>>,
        data: RefCell<Vec<u8>>,
        offsets: RefCell<Vec<u64>>,
    }

    impl Scripted {
        fn new(script: Vec<io::Result<usize>>) -> Self {
            Self {
                script: RefCell::new(script.into()),
                data: RefCell::new(Vec::new()),
                offsets: RefCell::new(Vec::new()),
            }
        }
    }

    impl AppendTarget for Scripted {
        fn write_at(&self, offset: u64, bytes: &[u8]) -> io::Result<usize> {
            self.offsets.borrow_mut().push(offset);
            match self.script.borrow_mut().pop_front() {
                Some(Ok(limit)) => {
                    let n = limit.min(bytes.len());
                    self.data.borrow_mut().extend_from_slice(&bytes[..n]);
                    Ok(n)
                }
                Some(Err(e)) => Err(e),
                None => {
                    self.data.borrow_mut().extend_from_slice(bytes);
                    Ok(bytes.len())
                }
            }
        }
    }

    fn quick(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            delay: Duration::ZERO,
        }
    }

    #[test]
    fn test_short_writes_continue_at_offset() {
        let target = Scripted::new(vec![Ok(3), Ok(2)]);

        append_all(&target, 10, b"abcdefgh", quick(5), |_| {}).unwrap();

        assert_eq!(&*target.data.borrow(), b"abcdefgh");
        assert_eq!(&*target.offsets.borrow(), &[10, 13, 15]);
    }

    #[test]
    fn test_transient_failures_are_retried() {
        let target = Scripted::new(vec![
            Err(io::Error::from(io::ErrorKind::WouldBlock)),
            Ok(2),
            Err(io::Error::from(io::ErrorKind::Interrupted)),
        ]);
        let mut retries = Vec::new();

        append_all(&target, 0, b"abcd", quick(5), |n| retries.push(n)).unwrap();

        assert_eq!(&*target.data.borrow(), b"abcd");
        assert_eq!(retries, vec![1, 2]);
        // Partial progress is kept across the retry.
        assert_eq!(&*target.offsets.borrow(), &[0, 0, 2, 2]);
    }

    #[test]
    fn test_retries_are_bounded() {
        let target = Scripted::new(
            (0..10)
                .map(|_| Err(io::Error::from(io::ErrorKind::WouldBlock)))
                .collect(),
        );

        let err = append_all(&target, 0, b"abcd", quick(3), |_| {}).unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(target.offsets.borrow().len(), 3);
    }

    #[test]
    fn test_non_retryable_fails_immediately() {
        let target = Scripted::new(vec![Err(io::Error::from(io::ErrorKind::PermissionDenied))]);

        let err = append_all(&target, 0, b"abcd", quick(5), |_| {}).unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(err.io_kind(), Some(io::ErrorKind::PermissionDenied));
        assert_eq!(target.offsets.borrow().len(), 1);
    }

    #[test]
    fn test_zero_length_write_counts_as_failure() {
        let target = Scripted::new(vec![Ok(0), Ok(0)]);
        let err = append_all(&target, 0, b"ab", quick(2), |_| {}).unwrap_err();
        assert_eq!(err.io_kind(), Some(io::ErrorKind::WriteZero));
    }
}
