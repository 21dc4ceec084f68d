// src/cancel.rs

//! Cooperative cancellation shared with the interrupt handler

use crate::error::{Error, Result};
use std::io::{self, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Granularity of cancellable sleeps
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Cloneable flag observed at defined checkpoints
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Checkpoint: fail with `Interrupted` once cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, waking early if cancelled
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        let deadline = Instant::now() + duration;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }
}

/// Reader that fails once cancellation is requested
///
/// Checked before every chunk, so a long transfer stops at the next read
/// rather than at the next checkpoint of the caller.
pub struct CancelReader<R> {
    inner: R,
    cancel: CancelToken,
}

impl<R: Read> CancelReader<R> {
    pub fn new(inner: R, cancel: CancelToken) -> Self {
        Self { inner, cancel }
    }
}

impl<R: Read> Read for CancelReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // ErrorKind::Interrupted would make io::copy retry the read
        if self.cancel.is_cancelled() {
            return Err(io::Error::other("transfer cancelled"));
        }
        self.inner.read(buf)
    }
}
