// src/lock.rs

//! Cross-process exclusion through a sentinel file
//!
//! The sentinel's existence and modification time decide whether the lock
//! is held. A sentinel older than [`STALE_LOCK_AGE`] is treated as abandoned
//! by a crashed run and reclaimed. Inspecting, reclaiming, creating and
//! removing the sentinel all happen under an exclusive advisory lock on a
//! companion `<sentinel>.guard` file, so each of them is one step as seen by
//! other runs.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Age beyond which an existing lock is reclaimed
pub const STALE_LOCK_AGE: Duration = Duration::from_secs(5 * 60);

static NEXT_OWNER: AtomicU64 = AtomicU64::new(0);

/// Held lock; the sentinel is removed on release or drop
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    /// Written into the sentinel; identifies this holder among runs
    owner: String,
    released: bool,
}

impl LockGuard {
    /// Acquire the lock at `path`
    ///
    /// Returns `Error::LockBusy` when a fresh sentinel already exists.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::IoError(format!("Failed to create directory {}: {}", parent.display(), e))
            })?;
        }

        let _guard = lock_guard_file(path)?;

        match lock_age(path)? {
            Some(age) if age <= STALE_LOCK_AGE => {
                return Err(Error::LockBusy(path.to_path_buf()));
            }
            Some(age) => {
                warn!(
                    "Reclaiming stale lock {} ({}s old)",
                    path.display(),
                    age.as_secs()
                );
                match fs::remove_file(path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
            None => {}
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::LockBusy(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        let owner = format!(
            "{}:{}",
            std::process::id(),
            NEXT_OWNER.fetch_add(1, Ordering::Relaxed)
        );
        writeln!(file, "{}", owner)?;

        debug!("Acquired lock {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            owner,
            released: false,
        })
    }

    /// Release the lock explicitly
    pub fn release(mut self) -> Result<()> {
        self.remove()
    }

    /// Remove the sentinel unless another run has since reclaimed it
    fn remove(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let _guard = lock_guard_file(&self.path)?;
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if content.trim() != self.owner {
            warn!(
                "Lock {} was taken over by another run, leaving it in place",
                self.path.display()
            );
            return Ok(());
        }

        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!("Released lock {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.remove() {
            warn!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}

/// Open `<sentinel>.guard` and block until it is exclusively locked
///
/// The advisory lock is released when the returned file is dropped. The
/// guard file itself is never removed.
fn lock_guard_file(path: &Path) -> Result<File> {
    let mut name = path.as_os_str().to_owned();
    name.push(".guard");
    let guard_path = PathBuf::from(name);

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&guard_path)
        .map_err(|e| {
            Error::IoError(format!("Failed to open {}: {}", guard_path.display(), e))
        })?;
    FileExt::lock_exclusive(&file).map_err(|e| {
        Error::IoError(format!("Failed to lock {}: {}", guard_path.display(), e))
    })?;
    Ok(file)
}

/// Age of an existing sentinel, or `None` if there is none
fn lock_age(path: &Path) -> Result<Option<Duration>> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    // A timestamp in the future counts as brand new
    let age = SystemTime::now()
        .duration_since(metadata.modified()?)
        .unwrap_or(Duration::ZERO);
    Ok(Some(age))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tempfile::TempDir;

    fn backdate(path: &Path, secs: u64) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(secs))
            .unwrap();
    }

    #[test]
    fn test_acquire_and_release() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync.lock");

        let lock = LockGuard::acquire(&path).unwrap();
        assert!(path.exists());
        lock.release().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_releases() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync.lock");
        {
            let _lock = LockGuard::acquire(&path).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_fresh_lock_is_busy() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync.lock");
        let _held = LockGuard::acquire(&path).unwrap();

        let result = LockGuard::acquire(&path);
        assert!(matches!(result, Err(Error::LockBusy(_))));
        assert!(path.exists());
    }

    #[test]
    fn test_lock_just_under_threshold_is_busy() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync.lock");
        File::create(&path).unwrap();
        backdate(&path, 299);

        assert!(matches!(LockGuard::acquire(&path), Err(Error::LockBusy(_))));
        assert!(path.exists());
    }

    #[test]
    fn test_stale_lock_is_reclaimed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync.lock");
        File::create(&path).unwrap();
        backdate(&path, 301);

        let lock = LockGuard::acquire(&path).unwrap();
        let age = lock_age(&path).unwrap().unwrap();
        assert!(age < Duration::from_secs(60));
        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    fn test_concurrent_reclaim_has_one_winner() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync.lock");

        for round in 0..500 {
            File::create(&path).unwrap();
            backdate(&path, 301);

            let barrier = Arc::new(Barrier::new(2));
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let barrier = Arc::clone(&barrier);
                    let path = path.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        LockGuard::acquire(&path)
                    })
                })
                .collect();
            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

            let winners = results.iter().filter(|r| r.is_ok()).count();
            assert_eq!(winners, 1, "round {}: {} runs hold the lock", round, winners);
            assert!(
                results
                    .iter()
                    .any(|r| matches!(r, Err(Error::LockBusy(_))))
            );
            drop(results);
            assert!(!path.exists());
        }
    }

    #[test]
    fn test_release_after_takeover_keeps_new_sentinel() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync.lock");

        let first = LockGuard::acquire(&path).unwrap();
        backdate(&path, 301);
        let second = LockGuard::acquire(&path).unwrap();

        drop(first);
        assert!(path.exists());
        second.release().unwrap();
        assert!(!path.exists());
    }
}
