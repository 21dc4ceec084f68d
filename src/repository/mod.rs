// src/repository/mod.rs

//! Remote archive access and local repository database mutation
//!
//! This module provides:
//! - The `Fetcher` boundary and its HTTP implementation
//! - Bounded retry with linear backoff
//! - The `RepositoryDatabase` boundary and its `repo-add`/`repo-remove` implementation

pub mod catalog;

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use reqwest::blocking::Client;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info, warn};

pub use catalog::{Catalog, RemoteCatalog};

/// Connect timeout for HTTP requests (30 seconds)
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on a whole transfer; kernel packages are large
const HTTP_TRANSFER_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Performs HTTP GET requests
pub trait Fetcher {
    /// Open a byte stream for `url`
    fn fetch(&self, url: &str) -> Result<Box<dyn Read>>;
}

/// Blocking reqwest client
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a new HTTP fetcher
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .timeout(HTTP_TRANSFER_TIMEOUT)
            .user_agent(concat!("kernel-mirror/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Box<dyn Read>> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| Error::DownloadError(format!("Failed to fetch {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::DownloadError(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        if let Some(len) = response.content_length() {
            debug!("{}: {} bytes", url, len);
        }
        Ok(Box::new(response))
    }
}

/// Bounded retry with linearly growing delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay after attempt `n` is `backoff_step * n`
    pub backoff_step: Duration,
}

impl RetryPolicy {
    /// Policy for package downloads: 16 attempts, 2s steps
    pub fn packages() -> Self {
        Self {
            max_attempts: 16,
            backoff_step: Duration::from_secs(2),
        }
    }

    /// Policy for the catalog fetch: 3 attempts, 1s steps
    pub fn catalog() -> Self {
        Self {
            max_attempts: 3,
            backoff_step: Duration::from_secs(1),
        }
    }

    /// Run `op` until it succeeds or attempts run out
    ///
    /// Cancellation is checked before every attempt and during backoff.
    /// `Interrupted` is never retried. The last error is returned on
    /// exhaustion.
    pub fn run<T, F>(&self, what: &str, cancel: &CancelToken, op: F) -> Result<T>
    where
        F: FnMut(u32) -> Result<T>,
    {
        self.run_with_sleep(what, cancel, op, |delay| cancel.sleep(delay))
    }

    /// [`RetryPolicy::run`] with the backoff wait delegated to `sleep`
    fn run_with_sleep<T, F, S>(
        &self,
        what: &str,
        cancel: &CancelToken,
        mut op: F,
        mut sleep: S,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Result<T>,
        S: FnMut(Duration) -> Result<()>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            cancel.check()?;
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(Error::Interrupted) => return Err(Error::Interrupted),
                Err(e) if attempt >= self.max_attempts => {
                    warn!("{}: giving up after {} attempts", what, attempt);
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.backoff_step * attempt;
                    warn!(
                        "{}: attempt {} failed: {}, retrying in {}s",
                        what,
                        attempt,
                        e,
                        delay.as_secs()
                    );
                    sleep(delay)?;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::packages()
    }
}

/// URL of a package file in the archive
///
/// Layout: `<archive>/packages/<first letter>/<package>/<file>`.
pub fn package_url(archive_url: &str, package: &str, file_name: &str) -> String {
    let initial = package.chars().next().unwrap_or('_');
    format!(
        "{}/packages/{}/{}/{}",
        archive_url.trim_end_matches('/'),
        initial,
        package,
        file_name
    )
}

/// Mutations of the local repository database
pub trait RepositoryDatabase {
    /// Register a package file
    fn add(&self, package_path: &Path) -> Result<()>;

    /// Drop a package by name
    fn remove(&self, package_name: &str) -> Result<()>;
}

/// `repo-add` / `repo-remove` from pacman-contrib
pub struct RepoTool {
    database: PathBuf,
    add_program: String,
    remove_program: String,
}

impl RepoTool {
    pub fn new(database: impl Into<PathBuf>) -> Self {
        Self {
            database: database.into(),
            add_program: "repo-add".to_string(),
            remove_program: "repo-remove".to_string(),
        }
    }

    fn invoke(&self, program: &str, argument: &str) -> Result<()> {
        debug!("Running {} {} {}", program, self.database.display(), argument);
        let output = Command::new(program)
            .arg(&self.database)
            .arg(argument)
            .output()
            .map_err(|e| Error::DatabaseError(format!("Failed to run {}: {}", program, e)))?;

        if !output.status.success() {
            return Err(Error::DatabaseError(format!(
                "{} {} exited with {}: {}",
                program,
                argument,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

impl RepositoryDatabase for RepoTool {
    fn add(&self, package_path: &Path) -> Result<()> {
        self.invoke(&self.add_program, &package_path.to_string_lossy())?;
        info!("Added {} to {}", package_path.display(), self.database.display());
        Ok(())
    }

    fn remove(&self, package_name: &str) -> Result<()> {
        self.invoke(&self.remove_program, package_name)?;
        info!("Removed {} from {}", package_name, self.database.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn instant_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff_step: Duration::ZERO,
        }
    }

    #[test]
    fn test_package_url() {
        assert_eq!(
            package_url(
                "https://archive.archlinux.org/",
                "linux-lts-headers",
                "linux-lts-headers-6.6.30-1-x86_64.pkg.tar.zst"
            ),
            "https://archive.archlinux.org/packages/l/linux-lts-headers/linux-lts-headers-6.6.30-1-x86_64.pkg.tar.zst"
        );
    }

    #[test]
    fn test_retry_succeeds_after_failures() {
        let calls = Cell::new(0);
        let result = instant_policy(16).run("test", &CancelToken::new(), |attempt| {
            calls.set(attempt);
            if attempt < 5 {
                Err(Error::DownloadError("flaky".to_string()))
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result.unwrap(), 5);
        assert_eq!(calls.get(), 5);
    }

    #[test]
    fn test_retry_gives_up_at_limit() {
        let calls = Cell::new(0);
        let result: Result<()> = instant_policy(16).run("test", &CancelToken::new(), |attempt| {
            calls.set(attempt);
            Err(Error::DownloadError(format!("attempt {}", attempt)))
        });
        assert_eq!(calls.get(), 16);
        match result {
            Err(Error::DownloadError(msg)) => assert_eq!(msg, "attempt 16"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_retry_stops_when_cancelled() {
        let cancel = CancelToken::new();
        let result: Result<()> = instant_policy(16).run("test", &cancel, |_| {
            cancel.cancel();
            Err(Error::DownloadError("down".to_string()))
        });
        assert!(matches!(result, Err(Error::Interrupted)));
    }

    #[test]
    fn test_package_backoff_grows_linearly() {
        let mut delays = Vec::new();
        let result = RetryPolicy::packages().run_with_sleep(
            "test",
            &CancelToken::new(),
            |attempt| {
                if attempt < 4 {
                    Err(Error::DownloadError("flaky".to_string()))
                } else {
                    Ok(attempt)
                }
            },
            |delay| {
                delays.push(delay);
                Ok(())
            },
        );
        assert_eq!(result.unwrap(), 4);
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(6)
            ]
        );
    }

    #[test]
    fn test_package_backoff_full_schedule() {
        let mut delays = Vec::new();
        let calls = Cell::new(0);
        let result: Result<()> = RetryPolicy::packages().run_with_sleep(
            "test",
            &CancelToken::new(),
            |attempt| {
                calls.set(attempt);
                Err(Error::DownloadError("down".to_string()))
            },
            |delay| {
                delays.push(delay);
                Ok(())
            },
        );
        assert!(result.is_err());
        assert_eq!(calls.get(), 16);
        // no wait after the last attempt
        let expected: Vec<_> = (1..16).map(|n| Duration::from_secs(2 * n)).collect();
        assert_eq!(delays, expected);
    }

    #[test]
    fn test_catalog_backoff_schedule() {
        let mut delays = Vec::new();
        let result: Result<()> = RetryPolicy::catalog().run_with_sleep(
            "test",
            &CancelToken::new(),
            |_| Err(Error::DownloadError("down".to_string())),
            |delay| {
                delays.push(delay);
                Ok(())
            },
        );
        assert!(result.is_err());
        assert_eq!(delays, vec![Duration::from_secs(1), Duration::from_secs(2)]);
    }

    #[test]
    fn test_default_policy_is_packages() {
        assert_eq!(RetryPolicy::default(), RetryPolicy::packages());
    }
}
