// src/transaction.rs

//! Applying a sync plan to disk and to the repository database
//!
//! A run moves through `Deleting -> Downloading -> Publishing -> Persisted`.
//! Package files are written under a `.part` name and renamed into place, so
//! the repository directory never holds a truncated package. When a token's
//! downloads exhaust their retries, every file of that token is removed
//! again and nothing of it is published.

use crate::cancel::{CancelReader, CancelToken};
use crate::error::{Error, Result};
use crate::planner::SyncPlan;
use crate::repository::{Fetcher, RepositoryDatabase, RetryPolicy, package_url};
use crate::state::StateStore;
use crate::version::VersionToken;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Suffix of in-flight downloads
const PARTIAL_SUFFIX: &str = ".part";

/// Stage of a transaction, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Deleting,
    Downloading,
    Publishing,
    Persisted,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Deleting => "deleting",
            Phase::Downloading => "downloading",
            Phase::Publishing => "publishing",
            Phase::Persisted => "persisted",
        };
        f.write_str(name)
    }
}

/// What a completed transaction did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Empty plan; only the state record's timestamp was refreshed
    NoOp,
    Applied(Applied),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Applied {
    pub deleted: Vec<VersionToken>,
    pub published: Vec<VersionToken>,
    /// Package files registered in the database, in order
    pub published_files: Vec<PathBuf>,
}

/// A token whose files are all on disk
#[derive(Debug)]
struct StagedGroup {
    token: VersionToken,
    /// Non-signature files, in download order
    publish: Vec<PathBuf>,
}

/// Executes a [`SyncPlan`]
pub struct TransactionRunner<'a> {
    fetcher: &'a dyn Fetcher,
    database: &'a dyn RepositoryDatabase,
    state: &'a StateStore,
    repo_dir: &'a Path,
    archive_url: &'a str,
    retry: RetryPolicy,
    cancel: CancelToken,
}

impl<'a> TransactionRunner<'a> {
    pub fn new(
        fetcher: &'a dyn Fetcher,
        database: &'a dyn RepositoryDatabase,
        state: &'a StateStore,
        repo_dir: &'a Path,
        archive_url: &'a str,
        cancel: CancelToken,
    ) -> Self {
        Self {
            fetcher,
            database,
            state,
            repo_dir,
            archive_url,
            retry: RetryPolicy::packages(),
            cancel,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Apply `plan`
    ///
    /// On a fatal download error, tokens staged before the failure are still
    /// published and recorded, then the error is returned. An interrupt
    /// leaves the state record untouched.
    pub fn execute(&self, plan: &SyncPlan) -> Result<Outcome> {
        if plan.is_noop() {
            info!("Repository is up to date");
            self.state.touch()?;
            return Ok(Outcome::NoOp);
        }

        fs::create_dir_all(self.repo_dir).map_err(|e| {
            Error::IoError(format!("Failed to create {}: {}", self.repo_dir.display(), e))
        })?;

        self.enter(Phase::Deleting);
        for token in &plan.to_delete {
            self.delete_token(token, plan.is_pruned(token))?;
        }

        self.enter(Phase::Downloading);
        let mut staged = Vec::new();
        let mut failure = None;
        for token in &plan.to_download {
            match self.download_token(token) {
                Ok(group) => staged.push(group),
                Err(Error::Interrupted) => return Err(Error::Interrupted),
                Err(e) => {
                    error!("{}", e);
                    failure = Some(e);
                    break;
                }
            }
        }

        self.enter(Phase::Publishing);
        let mut applied = Applied {
            deleted: plan.to_delete.clone(),
            ..Applied::default()
        };
        for group in staged {
            for path in &group.publish {
                if let Err(e) = self.database.add(path) {
                    // the record must match what the database already holds
                    if let Some(earlier) = &failure {
                        error!("Publishing aborted after an earlier failure: {}", earlier);
                    }
                    self.state
                        .save(plan.to_keep.iter().chain(applied.published.iter()))?;
                    return Err(e);
                }
                applied.published_files.push(path.clone());
            }
            applied.published.push(group.token);
        }

        self.state
            .save(plan.to_keep.iter().chain(applied.published.iter()))?;
        self.enter(Phase::Persisted);

        match failure {
            Some(e) => Err(e),
            None => Ok(Outcome::Applied(applied)),
        }
    }

    fn enter(&self, phase: Phase) {
        debug!("Transaction phase: {}", phase);
    }

    /// Remove every file of `token` and drop its packages from the database
    ///
    /// Best effort: missing files and database misses are not errors.
    fn delete_token(&self, token: &VersionToken, pruned: bool) -> Result<()> {
        info!(
            "Removing {}{}",
            token,
            if pruned { " (no longer configured)" } else { "" }
        );
        for artifact in token.artifacts() {
            for name in artifact.file_names() {
                self.cancel.check()?;
                remove_if_exists(&self.repo_dir.join(name));
            }
            if let Err(e) = self.database.remove(&artifact.package) {
                warn!("Could not remove {} from the database: {}", artifact.package, e);
            }
        }
        Ok(())
    }

    fn download_token(&self, token: &VersionToken) -> Result<StagedGroup> {
        info!("Downloading {}", token);
        let mut publish = Vec::new();

        for artifact in token.artifacts() {
            for name in artifact.file_names() {
                let url = package_url(self.archive_url, &artifact.package, name);
                let dest = self.repo_dir.join(name);

                let fetched = self
                    .retry
                    .run(name, &self.cancel, |_| self.download_file(&url, &dest));
                if let Err(e) = fetched {
                    self.rollback(token);
                    return Err(match e {
                        Error::Interrupted => Error::Interrupted,
                        cause => Error::FatalDownload {
                            package: token.raw().to_string(),
                            cause: cause.to_string(),
                        },
                    });
                }

                if artifact.signature.as_deref() != Some(name) {
                    publish.push(dest);
                }
            }
        }

        Ok(StagedGroup {
            token: token.clone(),
            publish,
        })
    }

    /// Fetch `url` into `dest` through a partial file
    fn download_file(&self, url: &str, dest: &Path) -> Result<()> {
        debug!("Fetching {}", url);
        let mut reader = CancelReader::new(self.fetcher.fetch(url)?, self.cancel.clone());

        let partial = partial_path(dest);
        let mut file = File::create(&partial).map_err(|e| {
            Error::IoError(format!("Failed to create file {}: {}", partial.display(), e))
        })?;

        if let Err(e) = io::copy(&mut reader, &mut file) {
            drop(file);
            remove_if_exists(&partial);
            self.cancel.check()?;
            return Err(Error::DownloadError(format!("Failed to read {}: {}", url, e)));
        }
        file.sync_all()?;
        drop(file);

        fs::rename(&partial, dest).map_err(|e| {
            Error::IoError(format!(
                "Failed to move {} to {}: {}",
                partial.display(),
                dest.display(),
                e
            ))
        })?;
        Ok(())
    }

    /// Delete every file, complete or partial, belonging to `token`
    fn rollback(&self, token: &VersionToken) {
        warn!("Rolling back partial download of {}", token);
        for artifact in token.artifacts() {
            for name in artifact.file_names() {
                let path = self.repo_dir.join(name);
                remove_if_exists(&partial_path(&path));
                remove_if_exists(&path);
            }
        }
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

fn remove_if_exists(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("Deleted {}", path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to delete {}: {}", path.display(), e),
    }
}
