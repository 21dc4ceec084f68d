// src/config.rs

//! Run settings and the tracked kernel list

use crate::error::{Error, Result};
use crate::repository::RetryPolicy;
use crate::resolver::ResolvePolicy;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Lines naming a family start with this prefix
pub const FAMILY_PREFIX: &str = "linux";

/// Kernel list written when none exists yet
pub const SAMPLE_KERNELS: &str = include_str!("../data/kernels.sample");

/// Default Arch mirror database listing the current kernels
pub const DEFAULT_CATALOG_URL: &str = "https://geo.mirror.pkgbuild.com/core/os/x86_64/core.db";

/// Default archive holding every published package version
pub const DEFAULT_ARCHIVE_URL: &str = "https://archive.archlinux.org";

/// Everything a sync session needs to know about its environment
#[derive(Debug, Clone)]
pub struct Settings {
    /// Directory holding package files
    pub repo_dir: PathBuf,
    /// Repository database passed to repo-add/repo-remove
    pub database_path: PathBuf,
    /// Current-packages record
    pub state_path: PathBuf,
    /// Lock sentinel
    pub lock_path: PathBuf,
    pub catalog_url: String,
    pub archive_url: String,
    pub policy: ResolvePolicy,
    /// Minimum age of the last check before a new run does any work
    pub check_interval: Duration,
    /// Ignore `check_interval`
    pub force: bool,
    pub retry: RetryPolicy,
}

impl Settings {
    /// Defaults rooted at `repo_dir`
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        let repo_dir = repo_dir.into();
        Self {
            database_path: repo_dir.join("kernels.db.tar.gz"),
            state_path: repo_dir.join(".current"),
            lock_path: repo_dir.join(".sync.lock"),
            repo_dir,
            catalog_url: DEFAULT_CATALOG_URL.to_string(),
            archive_url: DEFAULT_ARCHIVE_URL.to_string(),
            policy: ResolvePolicy::default(),
            check_interval: Duration::from_secs(3600),
            force: false,
            retry: RetryPolicy::packages(),
        }
    }
}

/// Families named in a kernel list
///
/// The first word of each line counts if it starts with [`FAMILY_PREFIX`].
/// Order of first appearance is kept; duplicates are dropped.
pub fn parse_kernel_list(content: &str) -> Vec<String> {
    let mut families: Vec<String> = Vec::new();
    for line in content.lines() {
        let Some(word) = line.split_whitespace().next() else {
            continue;
        };
        if word.starts_with(FAMILY_PREFIX) && !families.iter().any(|f| f == word) {
            families.push(word.to_string());
        }
    }
    families
}

/// Read the kernel list at `path`, seeding it from the sample if absent
pub fn load_kernel_list(path: &Path) -> Result<Vec<String>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| {
                    Error::ConfigError(format!("Failed to create {}: {}", parent.display(), e))
                })?;
            }
            fs::write(path, SAMPLE_KERNELS).map_err(|e| {
                Error::ConfigError(format!("Failed to write {}: {}", path.display(), e))
            })?;
            info!("Created kernel list {} from the bundled sample", path.display());
            SAMPLE_KERNELS.to_string()
        }
        Err(e) => {
            return Err(Error::ConfigError(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            )));
        }
    };

    Ok(parse_kernel_list(&content))
}
