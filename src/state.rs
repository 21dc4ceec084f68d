// src/state.rs

//! The persisted record of kernel versions currently held in the repository
//!
//! One raw token per line, sorted and deduplicated. The record's
//! modification time doubles as the "last successful check" clock.

use crate::error::{Error, Result};
use crate::resolver::ResolvedSet;
use crate::version::VersionToken;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Reads and writes the current-packages record
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the tracked set
    ///
    /// A missing record yields an empty set. Unparseable lines are dropped:
    /// the record is rebuilt on the next successful run anyway.
    pub fn load(&self) -> Result<ResolvedSet> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No state record at {}", self.path.display());
                return Ok(ResolvedSet::default());
            }
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                warn!("State record {} is not UTF-8, ignoring it", self.path.display());
                return Ok(ResolvedSet::default());
            }
            Err(e) => return Err(e.into()),
        };

        let mut current = ResolvedSet::default();
        for line in content.split_whitespace() {
            match VersionToken::parse(line) {
                Ok(token) => {
                    if let Some(previous) = current.get(token.family()) {
                        warn!(
                            "State record lists {} twice ({} and {}), keeping the newer",
                            token.family(),
                            previous,
                            token
                        );
                        if *previous > token {
                            continue;
                        }
                    }
                    current.insert(token);
                }
                Err(e) => warn!("Dropping corrupt state entry: {}", e),
            }
        }
        Ok(current)
    }

    /// Time since the record was last written or touched
    ///
    /// `Duration::MAX` when there is no record.
    pub fn age_since_last_check(&self) -> Duration {
        match fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(modified) => SystemTime::now()
                .duration_since(modified)
                .unwrap_or(Duration::ZERO),
            Err(_) => Duration::MAX,
        }
    }

    /// Atomically replace the record with `tokens`
    pub fn save<'a, I>(&self, tokens: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a VersionToken>,
    {
        let mut tokens: Vec<&VersionToken> = tokens.into_iter().collect();
        tokens.sort();
        let mut seen = HashSet::new();
        tokens.retain(|t| seen.insert(t.raw()));

        let parent = self.parent_dir()?;
        let mut temp = NamedTempFile::new_in(parent)
            .map_err(|e| Error::IoError(format!("Failed to create temp state file: {}", e)))?;
        for token in &tokens {
            writeln!(temp, "{}", token.raw())?;
        }
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| {
            Error::IoError(format!("Failed to replace {}: {}", self.path.display(), e))
        })?;

        debug!("Saved {} entries to {}", tokens.len(), self.path.display());
        Ok(())
    }

    /// Refresh the record's modification time without changing its content
    pub fn touch(&self) -> Result<()> {
        self.parent_dir()?;
        let file = File::options()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.set_modified(SystemTime::now())?;
        debug!("Touched {}", self.path.display());
        Ok(())
    }

    fn parent_dir(&self) -> Result<&Path> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(|e| {
            Error::IoError(format!("Failed to create directory {}: {}", parent.display(), e))
        })?;
        Ok(parent)
    }
}
