// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Core error types for the kernel mirror
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O errors with context attached
    #[error("I/O error: {0}")]
    IoError(String),

    /// Setup failure (HTTP client, directories)
    #[error("Failed to initialize: {0}")]
    InitError(String),

    /// Malformed catalog or token entry
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Transient network failure, eligible for retry
    #[error("Download error: {0}")]
    DownloadError(String),

    /// Retries exhausted for a package group
    #[error("Failed to download {package}: {cause}")]
    FatalDownload { package: String, cause: String },

    /// External repository tool failed
    #[error("Repository database error: {0}")]
    DatabaseError(String),

    /// Invalid configuration input
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Another run holds a fresh lock
    #[error("Another sync is already running (lock at {})", .0.display())]
    LockBusy(PathBuf),

    /// No selection arrived in time
    #[error("No version selected within {0} seconds")]
    PromptTimeout(u64),

    /// Interactive input reached end of file
    #[error("Interactive input closed before a version was selected")]
    PromptClosed,

    /// Cancellation was requested
    #[error("Interrupted")]
    Interrupted,
}

/// Result type alias using the crate's Error type
pub type Result<T> = std::result::Result<T, Error>;
