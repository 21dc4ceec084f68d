// src/lib.rs

//! Kernel Mirror
//!
//! Maintains a local Arch Linux binary repository that mirrors a configured
//! set of kernel families from a remote archive, holding exactly one version
//! of each family on disk and in the repository database.
//!
//! # Architecture
//!
//! - Tokens: parsed `(family, version)` pairs ordered with `vercmp` rules
//! - Resolver: collapses several catalog candidates to one per family
//! - Planner: diffs the tracked set against the available set
//! - Transaction: delete, download with retry, publish, persist
//! - Lock: a sentinel file with stale-lock reclamation

pub mod cancel;
pub mod config;
mod error;
pub mod lock;
pub mod planner;
pub mod repository;
pub mod resolver;
pub mod state;
pub mod sync;
pub mod transaction;
pub mod version;

pub use error::{Error, Result};
