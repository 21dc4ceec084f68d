// src/sync.rs

//! One synchronization run
//!
//! The session owns every collaborator explicitly: settings, catalog,
//! fetcher, repository database, prompt and cancellation token. Control
//! flow: lock, load state, list and resolve the catalog, plan, execute,
//! persist, unlock.

use crate::cancel::CancelToken;
use crate::config::Settings;
use crate::error::Result;
use crate::lock::LockGuard;
use crate::planner::{self, SyncPlan};
use crate::repository::{Catalog, Fetcher, RepositoryDatabase};
use crate::resolver::{self, Prompt, ResolvedSet};
use crate::state::StateStore;
use crate::transaction::{Outcome, TransactionRunner};
use crate::version;
use std::time::Duration;
use tracing::info;

/// Result of [`SyncSession::run`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncReport {
    /// The last check is younger than the configured interval
    Skipped { age: Duration },
    Completed { plan: SyncPlan, outcome: Outcome },
}

pub struct SyncSession<'a> {
    settings: Settings,
    catalog: &'a dyn Catalog,
    fetcher: &'a dyn Fetcher,
    database: &'a dyn RepositoryDatabase,
    prompt: &'a mut dyn Prompt,
    state: StateStore,
    cancel: CancelToken,
}

impl<'a> SyncSession<'a> {
    pub fn new(
        settings: Settings,
        catalog: &'a dyn Catalog,
        fetcher: &'a dyn Fetcher,
        database: &'a dyn RepositoryDatabase,
        prompt: &'a mut dyn Prompt,
        cancel: CancelToken,
    ) -> Self {
        let state = StateStore::new(&settings.state_path);
        Self {
            settings,
            catalog,
            fetcher,
            database,
            prompt,
            state,
            cancel,
        }
    }

    /// Current set and the plan that would bring it in line with the catalog
    ///
    /// Reads only; nothing on disk changes.
    pub fn prepare(&mut self, families: &[String]) -> Result<(ResolvedSet, SyncPlan)> {
        let current = self.state.load()?;
        info!("Tracking {} kernel(s) locally", current.len());

        self.cancel.check()?;
        let listing = self.catalog.listing()?;
        let tokens = version::parse_listing(&listing, families)?;
        let grouped = resolver::group_by_family(tokens, families);

        let preferred = if self.settings.policy.prefer_current {
            current.clone()
        } else {
            ResolvedSet::default()
        };
        let available =
            resolver::resolve(grouped, self.settings.policy, &preferred, &mut *self.prompt)?;

        let plan = planner::plan(&current, &available, families);
        info!(
            "Plan: {} to download, {} to delete, {} to keep",
            plan.to_download.len(),
            plan.to_delete.len(),
            plan.to_keep.len()
        );
        Ok((current, plan))
    }

    /// Full run under the lock
    ///
    /// The lock is released on every exit path, including errors.
    pub fn run(&mut self, families: &[String]) -> Result<SyncReport> {
        let lock = LockGuard::acquire(&self.settings.lock_path)?;

        let age = self.state.age_since_last_check();
        if !self.settings.force && age < self.settings.check_interval {
            info!(
                "Last check was {}s ago, next one due after {}s",
                age.as_secs(),
                self.settings.check_interval.as_secs()
            );
            lock.release()?;
            return Ok(SyncReport::Skipped { age });
        }

        let (_, plan) = self.prepare(families)?;

        let runner = TransactionRunner::new(
            self.fetcher,
            self.database,
            &self.state,
            &self.settings.repo_dir,
            &self.settings.archive_url,
            self.cancel.clone(),
        )
        .with_retry(self.settings.retry);
        let outcome = runner.execute(&plan)?;

        lock.release()?;
        Ok(SyncReport::Completed { plan, outcome })
    }
}
