// src/planner.rs

//! Diff the tracked set against the available set

use crate::resolver::ResolvedSet;
use crate::version::VersionToken;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Download / delete / keep instructions for one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncPlan {
    pub to_download: Vec<VersionToken>,
    pub to_delete: Vec<VersionToken>,
    pub to_keep: Vec<VersionToken>,
}

impl SyncPlan {
    /// Nothing to download and nothing to delete
    pub fn is_noop(&self) -> bool {
        self.to_download.is_empty() && self.to_delete.is_empty()
    }

    /// Whether `token` is being deleted without a replacement
    pub fn is_pruned(&self, token: &VersionToken) -> bool {
        !self
            .to_download
            .iter()
            .any(|t| t.family() == token.family())
    }

    /// The set that will be current once the plan is applied
    pub fn target(&self) -> impl Iterator<Item = &VersionToken> {
        self.to_download.iter().chain(self.to_keep.iter())
    }
}

/// Compute the plan for `configured` families
///
/// Families tracked in `current` but no longer configured are pruned first,
/// independently of what the catalog lists.
pub fn plan(current: &ResolvedSet, available: &ResolvedSet, configured: &[String]) -> SyncPlan {
    let mut plan = SyncPlan::default();

    for token in current.tokens() {
        if !configured.iter().any(|f| f == token.family()) {
            info!("{} is no longer configured, removing {}", token.family(), token);
            plan.to_delete.push(token.clone());
        }
    }

    for family in configured {
        match (current.get(family), available.get(family)) {
            (None, Some(new)) => {
                debug!("{}: new, downloading {}", family, new);
                plan.to_download.push(new.clone());
            }
            (Some(old), Some(new)) if old != new => {
                debug!("{}: replacing {} with {}", family, old, new);
                plan.to_download.push(new.clone());
                plan.to_delete.push(old.clone());
            }
            (Some(_), Some(same)) => plan.to_keep.push(same.clone()),
            (Some(old), None) => {
                warn!("{} is not in the catalog, keeping {}", family, old);
                plan.to_keep.push(old.clone());
            }
            (None, None) => warn!("{} is not in the catalog", family),
        }
    }

    plan.to_download.sort();
    plan.to_delete.sort();
    plan.to_keep.sort();
    plan.to_keep.dedup();
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn set(raws: &[&str]) -> ResolvedSet {
        raws.iter().map(|r| VersionToken::parse(r).unwrap()).collect()
    }

    fn families(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn raws(tokens: &[VersionToken]) -> Vec<&str> {
        tokens.iter().map(|t| t.raw()).collect()
    }

    #[test]
    fn test_identical_sets_keep_everything() {
        let current = set(&["linux-6.9.1-1-x86_64", "linux-lts-6.6.30-1-x86_64"]);
        let configured = families(&["linux", "linux-lts"]);

        let plan = plan(&current, &current.clone(), &configured);
        assert!(plan.is_noop());
        assert_eq!(plan.to_keep.len(), 2);
    }

    #[test]
    fn test_new_replaced_and_kept_families() {
        let current = set(&["zfs-2.1.0-1-x86_64", "linux-6.9.1-1-x86_64"]);
        let available = set(&[
            "zfs-2.2.0-1-x86_64",
            "linux-6.9.1-1-x86_64",
            "linux-lts-6.6.30-1-x86_64",
        ]);
        let configured = families(&["zfs", "linux", "linux-lts"]);

        let plan = plan(&current, &available, &configured);
        assert_eq!(
            raws(&plan.to_download),
            vec!["linux-lts-6.6.30-1-x86_64", "zfs-2.2.0-1-x86_64"]
        );
        assert_eq!(raws(&plan.to_delete), vec!["zfs-2.1.0-1-x86_64"]);
        assert_eq!(raws(&plan.to_keep), vec!["linux-6.9.1-1-x86_64"]);
        assert!(!plan.is_pruned(&plan.to_delete[0]));
    }

    #[test]
    fn test_unconfigured_family_is_pruned_even_if_available() {
        let current = set(&["linux-6.9.1-1-x86_64", "linux-zen-6.9.1.zen1-1-x86_64"]);
        let available = current.clone();
        let configured = families(&["linux"]);

        let plan = plan(&current, &available, &configured);
        assert!(plan.to_download.is_empty());
        assert_eq!(raws(&plan.to_delete), vec!["linux-zen-6.9.1.zen1-1-x86_64"]);
        assert!(plan.is_pruned(&plan.to_delete[0]));
        assert_eq!(raws(&plan.to_keep), vec!["linux-6.9.1-1-x86_64"]);
    }

    #[test]
    fn test_missing_from_catalog_is_kept() {
        let current = set(&["linux-lts-6.6.30-1-x86_64"]);
        let plan = plan(&current, &ResolvedSet::default(), &families(&["linux-lts"]));
        assert!(plan.is_noop());
        assert_eq!(raws(&plan.to_keep), vec!["linux-lts-6.6.30-1-x86_64"]);
    }

    #[test]
    fn test_every_family_lands_in_exactly_one_bucket() {
        let current = set(&[
            "linux-6.9.1-1-x86_64",
            "linux-lts-6.6.29-1-x86_64",
            "linux-zen-6.9.1.zen1-1-x86_64",
        ]);
        let available = set(&[
            "linux-6.9.1-1-x86_64",
            "linux-lts-6.6.30-1-x86_64",
            "linux-hardened-6.8.9.hardened1-1-x86_64",
        ]);
        let configured = families(&["linux", "linux-lts", "linux-hardened"]);
        let plan = plan(&current, &available, &configured);

        let download: BTreeSet<&str> = plan.to_download.iter().map(|t| t.family()).collect();
        let keep: BTreeSet<&str> = plan.to_keep.iter().map(|t| t.family()).collect();
        let delete_only: BTreeSet<&str> = plan
            .to_delete
            .iter()
            .map(|t| t.family())
            .filter(|f| !download.contains(f))
            .collect();

        let mut universe: BTreeSet<&str> = configured.iter().map(String::as_str).collect();
        universe.extend(available.families());
        universe.extend(current.families());

        for family in universe {
            let hits = [&download, &keep, &delete_only]
                .iter()
                .filter(|bucket| bucket.contains(family))
                .count();
            assert_eq!(hits, 1, "{} should be in exactly one bucket", family);
        }
    }
}
