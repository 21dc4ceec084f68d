// src/resolver.rs

//! Version resolution: one token per kernel family
//!
//! A catalog may list several versions of the same family. Resolution
//! applies, in order: a single candidate wins; the preferred (currently
//! tracked) version wins if still listed; the newest wins if that policy is
//! on; otherwise the user picks interactively.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::version::VersionToken;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How long to wait for each interactive answer
pub const PROMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Granularity at which a waiting prompt checks for cancellation
const PROMPT_POLL: Duration = Duration::from_millis(200);

/// Mapping from family to exactly one token
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedSet {
    entries: BTreeMap<String, VersionToken>,
}

impl ResolvedSet {
    /// Insert a token, replacing any previous token of its family
    pub fn insert(&mut self, token: VersionToken) -> Option<VersionToken> {
        self.entries.insert(token.family().to_string(), token)
    }

    pub fn get(&self, family: &str) -> Option<&VersionToken> {
        self.entries.get(family)
    }

    pub fn families(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn tokens(&self) -> impl Iterator<Item = &VersionToken> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<VersionToken> for ResolvedSet {
    fn from_iter<I: IntoIterator<Item = VersionToken>>(iter: I) -> Self {
        let mut set = ResolvedSet::default();
        for token in iter {
            set.insert(token);
        }
        set
    }
}

/// Which automatic choices are allowed before asking the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvePolicy {
    /// Keep the tracked version when the catalog still lists it
    pub prefer_current: bool,
    /// Pick the highest version
    pub prefer_newest: bool,
}

impl Default for ResolvePolicy {
    fn default() -> Self {
        Self {
            prefer_current: true,
            prefer_newest: false,
        }
    }
}

/// Interactive input channel
pub trait Prompt {
    /// Show `question` and wait up to `timeout` for one line of input
    ///
    /// Fails with `Error::PromptTimeout` when nothing arrives in time.
    fn ask(&mut self, question: &str, timeout: Duration) -> Result<String>;
}

/// Group tokens by family, keeping only `families`
pub fn group_by_family(
    tokens: Vec<VersionToken>,
    families: &[String],
) -> BTreeMap<String, Vec<VersionToken>> {
    let mut groups: BTreeMap<String, Vec<VersionToken>> = BTreeMap::new();
    for token in tokens {
        if families.iter().any(|f| f == token.family()) {
            groups.entry(token.family().to_string()).or_default().push(token);
        }
    }
    groups
}

/// Collapse every family's candidates to a single token
///
/// Candidates are ordered here, so `grouped` may come in any order.
/// `preferred` is consulted only when `policy.prefer_current` is set.
pub fn resolve(
    grouped: BTreeMap<String, Vec<VersionToken>>,
    policy: ResolvePolicy,
    preferred: &ResolvedSet,
    prompt: &mut dyn Prompt,
) -> Result<ResolvedSet> {
    let mut resolved = ResolvedSet::default();

    for (family, mut candidates) in grouped {
        candidates.sort();
        let chosen = match candidates.len() {
            0 => continue,
            1 => candidates.remove(0),
            _ => choose(&family, candidates, policy, preferred, prompt)?,
        };
        debug!("Resolved {} to {}", family, chosen);
        resolved.insert(chosen);
    }

    Ok(resolved)
}

fn choose(
    family: &str,
    mut candidates: Vec<VersionToken>,
    policy: ResolvePolicy,
    preferred: &ResolvedSet,
    prompt: &mut dyn Prompt,
) -> Result<VersionToken> {
    if policy.prefer_current {
        if let Some(wanted) = preferred.get(family) {
            if let Some(pos) = candidates.iter().position(|c| c == wanted) {
                info!("Keeping current version {} of {}", wanted.version(), family);
                return Ok(candidates.swap_remove(pos));
            }
        }
    }

    if policy.prefer_newest {
        if let Some(newest) = candidates.pop() {
            info!("Choosing newest version {} of {}", newest.version(), family);
            return Ok(newest);
        }
    }

    let mut question = format!("Several versions of {} are available:\n", family);
    for (i, candidate) in candidates.iter().enumerate() {
        question.push_str(&format!("  {}) {}\n", i + 1, candidate.version()));
    }
    question.push_str(&format!("Select a version [1-{}]: ", candidates.len()));

    loop {
        let answer = prompt.ask(&question, PROMPT_TIMEOUT)?;
        match answer.trim().parse::<usize>() {
            Ok(n) if (1..=candidates.len()).contains(&n) => {
                return Ok(candidates.swap_remove(n - 1));
            }
            _ => warn!("Invalid selection '{}'", answer.trim()),
        }
    }
}

/// Prompt reading lines from standard input
///
/// Lines are read on a helper thread so each wait can be bounded.
pub struct StdinPrompt {
    lines: Option<Receiver<io::Result<String>>>,
    cancel: CancelToken,
}

impl StdinPrompt {
    pub fn new(cancel: CancelToken) -> Self {
        Self { lines: None, cancel }
    }

    fn lines(&mut self) -> &Receiver<io::Result<String>> {
        self.lines.get_or_insert_with(|| {
            let (tx, rx) = mpsc::channel();
            std::thread::spawn(move || {
                for line in io::stdin().lock().lines() {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            });
            rx
        })
    }
}

impl Prompt for StdinPrompt {
    fn ask(&mut self, question: &str, timeout: Duration) -> Result<String> {
        let mut stderr = io::stderr();
        write!(stderr, "{}", question)?;
        stderr.flush()?;

        let cancel = self.cancel.clone();
        let deadline = Instant::now() + timeout;
        let lines = self.lines();
        loop {
            cancel.check()?;
            let now = Instant::now();
            if now >= deadline {
                writeln!(stderr)?;
                return Err(Error::PromptTimeout(timeout.as_secs()));
            }
            match lines.recv_timeout(PROMPT_POLL.min(deadline - now)) {
                Ok(line) => return Ok(line?),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(Error::PromptClosed),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays canned answers; an empty queue behaves like a timeout
    struct ScriptedPrompt {
        answers: VecDeque<String>,
        asked: usize,
    }

    impl ScriptedPrompt {
        fn new(answers: &[&str]) -> Self {
            Self {
                answers: answers.iter().map(|s| s.to_string()).collect(),
                asked: 0,
            }
        }
    }

    impl Prompt for ScriptedPrompt {
        fn ask(&mut self, _question: &str, timeout: Duration) -> Result<String> {
            self.asked += 1;
            self.answers
                .pop_front()
                .ok_or(Error::PromptTimeout(timeout.as_secs()))
        }
    }

    fn zfs_candidates() -> BTreeMap<String, Vec<VersionToken>> {
        let tokens = ["zfs-1.2.3-1-x86_64", "zfs-1.10.0-1-x86_64", "zfs-1.9.9-1-x86_64"]
            .iter()
            .map(|raw| VersionToken::parse(raw).unwrap())
            .collect();
        group_by_family(tokens, &["zfs".to_string()])
    }

    fn current(raw: &str) -> ResolvedSet {
        std::iter::once(VersionToken::parse(raw).unwrap()).collect()
    }

    #[test]
    fn test_single_candidate_needs_no_policy() {
        let tokens = vec![VersionToken::parse("linux-6.9.1-1-x86_64").unwrap()];
        let grouped = group_by_family(tokens, &["linux".to_string()]);
        let policy = ResolvePolicy {
            prefer_current: false,
            prefer_newest: false,
        };
        let mut prompt = ScriptedPrompt::new(&[]);

        let resolved = resolve(grouped, policy, &ResolvedSet::default(), &mut prompt).unwrap();
        assert_eq!(resolved.get("linux").unwrap().version(), "6.9.1-1");
        assert_eq!(prompt.asked, 0);
    }

    #[test]
    fn test_prefer_newest_picks_maximum() {
        let policy = ResolvePolicy {
            prefer_current: false,
            prefer_newest: true,
        };
        let mut prompt = ScriptedPrompt::new(&[]);
        let resolved =
            resolve(zfs_candidates(), policy, &ResolvedSet::default(), &mut prompt).unwrap();
        assert_eq!(resolved.get("zfs").unwrap().version(), "1.10.0-1");
    }

    #[test]
    fn test_preferred_beats_newest() {
        let policy = ResolvePolicy {
            prefer_current: true,
            prefer_newest: true,
        };
        let mut prompt = ScriptedPrompt::new(&[]);
        let preferred = current("zfs-1.9.9-1-x86_64");

        let resolved = resolve(zfs_candidates(), policy, &preferred, &mut prompt).unwrap();
        assert_eq!(resolved.get("zfs").unwrap().version(), "1.9.9-1");
    }

    #[test]
    fn test_preferred_ignored_when_not_listed() {
        let policy = ResolvePolicy {
            prefer_current: true,
            prefer_newest: true,
        };
        let mut prompt = ScriptedPrompt::new(&[]);
        let preferred = current("zfs-0.8.0-1-x86_64");

        let resolved = resolve(zfs_candidates(), policy, &preferred, &mut prompt).unwrap();
        assert_eq!(resolved.get("zfs").unwrap().version(), "1.10.0-1");
    }

    #[test]
    fn test_interactive_reprompts_until_valid() {
        let policy = ResolvePolicy {
            prefer_current: false,
            prefer_newest: false,
        };
        let mut prompt = ScriptedPrompt::new(&["abc", "0", "4", " 2 "]);

        let resolved =
            resolve(zfs_candidates(), policy, &ResolvedSet::default(), &mut prompt).unwrap();
        // candidates are listed in ascending order: 1.2.3, 1.9.9, 1.10.0
        assert_eq!(resolved.get("zfs").unwrap().version(), "1.9.9-1");
        assert_eq!(prompt.asked, 4);
    }

    #[test]
    fn test_interactive_timeout_aborts() {
        let policy = ResolvePolicy {
            prefer_current: false,
            prefer_newest: false,
        };
        let mut prompt = ScriptedPrompt::new(&["nope"]);

        let result = resolve(zfs_candidates(), policy, &ResolvedSet::default(), &mut prompt);
        assert!(matches!(result, Err(Error::PromptTimeout(30))));
    }

    #[test]
    fn test_group_by_family_drops_unconfigured() {
        let tokens = vec![
            VersionToken::parse("linux-6.9.1-1-x86_64").unwrap(),
            VersionToken::parse("linux-zen-6.9.1.zen1-1-x86_64").unwrap(),
        ];
        let grouped = group_by_family(tokens, &["linux".to_string()]);
        assert_eq!(grouped.len(), 1);
        assert!(grouped.contains_key("linux"));
    }
}
