// src/version.rs

//! Package version tokens and Arch-style version comparison
//!
//! A token is one whitespace-delimited entry of the form
//! `<family>-<pkgver>-<pkgrel>-<arch>`, e.g. `linux-lts-6.6.30-1-x86_64`.
//! Tokens compare by family, then by version using the same rules as
//! pacman's `vercmp`.

use crate::error::{Error, Result};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;

/// Package file extension used for every artifact
pub const PACKAGE_EXT: &str = ".pkg.tar.zst";

/// Suffix of detached signature files
pub const SIGNATURE_EXT: &str = ".sig";

/// Sub-package labels shipped alongside each kernel
const ARTIFACT_LABELS: [ArtifactLabel; 2] = [ArtifactLabel::Base, ArtifactLabel::Headers];

/// Which sub-package of a kernel family an artifact belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactLabel {
    Base,
    Headers,
}

impl ArtifactLabel {
    /// Suffix appended to the family name for this sub-package
    pub fn suffix(&self) -> &'static str {
        match self {
            ArtifactLabel::Base => "",
            ArtifactLabel::Headers => "-headers",
        }
    }
}

/// One downloadable package of a token, plus its detached signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub label: ArtifactLabel,
    /// Package name as registered in the repository database
    pub package: String,
    pub file_name: String,
    pub signature: Option<String>,
}

impl Artifact {
    /// Every file belonging to this artifact, package first
    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.file_name.as_str()).chain(self.signature.as_deref())
    }
}

/// A parsed, comparable `(family, version)` pair
#[derive(Debug, Clone, Serialize)]
pub struct VersionToken {
    family: String,
    version: String,
    arch: String,
    raw: String,
    artifacts: Vec<Artifact>,
}

impl VersionToken {
    /// Parse a single token
    ///
    /// The family is everything before the last three dash-separated fields,
    /// so family names may themselves contain dashes.
    pub fn parse(text: &str) -> Result<Self> {
        let raw = text.trim();
        let malformed = |reason: &str| Error::ParseError(format!("'{}': {}", raw, reason));

        let mut fields = raw.rsplitn(4, '-');
        let (Some(arch), Some(pkgrel), Some(pkgver), Some(family)) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(malformed("expected <name>-<pkgver>-<pkgrel>-<arch>"));
        };

        if family.is_empty() {
            return Err(malformed("missing package name"));
        }
        if !is_valid_pkgver(pkgver) {
            return Err(malformed("invalid pkgver"));
        }
        if pkgrel.is_empty() || !pkgrel.chars().all(|c| c.is_ascii_digit() || c == '.') {
            return Err(malformed("invalid pkgrel"));
        }
        if arch.is_empty() || !arch.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(malformed("invalid architecture"));
        }

        let version = format!("{}-{}", pkgver, pkgrel);
        let artifacts = ARTIFACT_LABELS
            .iter()
            .map(|label| {
                let package = format!("{}{}", family, label.suffix());
                let file_name = format!("{}-{}-{}{}", package, version, arch, PACKAGE_EXT);
                let signature = Some(format!("{}{}", file_name, SIGNATURE_EXT));
                Artifact {
                    label: *label,
                    package,
                    file_name,
                    signature,
                }
            })
            .collect();

        Ok(Self {
            family: family.to_string(),
            version,
            arch: arch.to_string(),
            raw: raw.to_string(),
            artifacts,
        })
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    /// Full version including pkgrel (and epoch, if any)
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }
}

impl PartialEq for VersionToken {
    fn eq(&self, other: &Self) -> bool {
        self.family == other.family && self.version == other.version
    }
}

impl Eq for VersionToken {}

impl Ord for VersionToken {
    fn cmp(&self, other: &Self) -> Ordering {
        self.family
            .cmp(&other.family)
            .then_with(|| vercmp(&self.version, &other.version))
            .then_with(|| self.version.cmp(&other.version))
    }
}

impl PartialOrd for VersionToken {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Parse every token in `text` that belongs to one of `families`
///
/// A token belongs to family `F` when it starts with `F-` followed by a
/// digit. A matching token that fails to parse, or parses to a different
/// family, is an error: a malformed catalog cannot be trusted.
/// The result is deduplicated by raw text and sorted.
pub fn parse_listing(text: &str, families: &[String]) -> Result<Vec<VersionToken>> {
    let mut seen = HashSet::new();
    let mut tokens = Vec::new();

    for word in text.split_whitespace() {
        let Some(family) = families.iter().find(|f| matches_family(word, f)) else {
            continue;
        };
        if !seen.insert(word) {
            continue;
        }

        let token = VersionToken::parse(word)?;
        if token.family() != family {
            return Err(Error::ParseError(format!(
                "'{}': expected package {}, found {}",
                word,
                family,
                token.family()
            )));
        }
        tokens.push(token);
    }

    tokens.sort();
    Ok(tokens)
}

fn matches_family(word: &str, family: &str) -> bool {
    word.strip_prefix(family)
        .and_then(|rest| rest.strip_prefix('-'))
        .and_then(|rest| rest.chars().next())
        .is_some_and(|c| c.is_ascii_digit())
}

fn is_valid_pkgver(pkgver: &str) -> bool {
    let body = match pkgver.split_once(':') {
        Some((epoch, rest)) if !epoch.is_empty() && epoch.chars().all(|c| c.is_ascii_digit()) => rest,
        Some(_) => return false,
        None => pkgver,
    };
    !body.is_empty()
        && body
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '~'))
}

/// Compare two full versions (`[epoch:]pkgver[-pkgrel]`) like pacman's vercmp
pub fn vercmp(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let (epoch_a, ver_a, rel_a) = split_evr(a);
    let (epoch_b, ver_b, rel_b) = split_evr(b);

    segment_cmp(epoch_a, epoch_b)
        .then_with(|| segment_cmp(ver_a, ver_b))
        .then_with(|| match (rel_a, rel_b) {
            (Some(ra), Some(rb)) => segment_cmp(ra, rb),
            _ => Ordering::Equal,
        })
}

fn split_evr(full: &str) -> (&str, &str, Option<&str>) {
    let (epoch, rest) = match full.split_once(':') {
        Some((e, rest)) if e.chars().all(|c| c.is_ascii_digit()) => {
            (if e.is_empty() { "0" } else { e }, rest)
        }
        _ => ("0", full),
    };
    match rest.rsplit_once('-') {
        Some((ver, rel)) => (epoch, ver, Some(rel)),
        None => (epoch, rest, None),
    }
}

/// rpmvercmp: alternating numeric and alpha segments split on separators
fn segment_cmp(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let a = a.as_bytes();
    let b = b.as_bytes();
    let (mut i, mut j) = (0, 0);

    while i < a.len() && j < b.len() {
        let (sep_a, sep_b) = (i, j);
        while i < a.len() && !a[i].is_ascii_alphanumeric() {
            i += 1;
        }
        while j < b.len() && !b[j].is_ascii_alphanumeric() {
            j += 1;
        }
        if i >= a.len() || j >= b.len() {
            break;
        }
        if i - sep_a != j - sep_b {
            return (i - sep_a).cmp(&(j - sep_b));
        }

        let numeric = a[i].is_ascii_digit();
        let same_kind = |c: &u8| {
            if numeric {
                c.is_ascii_digit()
            } else {
                c.is_ascii_alphabetic()
            }
        };
        let end_a = i + a[i..].iter().take_while(|c| same_kind(*c)).count();
        let end_b = j + b[j..].iter().take_while(|c| same_kind(*c)).count();
        let (seg_a, seg_b) = (&a[i..end_a], &b[j..end_b]);

        // numeric segments are always newer than alpha segments
        if seg_b.is_empty() {
            return if numeric {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        let ord = if numeric {
            let trim = |s: &[u8]| -> usize { s.iter().take_while(|c| **c == b'0').count() };
            let (na, nb) = (&seg_a[trim(seg_a)..], &seg_b[trim(seg_b)..]);
            na.len().cmp(&nb.len()).then_with(|| na.cmp(nb))
        } else {
            seg_a.cmp(seg_b)
        };
        if ord != Ordering::Equal {
            return ord;
        }

        i = end_a;
        j = end_b;
    }

    if i >= a.len() && j >= b.len() {
        return Ordering::Equal;
    }

    // a remaining alpha tail never beats an empty string
    if (i >= a.len() && !b[j].is_ascii_alphabetic()) || (i < a.len() && a[i].is_ascii_alphabetic()) {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}
