// src/repository/catalog.rs

//! Remote catalog listing
//!
//! The catalog is an Arch Linux repository database (`<repo>.db`): a
//! compressed tarball with one `<pkgname>-<pkgver>-<pkgrel>/desc` file per
//! package, each holding `%FIELD%` blocks. Listing it produces one
//! `NAME-VERSION-ARCH` token per package.

use super::{Fetcher, RetryPolicy};
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use std::collections::HashMap;
use std::io::Read;
use tar::Archive;
use tracing::{debug, info, warn};
use xz2::read::XzDecoder;

/// Source of the whitespace-delimited listing of available packages
pub trait Catalog {
    fn listing(&self) -> Result<String>;
}

/// Catalog downloaded from a repository database URL
pub struct RemoteCatalog<'a> {
    fetcher: &'a dyn Fetcher,
    url: String,
    retry: RetryPolicy,
    cancel: CancelToken,
}

impl<'a> RemoteCatalog<'a> {
    pub fn new(fetcher: &'a dyn Fetcher, url: impl Into<String>, cancel: CancelToken) -> Self {
        Self {
            fetcher,
            url: url.into(),
            retry: RetryPolicy::catalog(),
            cancel,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn download(&self) -> Result<Vec<u8>> {
        debug!("Downloading catalog from: {}", self.url);
        self.retry.run(&self.url, &self.cancel, |_| {
            let mut reader = self.fetcher.fetch(&self.url)?;
            let mut bytes = Vec::new();
            reader.read_to_end(&mut bytes).map_err(|e| {
                Error::DownloadError(format!("Failed to read {}: {}", self.url, e))
            })?;
            Ok(bytes)
        })
    }
}

impl Catalog for RemoteCatalog<'_> {
    fn listing(&self) -> Result<String> {
        info!("Fetching catalog {}", self.url);
        let compressed = self.download()?;
        let tokens = tokenize_database(&compressed)?;
        info!("Catalog lists {} packages", tokens.len());
        Ok(tokens.join("\n"))
    }
}

/// Decompress the database (handles .gz, .xz, or .zst)
fn decompress_database(data: &[u8]) -> Result<Vec<u8>> {
    // Try gzip first
    let mut gz = GzDecoder::new(data);
    let mut decompressed = Vec::new();
    if gz.read_to_end(&mut decompressed).is_ok() && !decompressed.is_empty() {
        debug!("Decompressed gzip database");
        return Ok(decompressed);
    }

    // Try xz
    let mut xz = XzDecoder::new(data);
    let mut decompressed = Vec::new();
    if xz.read_to_end(&mut decompressed).is_ok() && !decompressed.is_empty() {
        debug!("Decompressed xz database");
        return Ok(decompressed);
    }

    // If neither worked, try zstd
    match zstd::decode_all(data) {
        Ok(decompressed) => {
            debug!("Decompressed zstd database");
            Ok(decompressed)
        }
        Err(e) => Err(Error::ParseError(format!(
            "Failed to decompress catalog (tried gz, xz, zstd): {}",
            e
        ))),
    }
}

/// Parse a desc file into its `%FIELD%` blocks
fn parse_desc_file(content: &str) -> HashMap<String, Vec<String>> {
    let mut fields = HashMap::new();
    let mut current_field: Option<String> = None;
    let mut values: Vec<String> = Vec::new();

    for line in content.lines() {
        let trimmed = line.trim();

        if trimmed.len() > 2 && trimmed.starts_with('%') && trimmed.ends_with('%') {
            if let Some(field) = current_field.take() {
                fields.insert(field, std::mem::take(&mut values));
            }
            current_field = Some(trimmed[1..trimmed.len() - 1].to_string());
        } else if !trimmed.is_empty() {
            values.push(trimmed.to_string());
        }
    }

    if let Some(field) = current_field {
        fields.insert(field, values);
    }

    fields
}

/// List `NAME-VERSION-ARCH` for every package in a compressed database
pub fn tokenize_database(data: &[u8]) -> Result<Vec<String>> {
    let decompressed = decompress_database(data)?;
    let mut archive = Archive::new(decompressed.as_slice());
    let mut tokens = Vec::new();

    let entries = archive
        .entries()
        .map_err(|e| Error::ParseError(format!("Failed to read catalog tarball: {}", e)))?;

    for entry in entries {
        let mut entry = entry
            .map_err(|e| Error::ParseError(format!("Failed to read tarball entry: {}", e)))?;

        let path = entry
            .path()
            .map_err(|e| Error::ParseError(format!("Invalid path in tarball: {}", e)))?
            .into_owned();
        if !path.ends_with("desc") {
            continue;
        }

        let mut content = String::new();
        entry
            .read_to_string(&mut content)
            .map_err(|e| Error::ParseError(format!("Failed to read desc file: {}", e)))?;

        let fields = parse_desc_file(&content);
        let field = |name: &str| fields.get(name).and_then(|v| v.first());

        // whether an entry matters is decided by the family filter downstream
        match (field("NAME"), field("VERSION"), field("ARCH")) {
            (Some(name), Some(version), Some(arch)) => {
                tokens.push(format!("{}-{}-{}", name, version, arch));
            }
            _ => warn!(
                "Skipping {}: missing %NAME%, %VERSION% or %ARCH%",
                path.display()
            ),
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::cell::Cell;
    use std::io::Cursor;
    use std::time::Duration;

    fn desc(name: &str, version: &str, arch: &str) -> String {
        format!(
            "%FILENAME%\n{n}-{v}-{a}.pkg.tar.zst\n\n%NAME%\n{n}\n\n%VERSION%\n{v}\n\n%DESC%\nThe {n} kernel\n\n%ARCH%\n{a}\n",
            n = name,
            v = version,
            a = arch
        )
    }

    fn gz_database(packages: &[(&str, &str, &str)]) -> Vec<u8> {
        let entries: Vec<_> = packages
            .iter()
            .map(|(name, version, arch)| {
                (format!("{}-{}/desc", name, version), desc(name, version, arch))
            })
            .collect();
        gz_entries(&entries)
    }

    fn gz_entries(entries: &[(String, String)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (path, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, path, content.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    struct FlakyFetcher {
        body: Vec<u8>,
        failures: Cell<u32>,
    }

    impl Fetcher for FlakyFetcher {
        fn fetch(&self, url: &str) -> Result<Box<dyn Read>> {
            if self.failures.get() > 0 {
                self.failures.set(self.failures.get() - 1);
                return Err(Error::DownloadError(format!("{} unreachable", url)));
            }
            Ok(Box::new(Cursor::new(self.body.clone())))
        }
    }

    #[test]
    fn test_parse_desc_file() {
        let fields = parse_desc_file(&desc("linux", "6.9.1.arch1-1", "x86_64"));
        assert_eq!(fields.get("NAME"), Some(&vec!["linux".to_string()]));
        assert_eq!(fields.get("VERSION"), Some(&vec!["6.9.1.arch1-1".to_string()]));
        assert_eq!(fields.get("DESC"), Some(&vec!["The linux kernel".to_string()]));
    }

    #[test]
    fn test_tokenize_gzip_database() {
        let data = gz_database(&[
            ("linux", "6.9.1.arch1-1", "x86_64"),
            ("linux-headers", "6.9.1.arch1-1", "x86_64"),
            ("linux-firmware", "20240510.b9d2bf23-1", "any"),
        ]);

        let tokens = tokenize_database(&data).unwrap();
        assert_eq!(
            tokens,
            vec![
                "linux-6.9.1.arch1-1-x86_64",
                "linux-headers-6.9.1.arch1-1-x86_64",
                "linux-firmware-20240510.b9d2bf23-1-any",
            ]
        );
    }

    #[test]
    fn test_tokenize_zstd_database() {
        let gz = gz_database(&[("linux-lts", "6.6.30-1", "x86_64")]);
        let mut tar_bytes = Vec::new();
        GzDecoder::new(gz.as_slice()).read_to_end(&mut tar_bytes).unwrap();
        let zst = zstd::encode_all(tar_bytes.as_slice(), 3).unwrap();

        assert_eq!(tokenize_database(&zst).unwrap(), vec!["linux-lts-6.6.30-1-x86_64"]);
    }

    #[test]
    fn test_incomplete_desc_is_skipped() {
        let data = gz_entries(&[
            (
                "linux-6.9.1.arch1-1/desc".to_string(),
                desc("linux", "6.9.1.arch1-1", "x86_64"),
            ),
            (
                "broken-pkg-1.0-1/desc".to_string(),
                "%NAME%\nbroken-pkg\n\n%VERSION%\n1.0-1\n".to_string(),
            ),
        ]);

        assert_eq!(
            tokenize_database(&data).unwrap(),
            vec!["linux-6.9.1.arch1-1-x86_64"]
        );
    }

    #[test]
    fn test_garbage_is_a_parse_error() {
        let result = tokenize_database(b"definitely not a database");
        assert!(matches!(result, Err(Error::ParseError(_))));
    }

    #[test]
    fn test_remote_catalog_retries() {
        let fetcher = FlakyFetcher {
            body: gz_database(&[("linux", "6.9.1.arch1-1", "x86_64")]),
            failures: Cell::new(2),
        };
        let catalog = RemoteCatalog::new(&fetcher, "https://mirror.test/core.db", CancelToken::new())
            .with_retry(RetryPolicy {
                max_attempts: 3,
                backoff_step: Duration::ZERO,
            });

        assert_eq!(catalog.listing().unwrap(), "linux-6.9.1.arch1-1-x86_64");
    }
}
