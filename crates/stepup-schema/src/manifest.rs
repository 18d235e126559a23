//! Version manifests: what a published release contains.
//!
//! A manifest names a version, the archive that carries it, the archive's
//! digest, and every file of the installation with its own digest. The
//! manifest never lists itself: the copy written into an installation is
//! [`CURRENT_MANIFEST`], kept alongside the listed files.
//!
//! Wire format:
//!
//! ```json
//! {
//!   "version": "1.0.2.0",
//!   "published": "2024-05-01T12:00:00Z",
//!   "url": "https://updates.example.com/linux-x64/linux-x64_1.0.2.0.zip",
//!   "hash": "<base64 sha256 of the archive>",
//!   "files": [ { "name": "Main", "hash": "<base64 sha256>" } ]
//! }
//! ```

use std::collections::{BTreeSet, HashMap, HashSet};
use std::io;
use std::path::{Component, Path};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hash::{DigestError, FileDigest};
use crate::version::{AppVersion, VersionError};

/// File name of the installed version's manifest.
pub const CURRENT_MANIFEST: &str = "current.json";

/// File name of the pending manifest written while an update is in flight.
pub const PENDING_MANIFEST: &str = "latest.json";

/// Directory holding the pre-update backup.
pub const BACKUP_DIR: &str = "prior";

/// Directory a new backup is assembled in before it replaces `prior/`.
pub const BACKUP_STAGING_DIR: &str = "prior.tmp";

/// Where the previous `prior/` is parked while the new one is swapped in.
pub const BACKUP_DISPLACED_DIR: &str = "prior.old";

/// Names an installation reserves for its own bookkeeping.
pub const RESERVED_NAMES: [&str; 5] = [
    CURRENT_MANIFEST,
    PENDING_MANIFEST,
    BACKUP_DIR,
    BACKUP_STAGING_DIR,
    BACKUP_DISPLACED_DIR,
];

/// Errors raised while reading, writing or validating a manifest.
#[derive(Error, Debug)]
pub enum ManifestError {
    /// Reading or writing the manifest file failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The manifest is not valid JSON for this schema.
    #[error("Invalid manifest JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The manifest's version string is malformed.
    #[error(transparent)]
    Version(#[from] VersionError),

    /// Two entries share a name.
    #[error("Duplicate file entry '{0}'")]
    DuplicateFile(String),

    /// A file name is empty, absolute, escapes the installation, or is reserved.
    #[error("Invalid file name '{0}'")]
    InvalidFileName(String),

    /// A file entry's digest is not a SHA-256 digest.
    #[error("Invalid digest for '{name}': {source}")]
    InvalidDigest {
        /// Entry the digest belongs to.
        name: String,
        /// Underlying validation failure.
        source: DigestError,
    },
}

/// One file of an installation and the digest of its contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileEntry {
    /// Path relative to the installation directory, `/`-separated.
    #[serde(alias = "Name")]
    pub name: String,
    /// Digest of the file's bytes.
    #[serde(alias = "Hash")]
    pub hash: FileDigest,
}

impl FileEntry {
    /// Create an entry.
    pub fn new(name: impl Into<String>, hash: FileDigest) -> Self {
        Self {
            name: name.into(),
            hash,
        }
    }
}

/// A published version of the application.
///
/// Manifests are values: the updater reads them and replaces persisted copies
/// wholesale, it never edits one in place. Equality compares every field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionManifest {
    /// Four-part version string, e.g. `1.0.2.0`.
    #[serde(alias = "Version")]
    pub version: String,
    /// Publication time. Informational only.
    #[serde(alias = "Published")]
    pub published: DateTime<Utc>,
    /// Location of the package archive.
    #[serde(rename = "url", alias = "Url")]
    pub archive_url: String,
    /// Digest of the package archive; empty in the copy embedded in the archive.
    #[serde(rename = "hash", alias = "Hash", default)]
    pub archive_hash: FileDigest,
    /// Every file of the installation except the manifest itself.
    #[serde(alias = "Files")]
    pub files: Vec<FileEntry>,
}

impl VersionManifest {
    /// Parse from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Json`] if the bytes do not match the schema.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ManifestError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Serialize as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Json`] if serialization fails.
    pub fn to_json_pretty(&self) -> Result<String, ManifestError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Read a manifest file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let bytes = std::fs::read(path)?;
        Self::from_slice(&bytes)
    }

    /// Write a manifest file, replacing any existing one.
    ///
    /// The content goes to a sibling temporary file first and is renamed over
    /// `path`, so readers never observe a half-written manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization, the write, or the rename fails.
    pub fn save(&self, path: &Path) -> Result<(), ManifestError> {
        let json = self.to_json_pretty()?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        if let Err(e) = std::fs::rename(&tmp, path) {
            std::fs::remove_file(&tmp).ok();
            return Err(e.into());
        }
        Ok(())
    }

    /// Parsed version.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError`] if the version string is malformed.
    pub fn app_version(&self) -> Result<AppVersion, VersionError> {
        self.version.parse()
    }

    /// Look up a file entry by name.
    pub fn file(&self, name: &str) -> Option<&FileEntry> {
        self.files.iter().find(|f| f.name == name)
    }

    /// Names of all listed files.
    pub fn file_names(&self) -> HashSet<&str> {
        self.files.iter().map(|f| f.name.as_str()).collect()
    }

    /// Check the structural invariants of a manifest.
    ///
    /// The version must be a four-part number, names must be unique relative
    /// paths that stay inside the installation and avoid the reserved
    /// bookkeeping names, and file digests must be well-formed. The archive
    /// digest is not checked here since the embedded copy legitimately has none.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), ManifestError> {
        self.app_version()?;

        let mut seen = HashSet::new();
        for entry in &self.files {
            validate_file_name(&entry.name)?;
            if !seen.insert(entry.name.as_str()) {
                return Err(ManifestError::DuplicateFile(entry.name.clone()));
            }
            FileDigest::validated(entry.hash.as_str()).map_err(|source| {
                ManifestError::InvalidDigest {
                    name: entry.name.clone(),
                    source,
                }
            })?;
        }

        Ok(())
    }
}

fn validate_file_name(name: &str) -> Result<(), ManifestError> {
    let invalid = || ManifestError::InvalidFileName(name.to_string());

    if name.is_empty() || name.contains('\\') {
        return Err(invalid());
    }

    let path = Path::new(name);
    if !path
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        return Err(invalid());
    }

    let top = name.split('/').next().unwrap_or(name);
    if RESERVED_NAMES.contains(&top) {
        return Err(invalid());
    }

    Ok(())
}

/// Names of files in `latest` that are new or whose digest changed since `current`.
///
/// Files only present in `current` are never part of the delta; they are
/// retired by the backup step instead. The result is sorted, so the same
/// manifests always produce the same delta regardless of listing order.
pub fn compute_delta(current: &VersionManifest, latest: &VersionManifest) -> BTreeSet<String> {
    let current_hashes: HashMap<&str, &FileDigest> = current
        .files
        .iter()
        .map(|f| (f.name.as_str(), &f.hash))
        .collect();

    latest
        .files
        .iter()
        .filter(|f| current_hashes.get(f.name.as_str()) != Some(&&f.hash))
        .map(|f| f.name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(version: &str, files: &[(&str, &str)]) -> VersionManifest {
        VersionManifest {
            version: version.to_string(),
            published: DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            archive_url: format!("https://updates.example.com/linux-x64/linux-x64_{version}.zip"),
            archive_hash: FileDigest::default(),
            files: files
                .iter()
                .map(|(name, content)| {
                    FileEntry::new(*name, FileDigest::compute(content.as_bytes()))
                })
                .collect(),
        }
    }

    #[test]
    fn test_delta_new_and_changed() {
        let current = manifest("1.0.0.0", &[("a", "h1"), ("b", "h2")]);
        let latest = manifest("1.0.2.0", &[("a", "h1"), ("b", "h3"), ("c", "h4")]);

        let delta = compute_delta(&current, &latest);
        let expected: BTreeSet<String> = ["b", "c"].iter().map(ToString::to_string).collect();
        assert_eq!(delta, expected);
    }

    #[test]
    fn test_delta_is_order_independent() {
        let current = manifest("1.0.0.0", &[("b", "h2"), ("a", "h1")]);
        let latest = manifest("1.0.2.0", &[("c", "h4"), ("b", "h3"), ("a", "h1")]);
        let reordered = manifest("1.0.2.0", &[("a", "h1"), ("c", "h4"), ("b", "h3")]);

        assert_eq!(
            compute_delta(&current, &latest),
            compute_delta(&current, &reordered)
        );
    }

    #[test]
    fn test_delta_excludes_retired_files() {
        let current = manifest("1.0.0.0", &[("a", "h1"), ("old", "x")]);
        let latest = manifest("1.0.1.0", &[("a", "h1")]);

        assert!(compute_delta(&current, &latest).is_empty());
    }

    #[test]
    fn test_delta_against_empty_install() {
        let current = manifest("0.0.0.0", &[]);
        let latest = manifest("1.0.0.0", &[("a", "h1"), ("lib/b", "h2")]);
        assert_eq!(compute_delta(&current, &latest).len(), 2);
    }

    #[test]
    fn test_wire_format() {
        let json = r#"{
            "version": "1.0.2.0",
            "published": "2024-05-01T12:00:00+02:00",
            "url": "https://updates.example.com/linux-x64/linux-x64_1.0.2.0.zip",
            "hash": "uU0nuZNNPgilLlLX2n2r+sSE7+N6U4DukIj3rOLvzek=",
            "files": [
                { "name": "Main", "hash": "uU0nuZNNPgilLlLX2n2r+sSE7+N6U4DukIj3rOLvzek=" }
            ]
        }"#;

        let parsed = VersionManifest::from_slice(json.as_bytes()).unwrap();
        assert_eq!(parsed.app_version().unwrap(), AppVersion::new(1, 0, 2, 0));
        assert_eq!(parsed.files.len(), 1);
        assert_eq!(parsed.file("Main").unwrap().hash, parsed.archive_hash);
        assert!(parsed.validate().is_ok());

        let value: serde_json::Value =
            serde_json::from_str(&parsed.to_json_pretty().unwrap()).unwrap();
        for key in ["version", "published", "url", "hash", "files"] {
            assert!(value.get(key).is_some(), "missing key {key}");
        }
    }

    #[test]
    fn test_accepts_pascal_case_keys() {
        let json = r#"{
            "Version": "1.0.0.0",
            "Published": "2024-05-01T12:00:00.1234567+00:00",
            "Url": "https://updates.example.com/a.zip",
            "Hash": "",
            "Files": [ { "Name": "Main", "Hash": "uU0nuZNNPgilLlLX2n2r+sSE7+N6U4DukIj3rOLvzek=" } ]
        }"#;

        let parsed = VersionManifest::from_slice(json.as_bytes()).unwrap();
        assert!(parsed.archive_hash.is_empty());
        assert_eq!(parsed.files[0].name, "Main");
    }

    #[test]
    fn test_validate_rejects_bad_entries() {
        let dup = manifest("1.0.0.0", &[("a", "1"), ("a", "2")]);
        assert!(matches!(
            dup.validate(),
            Err(ManifestError::DuplicateFile(_))
        ));

        for bad in [
            "",
            "../escape",
            "/etc/passwd",
            "a/../../b",
            "current.json",
            "prior/x",
            "prior.tmp/x",
            "a\\b",
        ] {
            let m = manifest("1.0.0.0", &[(bad, "1")]);
            assert!(
                matches!(m.validate(), Err(ManifestError::InvalidFileName(_))),
                "'{bad}' should be rejected"
            );
        }

        let mut bad_digest = manifest("1.0.0.0", &[("a", "1")]);
        bad_digest.files[0].hash = FileDigest::new("nope");
        assert!(matches!(
            bad_digest.validate(),
            Err(ManifestError::InvalidDigest { .. })
        ));

        let bad_version = manifest("1.0", &[]);
        assert!(matches!(
            bad_version.validate(),
            Err(ManifestError::Version(_))
        ));

        let nested = manifest("1.0.0.0", &[("lib/plugin.so", "1")]);
        assert!(nested.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CURRENT_MANIFEST);
        let m = manifest("1.2.3.4", &[("a", "1")]);

        m.save(&path).unwrap();
        assert_eq!(VersionManifest::load(&path).unwrap(), m);
        assert!(!path.with_extension("json.tmp").exists());

        let newer = manifest("1.2.3.5", &[("a", "2")]);
        newer.save(&path).unwrap();
        assert_eq!(VersionManifest::load(&path).unwrap(), newer);
    }
}
