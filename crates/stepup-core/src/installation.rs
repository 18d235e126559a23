//! Local installation state.
//!
//! An installation is a single directory holding the application's files and
//! its bookkeeping:
//!
//! ```text
//! <root>/
//! ├── current.json    # manifest of the installed version (always present)
//! ├── latest.json     # pending manifest, only while an update is in flight
//! ├── prior/          # backup of the previous version
//! ├── stepup.toml     # updater configuration (optional)
//! └── .stepup.lock    # held while an update runs
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use stepup_schema::{
    AppVersion, BACKUP_DIR, BACKUP_DISPLACED_DIR, BACKUP_STAGING_DIR, CURRENT_MANIFEST,
    ManifestError, PENDING_MANIFEST, VersionManifest,
};
use thiserror::Error;

use crate::error::UpdateError;

/// Environment variable overriding the installation directory.
pub const HOME_ENV: &str = "STEPUP_HOME";

/// Configuration file name inside the installation.
pub const CONFIG_FILE: &str = "stepup.toml";

/// Lock file name inside the installation.
pub const LOCK_FILE: &str = ".stepup.lock";

/// Promoting the pending manifest to current failed.
#[derive(Error, Debug)]
pub enum CommitError {
    /// `current.json` could not be replaced; `latest.json` is still in place.
    #[error("could not replace {CURRENT_MANIFEST} with {PENDING_MANIFEST}: {0}")]
    Promote(#[source] io::Error),

    /// `current.json` was replaced but `latest.json` could not be removed.
    #[error("could not remove {PENDING_MANIFEST}: {0}")]
    RemovePending(#[source] io::Error),
}

/// Handle on an installation directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installation {
    root: PathBuf,
}

impl Installation {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the installation directory: `STEPUP_HOME` if set, otherwise
    /// the directory containing the running executable.
    pub fn locate() -> io::Result<Self> {
        if let Ok(dir) = std::env::var(HOME_ENV) {
            return Ok(Self::new(dir));
        }
        let exe = std::env::current_exe()?;
        exe.parent()
            .map(Self::new)
            .ok_or_else(|| io::Error::other("executable has no parent directory"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a manifest-listed file (`/`-separated name).
    pub fn file_path(&self, name: &str) -> PathBuf {
        name.split('/').fold(self.root.clone(), |p, part| p.join(part))
    }

    pub fn current_manifest_path(&self) -> PathBuf {
        self.root.join(CURRENT_MANIFEST)
    }

    pub fn pending_manifest_path(&self) -> PathBuf {
        self.root.join(PENDING_MANIFEST)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.root.join(BACKUP_DIR)
    }

    /// Where a new backup is assembled before it replaces `prior/`.
    pub fn backup_staging_dir(&self) -> PathBuf {
        self.root.join(BACKUP_STAGING_DIR)
    }

    pub fn displaced_backup_dir(&self) -> PathBuf {
        self.root.join(BACKUP_DISPLACED_DIR)
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    /// Read the installed version's manifest.
    pub fn load_current(&self) -> Result<VersionManifest, ManifestError> {
        VersionManifest::load(&self.current_manifest_path())
    }

    /// True if a pending manifest exists, i.e. an earlier update did not finish.
    pub fn has_pending(&self) -> bool {
        self.pending_manifest_path().exists()
    }

    /// Record `manifest` as the pending update.
    pub fn write_pending(&self, manifest: &VersionManifest) -> Result<(), ManifestError> {
        manifest.save(&self.pending_manifest_path())
    }

    /// Remove the pending manifest if there is one.
    pub fn discard_pending(&self) -> io::Result<()> {
        match fs::remove_file(self.pending_manifest_path()) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    /// Make the pending manifest the current one.
    ///
    /// The pending content is copied next to `current.json` and renamed over
    /// it, then `latest.json` is deleted. If the copy or rename fails the
    /// pending manifest stays where it is.
    pub fn commit_pending(&self) -> Result<(), CommitError> {
        let pending = self.pending_manifest_path();
        let current = self.current_manifest_path();
        let staged = current.with_extension("json.tmp");

        fs::copy(&pending, &staged)
            .and_then(|_| fs::rename(&staged, &current))
            .map_err(|e| {
                fs::remove_file(&staged).ok();
                CommitError::Promote(e)
            })?;

        fs::remove_file(&pending).map_err(CommitError::RemovePending)
    }
}

/// Source of the version the updater compares against.
pub trait VersionProvider: Send + Sync {
    /// Version currently installed.
    fn current_version(&self) -> Result<AppVersion, UpdateError>;
}

/// The installed version is whatever `current.json` says.
impl VersionProvider for Installation {
    fn current_version(&self) -> Result<AppVersion, UpdateError> {
        Ok(self.load_current()?.app_version()?)
    }
}

/// A fixed version, typically compiled into the binary.
impl VersionProvider for AppVersion {
    fn current_version(&self) -> Result<AppVersion, UpdateError> {
        Ok(*self)
    }
}
