//! The update engine.
//!
//! One run walks these stages in order and stops at the first fatal error:
//!
//! 1. fetch the latest manifest and compare versions (no side effects)
//! 2. take the install lock, plan the delta, write `latest.json`
//! 3. download the archive to a temporary file and verify its digest
//! 4. stage the backup in `prior/`
//! 5. extract the changed files
//! 6. promote `latest.json` to `current.json`
//! 7. delete the archive
//! 8. relaunch
//!
//! Failures up to and including the backup leave the installation as it was.
//! After that, errors are either fatal with `prior/` and `latest.json` kept for
//! manual recovery (extraction) or recorded as warnings on a successful run
//! (commit, cleanup, relaunch). Nothing is retried.

use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use stepup_schema::{AppVersion, FileDigest, Platform, VersionManifest, compute_delta};
use tempfile::TempPath;
use tracing::{error, info, warn};

use crate::error::UpdateError;
use crate::installation::{Installation, VersionProvider};
use crate::io::backup::BackupPlan;
use crate::io::extract::{ExtractError, extract_delta};
use crate::launch::Relauncher;
use crate::lock::InstallLock;
use crate::source::{PackageSource, SourceError};

/// Stage an update run was in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Fetching the latest manifest and comparing versions.
    CheckingForUpdate,
    /// Taking the lock, computing the delta and writing `latest.json`.
    Planning,
    /// Downloading and verifying the archive.
    Downloading,
    /// Staging `prior/`.
    BackingUp,
    /// Writing changed files from the archive.
    Extracting,
    /// Promoting `latest.json` to `current.json`.
    Committing,
    /// Removing the archive and, if asked, `prior/`.
    CleaningUp,
    /// Running the updated application.
    Relaunching,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::CheckingForUpdate => "checking for update",
            Stage::Planning => "planning update",
            Stage::Downloading => "downloading",
            Stage::BackingUp => "backing up",
            Stage::Extracting => "extracting",
            Stage::Committing => "committing",
            Stage::CleaningUp => "cleaning up",
            Stage::Relaunching => "relaunching",
        };
        f.write_str(s)
    }
}

/// What a successful update did.
#[derive(Debug)]
pub struct UpdateReport {
    pub from: AppVersion,
    pub to: AppVersion,
    /// Files written from the archive.
    pub changed: BTreeSet<String>,
    /// Files the new version no longer ships; they now live only in `prior/`.
    pub retired: Vec<String>,
    /// Non-fatal problems after the new files were in place.
    pub warnings: Vec<UpdateError>,
}

/// Outcome of one [`UpdateEngine::perform_update`] run.
#[derive(Debug)]
pub enum UpdateResult {
    /// The installed version is the latest one.
    NoUpdateAvailable,
    /// The new version is in place, possibly with warnings.
    Updated(UpdateReport),
    /// The run stopped at `stage`.
    Failed { stage: Stage, error: UpdateError },
}

impl UpdateResult {
    /// True for [`UpdateResult::Updated`].
    pub fn is_updated(&self) -> bool {
        matches!(self, UpdateResult::Updated(_))
    }
}

/// Tunables for an [`UpdateEngine`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Keep `prior/` after a successful update.
    pub keep_backup: bool,
    /// Directory the archive's temporary file is created in. Defaults to the
    /// installation root.
    pub download_dir: Option<PathBuf>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            keep_backup: true,
            download_dir: None,
        }
    }
}

type StageResult<T> = Result<T, (Stage, UpdateError)>;

/// A newer manifest plus the installed and published versions.
type Available = (VersionManifest, AppVersion, AppVersion);

/// Drives an update of one installation.
pub struct UpdateEngine<S, R> {
    install: Installation,
    platform: Platform,
    source: S,
    relauncher: R,
    version: Box<dyn VersionProvider>,
    options: EngineOptions,
}

impl<S: PackageSource, R: Relauncher> UpdateEngine<S, R> {
    /// The installed version is read from the installation's `current.json`.
    pub fn new(install: Installation, platform: Platform, source: S, relauncher: R) -> Self {
        Self {
            version: Box::new(install.clone()),
            install,
            platform,
            source,
            relauncher,
            options: EngineOptions::default(),
        }
    }

    /// Compare against `provider` instead of `current.json`.
    pub fn with_version_provider(mut self, provider: impl VersionProvider + 'static) -> Self {
        self.version = Box::new(provider);
        self
    }

    /// Replace the default [`EngineOptions`].
    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn installation(&self) -> &Installation {
        &self.install
    }

    /// Run one update check and, if a newer version is published, apply it.
    pub async fn perform_update(&self) -> UpdateResult {
        info!(platform = %self.platform, "checking for update");

        let (latest, from, to) = match self.check().await {
            Ok(Some(found)) => found,
            Ok(None) => return UpdateResult::NoUpdateAvailable,
            Err(error) => return failed(Stage::CheckingForUpdate, error),
        };
        info!(%from, %to, "update available");

        let lock_path = self.install.lock_path();
        let lock = match InstallLock::acquire(&lock_path) {
            Ok(lock) => lock,
            Err(source) => {
                return failed(
                    Stage::Planning,
                    UpdateError::Locked {
                        path: lock_path,
                        source,
                    },
                );
            }
        };

        let mut report = match self.apply(&latest, from, to).await {
            Ok(report) => report,
            Err((stage, error)) => return failed(stage, error),
        };
        drop(lock);

        if let Err(e) = self.relauncher.launch_and_wait().await {
            warn!(stage = %Stage::Relaunching, "{e}");
            report.warnings.push(e.into());
        }

        info!(version = %report.to, warnings = report.warnings.len(), "update complete");
        UpdateResult::Updated(report)
    }

    /// Fetch and compare. `None` means the installed version is current.
    async fn check(&self) -> Result<Option<Available>, UpdateError> {
        let latest = self
            .source
            .fetch_latest_manifest(self.platform)
            .await
            .map_err(UpdateError::ManifestUnavailable)?;

        let to = latest.app_version()?;
        let from = self.version.current_version()?;
        if !to.is_newer_than(&from) {
            info!(installed = %from, published = %to, "no update available");
            return Ok(None);
        }

        latest
            .validate()
            .map_err(|e| UpdateError::ManifestUnavailable(SourceError::InvalidManifest(e)))?;
        Ok(Some((latest, from, to)))
    }

    async fn apply(
        &self,
        latest: &VersionManifest,
        from: AppVersion,
        to: AppVersion,
    ) -> StageResult<UpdateReport> {
        let current = self
            .install
            .load_current()
            .map_err(|e| (Stage::Planning, e.into()))?;
        let delta = compute_delta(&current, latest);
        let plan = BackupPlan::new(&current, latest, &delta);
        let retired: Vec<String> = plan.retired(latest).map(str::to_string).collect();
        info!(
            changed = delta.len(),
            retired = retired.len(),
            kept = plan.copies.len(),
            "update planned"
        );

        if self.install.has_pending() {
            warn!("replacing latest.json left by an unfinished update");
        }
        self.install
            .write_pending(latest)
            .map_err(|e| (Stage::Planning, e.into()))?;

        info!(url = %latest.archive_url, "downloading package");
        let archive = match self.download(latest).await {
            Ok(archive) => archive,
            Err(e) => {
                self.abandon();
                return Err((Stage::Downloading, e));
            }
        };

        info!(path = %self.install.backup_dir().display(), "staging backup");
        if let Err(e) = plan.stage(&self.install) {
            self.abandon();
            return Err((Stage::BackingUp, e.into()));
        }

        info!(files = delta.len(), "extracting");
        if let Err(e) = self.extract(&archive, latest, &delta).await {
            // latest.json and prior/ stay behind for manual recovery; the
            // archive goes with `archive`.
            return Err((Stage::Extracting, e.into()));
        }

        let mut warnings = Vec::new();

        info!("committing {}", latest.version);
        if let Err(e) = self.install.commit_pending() {
            warn!(stage = %Stage::Committing, "{e}");
            warnings.push(UpdateError::from(e));
        }

        warnings.extend(self.clean_up(archive).await);

        Ok(UpdateReport {
            from,
            to,
            changed: delta,
            retired,
            warnings,
        })
    }

    fn download_dir(&self) -> PathBuf {
        self.options
            .download_dir
            .clone()
            .unwrap_or_else(|| self.install.root().to_path_buf())
    }

    /// Fetch the archive into a fresh temporary file and check its digest.
    /// The file is deleted when the returned path is dropped, so nothing the
    /// manifest names can be overwritten or removed by the download.
    async fn download(&self, latest: &VersionManifest) -> Result<TempPath, UpdateError> {
        let io_failure = |e: io::Error| UpdateError::Download(SourceError::Io(e));

        let dir = self.download_dir();
        tokio::fs::create_dir_all(&dir).await.map_err(io_failure)?;
        let name = crate::filename_from_url(&latest.archive_url)
            .unwrap_or_else(|| format!("{}.zip", latest.version));
        let archive = tempfile::Builder::new()
            .prefix(&format!(".{name}."))
            .tempfile_in(&dir)
            .map_err(io_failure)?
            .into_temp_path();

        self.source
            .fetch_package(&latest.archive_url, &archive)
            .await
            .map_err(UpdateError::Download)?;

        let path = archive.to_path_buf();
        let actual = tokio::task::spawn_blocking(move || FileDigest::compute_file(&path))
            .await
            .map_err(|e| io_failure(io::Error::other(e)))?
            .map_err(|e| io_failure(io::Error::other(e)))?;

        if actual != latest.archive_hash {
            return Err(UpdateError::PackageIntegrity {
                expected: latest.archive_hash.clone(),
                actual,
            });
        }
        Ok(archive)
    }

    async fn extract(
        &self,
        archive: &Path,
        latest: &VersionManifest,
        delta: &BTreeSet<String>,
    ) -> Result<Vec<String>, ExtractError> {
        let archive = archive.to_path_buf();
        let install = self.install.clone();
        let latest = latest.clone();
        let delta = delta.clone();

        tokio::task::spawn_blocking(move || extract_delta(&archive, &install, &latest, &delta))
            .await
            .map_err(|e| ExtractError::Io(io::Error::other(e)))?
    }

    /// Undo the non-destructive preparation of a run that failed before extraction.
    fn abandon(&self) {
        if let Err(e) = self.install.discard_pending() {
            warn!("could not remove latest.json: {e}");
        }
    }

    /// Remove the archive and, unless kept, `prior/`. Failures are returned
    /// as warnings.
    async fn clean_up(&self, archive: TempPath) -> Vec<UpdateError> {
        let mut warnings = Vec::new();

        if !self.options.keep_backup {
            let backup = self.install.backup_dir();
            if let Err(source) = tokio::fs::remove_dir_all(&backup).await {
                warn!(stage = %Stage::CleaningUp, path = %backup.display(), "could not remove backup: {source}");
                warnings.push(UpdateError::CleanupFailure {
                    path: backup,
                    source,
                });
            }
        }

        let path = archive.to_path_buf();
        if let Err(source) = archive.close() {
            warn!(stage = %Stage::CleaningUp, path = %path.display(), "could not remove downloaded package: {source}");
            warnings.push(UpdateError::CleanupFailure { path, source });
        }

        warnings
    }
}

fn failed(stage: Stage, error: UpdateError) -> UpdateResult {
    if error.is_fatal() {
        error!(%stage, "update failed: {error}");
    } else {
        warn!(%stage, "update skipped: {error}");
    }
    UpdateResult::Failed { stage, error }
}
