//! Backup staging into `prior/`.
//!
//! Files that the update will overwrite or retire are moved out of the live
//! installation; every other file of the current version is copied. The
//! current manifest goes in too, so `prior/` can be restored by copying it
//! back over the installation.
//!
//! The backup is assembled in `prior.tmp/` and only swapped over `prior/`
//! once it is complete. If any step fails, files already moved are put back
//! and the staging directory is removed, so the installation and any earlier
//! `prior/` are left as they were. A crash mid-stage is not covered; there is
//! no on-disk journal. Moved files are then left in `prior.tmp/`, and later
//! runs refuse to stage until it has been dealt with.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use stepup_schema::{CURRENT_MANIFEST, VersionManifest};
use thiserror::Error;
use tracing::{debug, warn};

use crate::installation::Installation;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Could not prepare backup directory {}: {source}", path.display())]
    Prepare { path: PathBuf, source: io::Error },

    #[error("An earlier backup was interrupted; its files are still in {}", path.display())]
    Interrupted { path: PathBuf },

    #[error("Could not move '{name}' into the backup: {source}")]
    Move { name: String, source: io::Error },

    #[error("Could not copy '{name}' into the backup: {source}")]
    Copy { name: String, source: io::Error },

    #[error("Could not copy {CURRENT_MANIFEST} into the backup: {0}")]
    Manifest(#[source] io::Error),

    #[error("Could not replace the previous backup at {}: {source}", path.display())]
    Replace { path: PathBuf, source: io::Error },
}

/// What happens to each file of the current version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupPlan {
    /// Changed or retired files; removed from the live installation.
    pub moves: Vec<String>,
    /// Files kept as-is by the update; duplicated into the backup.
    pub copies: Vec<String>,
}

impl BackupPlan {
    /// Split `current.files` by the delta. Files that only exist in `latest`
    /// appear in neither list.
    pub fn new(
        current: &VersionManifest,
        latest: &VersionManifest,
        delta: &BTreeSet<String>,
    ) -> Self {
        let keep: HashSet<&str> = latest.file_names();
        let mut plan = Self::default();

        for entry in &current.files {
            if delta.contains(&entry.name) || !keep.contains(entry.name.as_str()) {
                plan.moves.push(entry.name.clone());
            } else {
                plan.copies.push(entry.name.clone());
            }
        }

        plan
    }

    /// Names in `moves` that `latest` no longer lists.
    pub fn retired<'a>(&'a self, latest: &'a VersionManifest) -> impl Iterator<Item = &'a str> {
        let keep = latest.file_names();
        self.moves
            .iter()
            .map(String::as_str)
            .filter(move |name| !keep.contains(name))
    }

    /// Build a fresh backup and put it in place of `prior/`.
    pub fn stage(&self, install: &Installation) -> Result<(), BackupError> {
        let staging = install.backup_staging_dir();
        fs::create_dir(&staging).map_err(|source| {
            if source.kind() == io::ErrorKind::AlreadyExists {
                BackupError::Interrupted {
                    path: staging.clone(),
                }
            } else {
                BackupError::Prepare {
                    path: staging.clone(),
                    source,
                }
            }
        })?;

        let mut moved = Vec::with_capacity(self.moves.len());
        let result = self
            .fill(install, &staging, &mut moved)
            .and_then(|()| swap_into_place(install, &staging));

        if result.is_err() {
            undo_moves(&moved);
            if let Err(e) = fs::remove_dir_all(&staging) {
                warn!(path = %staging.display(), "failed to remove partial backup: {e}");
            }
        }

        result
    }

    fn fill(
        &self,
        install: &Installation,
        backup: &Path,
        moved: &mut Vec<(PathBuf, PathBuf)>,
    ) -> Result<(), BackupError> {
        fs::copy(
            install.current_manifest_path(),
            backup.join(CURRENT_MANIFEST),
        )
        .map_err(BackupError::Manifest)?;

        for name in &self.copies {
            let (src, dst) = backup_paths(install, backup, name);
            ensure_parent(&dst)
                .and_then(|()| fs::copy(&src, &dst).map(drop))
                .map_err(|source| BackupError::Copy {
                    name: name.clone(),
                    source,
                })?;
        }

        for name in &self.moves {
            let (src, dst) = backup_paths(install, backup, name);
            ensure_parent(&dst)
                .and_then(|()| fs::rename(&src, &dst))
                .map_err(|source| BackupError::Move {
                    name: name.clone(),
                    source,
                })?;
            moved.push((src, dst));
        }

        debug!(
            moved = self.moves.len(),
            copied = self.copies.len(),
            "backup staged"
        );
        Ok(())
    }
}

fn backup_paths(install: &Installation, backup: &Path, name: &str) -> (PathBuf, PathBuf) {
    let dst = name
        .split('/')
        .fold(backup.to_path_buf(), |p, part| p.join(part));
    (install.file_path(name), dst)
}

fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Replace `prior/` with the staged backup. The old `prior/` is parked
/// aside first and restored if the staged one cannot be renamed into place.
fn swap_into_place(install: &Installation, staging: &Path) -> Result<(), BackupError> {
    let backup = install.backup_dir();
    let displaced = install.displaced_backup_dir();
    let replace_failed = |source| BackupError::Replace {
        path: backup.clone(),
        source,
    };

    remove_dir_if_exists(&displaced).map_err(replace_failed)?;
    let had_backup = match fs::rename(&backup, &displaced) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => return Err(replace_failed(e)),
    };

    if let Err(e) = fs::rename(staging, &backup) {
        if had_backup {
            if let Err(restore) = fs::rename(&displaced, &backup) {
                warn!(path = %displaced.display(), "could not restore previous backup: {restore}");
            }
        }
        return Err(replace_failed(e));
    }

    if had_backup {
        if let Err(e) = fs::remove_dir_all(&displaced) {
            warn!(path = %displaced.display(), "could not remove previous backup: {e}");
        }
    }
    Ok(())
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) => fs::create_dir_all(parent),
        None => Ok(()),
    }
}

fn undo_moves(moved: &[(PathBuf, PathBuf)]) {
    for (original, staged) in moved.iter().rev() {
        if let Err(e) = fs::rename(staged, original) {
            warn!(
                file = %original.display(),
                "could not restore file from backup: {e}"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stepup_schema::{FileDigest, FileEntry, compute_delta};
    use tempfile::TempDir;

    fn manifest(version: &str, files: &[(&str, &str)]) -> VersionManifest {
        VersionManifest {
            version: version.to_string(),
            published: Utc::now(),
            archive_url: "pkg.zip".to_string(),
            archive_hash: FileDigest::default(),
            files: files
                .iter()
                .map(|(name, body)| {
                    FileEntry::new(*name, FileDigest::compute(body.as_bytes()))
                })
                .collect(),
        }
    }

    fn install_with(
        dir: &TempDir,
        current: &VersionManifest,
        files: &[(&str, &str)],
    ) -> Installation {
        let install = Installation::new(dir.path());
        current.save(&install.current_manifest_path()).unwrap();
        for (name, body) in files {
            let path = install.file_path(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, body).unwrap();
        }
        install
    }

    #[test]
    fn test_plan_partitions_current_files() {
        let current = manifest("1.0.0.0", &[("A", "a"), ("B", "b"), ("C", "c"), ("D", "d")]);
        let latest = manifest("1.0.1.0", &[("A", "a"), ("B", "b2"), ("C", "c"), ("E", "e")]);
        let delta = compute_delta(&current, &latest);

        let plan = BackupPlan::new(&current, &latest, &delta);

        assert_eq!(plan.moves, vec!["B".to_string(), "D".to_string()]);
        assert_eq!(plan.copies, vec!["A".to_string(), "C".to_string()]);
        assert!(!plan.moves.iter().any(|n| n == "E"));
        assert_eq!(plan.retired(&latest).collect::<Vec<_>>(), vec!["D"]);
    }

    #[test]
    fn test_stage_moves_and_copies() {
        let dir = TempDir::new().unwrap();
        let files = [("A", "a"), ("B", "b"), ("sub/D", "d")];
        let current = manifest("1.0.0.0", &files);
        let latest = manifest("1.0.1.0", &[("A", "a"), ("B", "b2")]);
        let install = install_with(&dir, &current, &files);
        let plan = BackupPlan::new(&current, &latest, &compute_delta(&current, &latest));

        plan.stage(&install).unwrap();

        let prior = install.backup_dir();
        assert_eq!(fs::read_to_string(prior.join("A")).unwrap(), "a");
        assert_eq!(fs::read_to_string(prior.join("B")).unwrap(), "b");
        assert_eq!(fs::read_to_string(prior.join("sub").join("D")).unwrap(), "d");
        assert!(prior.join(CURRENT_MANIFEST).exists());

        assert!(install.file_path("A").exists());
        assert!(!install.file_path("B").exists());
        assert!(!install.file_path("sub/D").exists());
    }

    #[test]
    fn test_stage_replaces_stale_backup() {
        let dir = TempDir::new().unwrap();
        let files = [("A", "a")];
        let current = manifest("1.0.0.0", &files);
        let install = install_with(&dir, &current, &files);
        fs::create_dir_all(install.backup_dir()).unwrap();
        fs::write(install.backup_dir().join("stale"), "old").unwrap();

        BackupPlan::new(&current, &current, &BTreeSet::new())
            .stage(&install)
            .unwrap();

        assert!(!install.backup_dir().join("stale").exists());
        assert!(install.backup_dir().join("A").exists());
        assert!(!install.backup_staging_dir().exists());
        assert!(!install.displaced_backup_dir().exists());
    }

    #[test]
    fn test_failed_stage_restores_moved_files() {
        let dir = TempDir::new().unwrap();
        let current = manifest("1.0.0.0", &[("A", "a"), ("B", "b"), ("Z", "z")]);
        let latest = manifest("1.0.1.0", &[("A", "a2"), ("B", "b2"), ("Z", "z2")]);
        // Z is listed but missing on disk, so its move fails after A and B moved.
        let install = install_with(&dir, &current, &[("A", "a"), ("B", "b")]);
        let plan = BackupPlan::new(&current, &latest, &compute_delta(&current, &latest));

        let err = plan.stage(&install).unwrap_err();

        assert!(matches!(err, BackupError::Move { name, .. } if name == "Z"));
        assert_eq!(fs::read_to_string(install.file_path("A")).unwrap(), "a");
        assert_eq!(fs::read_to_string(install.file_path("B")).unwrap(), "b");
        assert!(!install.backup_dir().exists());
        assert!(!install.backup_staging_dir().exists());
    }

    #[test]
    fn test_interrupted_staging_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let current = manifest("1.0.0.0", &[("A", "a")]);
        let latest = manifest("1.0.1.0", &[("A", "a2")]);
        let install = install_with(&dir, &current, &[]);
        let staging = install.backup_staging_dir();
        fs::create_dir_all(&staging).unwrap();
        fs::write(staging.join("A"), "a").unwrap();
        let plan = BackupPlan::new(&current, &latest, &compute_delta(&current, &latest));

        let err = plan.stage(&install).unwrap_err();

        assert!(matches!(err, BackupError::Interrupted { .. }));
        assert_eq!(fs::read_to_string(staging.join("A")).unwrap(), "a");
    }

    #[test]
    fn test_failed_stage_keeps_previous_backup() {
        let dir = TempDir::new().unwrap();
        let current = manifest("1.0.1.0", &[("A", "a"), ("Z", "z")]);
        let latest = manifest("1.0.2.0", &[("A", "a2"), ("Z", "z2")]);
        let install = install_with(&dir, &current, &[("A", "a")]);
        let prior = install.backup_dir();
        fs::create_dir_all(&prior).unwrap();
        fs::write(prior.join("A"), "a0").unwrap();
        fs::write(prior.join(CURRENT_MANIFEST), "{}").unwrap();
        let plan = BackupPlan::new(&current, &latest, &compute_delta(&current, &latest));

        assert!(plan.stage(&install).is_err());

        assert_eq!(fs::read_to_string(prior.join("A")).unwrap(), "a0");
        assert_eq!(fs::read_to_string(prior.join(CURRENT_MANIFEST)).unwrap(), "{}");
        assert_eq!(fs::read_to_string(install.file_path("A")).unwrap(), "a");
        assert!(!install.backup_staging_dir().exists());
        assert!(!install.displaced_backup_dir().exists());
    }
}
