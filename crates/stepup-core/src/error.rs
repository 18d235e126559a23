//! Errors surfaced by an update run

use std::io;
use std::path::PathBuf;

use stepup_schema::{FileDigest, ManifestError, VersionError};
use thiserror::Error;

use crate::installation::CommitError;
use crate::io::backup::BackupError;
use crate::io::extract::ExtractError;
use crate::launch::LaunchError;
use crate::source::SourceError;

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("Could not determine update availability: {0}")]
    ManifestUnavailable(#[source] SourceError),

    #[error(transparent)]
    MalformedVersion(#[from] VersionError),

    #[error("Installation state unreadable: {0}")]
    Installation(#[from] ManifestError),

    #[error("Another update holds {}: {source}", path.display())]
    Locked { path: PathBuf, source: io::Error },

    #[error("Package download failed: {0}")]
    Download(#[source] SourceError),

    #[error("Package integrity check failed: expected {expected}, got {actual}")]
    PackageIntegrity {
        expected: FileDigest,
        actual: FileDigest,
    },

    #[error("Backup failed: {0}")]
    BackupFailure(#[from] BackupError),

    #[error("Corrupt package: {0}")]
    CorruptPackage(#[from] ExtractError),

    #[error("Commit failed: {0}")]
    CommitFailure(#[from] CommitError),

    #[error("Could not remove {}: {source}", path.display())]
    CleanupFailure { path: PathBuf, source: io::Error },

    #[error("Relaunch failed: {0}")]
    Launch(#[from] LaunchError),
}

/// How far an error got before it stopped the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// No update was attempted; the installation is untouched.
    Skipped,
    /// The update was aborted partway.
    Fatal,
    /// The new version is in place but something needs attention.
    Degraded,
}

impl UpdateError {
    pub fn severity(&self) -> Severity {
        match self {
            Self::ManifestUnavailable(_)
            | Self::MalformedVersion(_)
            | Self::Installation(_)
            | Self::Locked { .. } => Severity::Skipped,
            Self::Download(_)
            | Self::PackageIntegrity { .. }
            | Self::BackupFailure(_)
            | Self::CorruptPackage(_) => Severity::Fatal,
            Self::CommitFailure(_) | Self::CleanupFailure { .. } | Self::Launch(_) => {
                Severity::Degraded
            }
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// What an operator should do about this error.
    pub fn recovery_hint(&self) -> &'static str {
        match self {
            Self::ManifestUnavailable(_) | Self::MalformedVersion(_) => {
                "No action needed; the installed version keeps running and the check repeats on next start."
            }
            Self::Installation(_) => {
                "current.json is missing or invalid; reinstall the application to restore it."
            }
            Self::Locked { .. } => {
                "Another update is in progress. If none is running, delete .stepup.lock and retry."
            }
            Self::Download(_) | Self::PackageIntegrity { .. } => {
                "The download was discarded and no installed files were changed."
            }
            Self::BackupFailure(BackupError::Interrupted { .. }) => {
                "Copy the files in 'prior.tmp' back into the installation directory, then delete 'prior.tmp'."
            }
            Self::BackupFailure(_) => {
                "The update was aborted before extraction; the installation is unchanged."
            }
            Self::CorruptPackage(_) => {
                "The update stopped partway. Restore the previous version by copying the contents of the 'prior' folder over the installation directory, then delete latest.json."
            }
            Self::CommitFailure(CommitError::Promote(_)) => {
                "The new files are in place. Copy the contents of latest.json to current.json, then delete latest.json."
            }
            Self::CommitFailure(CommitError::RemovePending(_)) => {
                "The update is committed. Delete latest.json."
            }
            Self::CleanupFailure { .. } => "The leftover file can be deleted manually.",
            Self::Launch(_) => "The update is complete. Start the application manually.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity() {
        let integrity = UpdateError::PackageIntegrity {
            expected: FileDigest::compute(b"a"),
            actual: FileDigest::compute(b"b"),
        };
        assert!(integrity.is_fatal());

        let missing = UpdateError::CorruptPackage(ExtractError::MissingEntry("Main".into()));
        assert!(missing.is_fatal());

        let cleanup = UpdateError::CleanupFailure {
            path: PathBuf::from("pkg.zip"),
            source: io::Error::other("busy"),
        };
        assert_eq!(cleanup.severity(), Severity::Degraded);

        let version: UpdateError = "1.0".parse::<stepup_schema::AppVersion>().unwrap_err().into();
        assert_eq!(version.severity(), Severity::Skipped);
    }

    #[test]
    fn test_commit_hints_name_the_manual_step() {
        let promote = UpdateError::CommitFailure(CommitError::Promote(io::Error::other("denied")));
        assert!(promote.recovery_hint().contains("latest.json to current.json"));

        let corrupt = UpdateError::CorruptPackage(ExtractError::MissingEntry("Main".into()));
        assert!(corrupt.recovery_hint().contains("'prior'"));

        let interrupted = UpdateError::BackupFailure(BackupError::Interrupted {
            path: PathBuf::from("/opt/app/prior.tmp"),
        });
        assert!(interrupted.is_fatal());
        assert!(interrupted.recovery_hint().contains("'prior.tmp'"));
    }
}
