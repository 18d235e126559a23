//! Selective extraction of a package archive.
//!
//! Only the names in the delta are written; everything else in the archive
//! (unchanged files, the embedded manifest) is ignored. Each file is hashed as
//! it is written and checked against the manifest entry.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

use stepup_schema::{DigestHasher, FileDigest, VersionManifest};
use thiserror::Error;
use tracing::debug;
use zip::ZipArchive;
use zip::result::ZipError;

use crate::installation::Installation;

const COPY_BUFFER: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Unreadable archive: {0}")]
    Archive(#[from] ZipError),

    #[error("Archive has no entry for '{0}'")]
    MissingEntry(String),

    #[error("'{0}' is in the delta but not in the manifest")]
    NotInManifest(String),

    #[error("Extracted '{name}' has digest {actual}, manifest says {expected}")]
    DigestMismatch {
        name: String,
        expected: FileDigest,
        actual: FileDigest,
    },
}

/// Write every file named in `delta` from `archive` into the installation.
///
/// Existing files are overwritten and missing parent directories created.
/// Returns the names written, in delta order. Stops at the first failure,
/// leaving the files already written in place.
pub fn extract_delta(
    archive: &Path,
    install: &Installation,
    latest: &VersionManifest,
    delta: &BTreeSet<String>,
) -> Result<Vec<String>, ExtractError> {
    let mut zip = ZipArchive::new(BufReader::new(File::open(archive)?))?;
    let mut written = Vec::with_capacity(delta.len());
    let mut buf = vec![0u8; COPY_BUFFER];

    for name in delta {
        let expected = latest
            .file(name)
            .ok_or_else(|| ExtractError::NotInManifest(name.clone()))?;

        let mut entry = match zip.by_name(name) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => return Err(ExtractError::MissingEntry(name.clone())),
            Err(e) => return Err(e.into()),
        };
        #[cfg(unix)]
        let mode = entry.unix_mode();

        let dest = install.file_path(name);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut out = File::create(&dest)?;
        let mut hasher = DigestHasher::new();
        loop {
            let n = entry.read(&mut buf)?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n])?;
            hasher.update(&buf[..n]);
        }
        out.flush()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = mode {
                fs::set_permissions(&dest, fs::Permissions::from_mode(mode))?;
            }
        }

        let actual = hasher.finish();
        if actual != expected.hash {
            return Err(ExtractError::DigestMismatch {
                name: name.clone(),
                expected: expected.hash.clone(),
                actual,
            });
        }

        debug!(file = %name, "extracted");
        written.push(name.clone());
    }

    Ok(written)
}
