//! Advisory lock around an update.
//!
//! The lock is a file created with exclusive-create semantics; whoever creates
//! it owns the installation until the guard is dropped. A crash leaves the
//! file behind, which blocks later updates until an operator removes it.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Guard for an installation's lock file. Removes the file on drop.
#[derive(Debug)]
pub struct InstallLock {
    path: PathBuf,
}

impl InstallLock {
    /// Create the lock file at `path`.
    ///
    /// Fails with [`io::ErrorKind::AlreadyExists`] if another process holds it.
    pub fn acquire(path: &Path) -> io::Result<Self> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        writeln!(file, "{}", std::process::id())?;
        debug!(path = %path.display(), "acquired install lock");

        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), "failed to release install lock: {e}");
        }
    }
}
