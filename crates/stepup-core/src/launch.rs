//! Handing control back to the application after an update.

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Failed to start {}: {source}", program.display())]
    Spawn { program: PathBuf, source: io::Error },

    #[error("Failed waiting for the relaunched process: {0}")]
    Wait(#[source] io::Error),
}

/// Starts the (updated) application and waits for it to finish.
#[async_trait]
pub trait Relauncher: Send + Sync {
    async fn launch_and_wait(&self) -> Result<(), LaunchError>;
}

/// Runs a program as a child process.
///
/// The child's exit status is logged but not treated as an error: the update
/// already succeeded by the time it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRelauncher {
    program: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl ProcessRelauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }
}

#[async_trait]
impl Relauncher for ProcessRelauncher {
    async fn launch_and_wait(&self) -> Result<(), LaunchError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        info!(program = %self.program.display(), "relaunching");
        let mut child = cmd.spawn().map_err(|source| LaunchError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        let status = child.wait().await.map_err(LaunchError::Wait)?;

        if status.success() {
            info!("relaunched process exited cleanly");
        } else {
            warn!(%status, "relaunched process exited with failure");
        }
        Ok(())
    }
}

/// Does nothing. For callers that restart the application themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRelaunch;

#[async_trait]
impl Relauncher for NoRelaunch {
    async fn launch_and_wait(&self) -> Result<(), LaunchError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let relauncher = ProcessRelauncher::new("/nonexistent/stepup-test-program");
        let err = relauncher.launch_and_wait().await.unwrap_err();
        assert!(matches!(err, LaunchError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_not_an_error() {
        let relauncher = ProcessRelauncher::new("sh").args(["-c", "exit 3"]);
        relauncher.launch_and_wait().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_in_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        ProcessRelauncher::new("sh")
            .args(["-c", "touch ran"])
            .working_dir(dir.path())
            .launch_and_wait()
            .await
            .unwrap();
        assert!(dir.path().join("ran").exists());
    }
}
