//! Update check run before the application starts
use crate::ui::Output;
use anyhow::{Context, Result};
use std::path::Path;
use stepup_core::config::LaunchConfig;
use stepup_core::{
    EngineOptions, Installation, ProcessRelauncher, Severity, UpdateEngine, UpdateResult,
    UpdaterConfig, open_source,
};
use stepup_schema::Platform;
use tracing::debug;

/// Check for and apply an update.
///
/// Returns `true` if an update was applied; the application has then already
/// been relaunched and has exited. Update problems are reported, never
/// returned: the caller proceeds with whatever version is installed.
pub async fn update(install: &Installation) -> Result<bool> {
    let output = Output::new();

    let config = match UpdaterConfig::resolve(&install.config_path()) {
        Ok(config) => config,
        Err(e) => {
            output.warning(&format!("Update check skipped: {e}"));
            return Ok(false);
        }
    };
    debug!(
        update_url = ?config.update_url,
        keep_backup = config.keep_backup,
        "updater configuration loaded"
    );
    let source = match open_source(&config) {
        Ok(source) => source,
        Err(e) => {
            output.warning(&format!("Update check skipped: {e}"));
            return Ok(false);
        }
    };
    let platform = match Platform::current() {
        Ok(platform) => platform,
        Err(e) => {
            output.warning(&format!("Update check skipped: {e}"));
            return Ok(false);
        }
    };

    // Resolved before the update moves the running binary into prior/.
    let relauncher = relauncher_for(install, config.launch.as_ref())?;
    debug!(program = %relauncher.program().display(), "relaunch target resolved");

    let engine = UpdateEngine::new(install.clone(), platform, source, relauncher).with_options(
        EngineOptions {
            keep_backup: config.keep_backup,
            download_dir: None,
        },
    );

    output.info("Checking for updates...");
    match engine.perform_update().await {
        UpdateResult::NoUpdateAvailable => {
            output.info("Already up to date");
            Ok(false)
        }
        UpdateResult::Updated(report) => {
            output.success(&format!(
                "Updated {} -> {} ({} changed, {} removed)",
                report.from,
                report.to,
                report.changed.len(),
                report.retired.len()
            ));
            for warning in &report.warnings {
                output.warning(&warning.to_string());
                output.hint(warning.recovery_hint());
            }
            Ok(true)
        }
        UpdateResult::Failed { stage, error } => {
            let msg = format!("Update failed while {stage}: {error}");
            match error.severity() {
                Severity::Fatal => output.error(&msg),
                Severity::Skipped | Severity::Degraded => output.warning(&msg),
            }
            output.hint(error.recovery_hint());
            Ok(false)
        }
    }
}

/// The configured application, or this launcher again with `--noupdate`.
pub fn relauncher_for(
    install: &Installation,
    launch: Option<&LaunchConfig>,
) -> Result<ProcessRelauncher> {
    let relauncher = match launch {
        Some(launch) => ProcessRelauncher::new(program_path(install.root(), &launch.program))
            .args(launch.args.iter().cloned()),
        None => {
            let exe = std::env::current_exe().context("Failed to locate the running executable")?;
            ProcessRelauncher::new(exe).args([
                "--noupdate".to_string(),
                "--dir".to_string(),
                install.root().display().to_string(),
            ])
        }
    };
    Ok(relauncher.working_dir(install.root()))
}

/// Relative program paths are relative to the installation.
pub fn program_path(root: &Path, program: &Path) -> std::path::PathBuf {
    if program.is_absolute() {
        program.to_path_buf()
    } else {
        root.join(program)
    }
}
