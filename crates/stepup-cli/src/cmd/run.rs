//! Hand-off to the installed application
use crate::cmd::update::program_path;
use crate::ui::Output;
use anyhow::{Context, Result};
use stepup_core::{Installation, ProcessRelauncher, Relauncher, UpdaterConfig};

/// Run the installed version.
///
/// With a `[launch]` table the configured program is started and awaited;
/// otherwise the installed version is reported. Fails if nothing could run.
pub async fn run(install: &Installation) -> Result<()> {
    let output = Output::new();

    let manifest = install
        .load_current()
        .with_context(|| format!("No installed version in {}", install.root().display()))?;
    let config = UpdaterConfig::load(&install.config_path()).context("Failed to load stepup.toml")?;

    output.info(&format!("Executing {}", manifest.version));

    if let Some(launch) = &config.launch {
        ProcessRelauncher::new(program_path(install.root(), &launch.program))
            .args(launch.args.iter().cloned())
            .working_dir(install.root())
            .launch_and_wait()
            .await
            .context("Failed to start the application")?;
    }
    Ok(())
}
