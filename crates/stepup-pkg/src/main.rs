//! `stepup-pkg` - builds stepup releases.
//!
//! Packs a directory of published application files into the release
//! repository layout that `stepup` polls: the archive, its manifest, and the
//! `<rid>_latest.json` pointer.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use stepup_core::package::{PackageRequest, build_package};
use stepup_schema::Platform;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stepup-pkg")]
#[command(about = "Build a stepup release from a directory of published files", long_about = None)]
struct Cli {
    /// Four-part version of the release, e.g. 1.0.2.0
    #[arg(short = 'p', long = "package-version")]
    version: String,

    /// Runtime identifier (win-x64, linux-x64, osx-arm64, ...); defaults to this machine
    #[arg(short, long)]
    runtime: Option<Platform>,

    /// Directory holding the published application files
    #[arg(short, long)]
    directory: PathBuf,

    /// Release repository root to write into
    #[arg(short, long, default_value = "releases")]
    output: PathBuf,

    /// Public base URL of the repository, used for the archive URL in the manifest
    #[arg(long, env = "STEPUP_UPDATE_URL")]
    base_url: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let platform = match cli.runtime {
        Some(platform) => platform,
        None => Platform::current()
            .map_err(anyhow::Error::msg)
            .context("pass --runtime explicitly")?,
    };

    info!(version = %cli.version, %platform, dir = %cli.directory.display(), "packaging release");
    let built = build_package(&PackageRequest {
        source_dir: &cli.directory,
        output_dir: &cli.output,
        version: &cli.version,
        platform,
        base_url: cli.base_url.as_deref(),
        published: None,
    })
    .with_context(|| format!("failed to package {}", cli.directory.display()))?;

    println!("  packaged {} for {platform}", built.manifest.version);
    println!("    archive   {}", built.archive_path.display());
    println!("    manifest  {}", built.manifest_path.display());
    println!("    latest    {}", built.latest_path.display());
    println!("    files     {}", built.manifest.files.len());
    println!("    hash      {}", built.manifest.archive_hash);
    Ok(())
}
