//! Building a release from a directory of published files.
//!
//! Output for version `1.0.2.0` on `linux-x64`:
//!
//! ```text
//! <output>/linux-x64/
//! ├── linux-x64_1.0.2.0.zip    # every file plus an embedded current.json
//! ├── linux-x64_1.0.2.0.json   # manifest with the archive digest
//! └── linux-x64_latest.json    # copy of the above, what clients poll
//! ```
//!
//! The embedded `current.json` carries an empty archive digest: it is written
//! before the archive exists. Unpacking the archive by hand therefore gives a
//! complete installation.

use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use stepup_schema::{
    AppVersion, CURRENT_MANIFEST, FileDigest, FileEntry, Platform, RESERVED_NAMES,
    VersionManifest,
};
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::source::latest_manifest_name;

/// Inputs for [`build_package`].
#[derive(Debug, Clone)]
pub struct PackageRequest<'a> {
    pub source_dir: &'a Path,
    pub output_dir: &'a Path,
    pub version: &'a str,
    pub platform: Platform,
    /// Prefix for the manifest's archive URL. Without one the URL is relative
    /// to the repository root.
    pub base_url: Option<&'a str>,
    /// Defaults to now.
    pub published: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct BuiltPackage {
    pub archive_path: PathBuf,
    pub manifest_path: PathBuf,
    pub latest_path: PathBuf,
    pub manifest: VersionManifest,
}

/// Package `source_dir` into the release layout under `output_dir`.
pub fn build_package(req: &PackageRequest<'_>) -> Result<BuiltPackage> {
    let version: AppVersion = req
        .version
        .parse()
        .with_context(|| format!("invalid package version '{}'", req.version))?;
    let rid = req.platform.as_str();
    let stem = format!("{rid}_{version}");
    let archive_name = format!("{stem}.zip");

    let out_dir = req.output_dir.join(rid);
    fs::create_dir_all(&out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;

    let sources = collect_files(req.source_dir)?;
    let mut files = Vec::with_capacity(sources.len());
    for (name, path) in &sources {
        let hash = FileDigest::compute_file(path)
            .with_context(|| format!("failed to hash {}", path.display()))?;
        files.push(FileEntry::new(name.clone(), hash));
    }

    let archive_url = match req.base_url {
        Some(base) => format!("{}/{rid}/{archive_name}", base.trim_end_matches('/')),
        None => format!("{rid}/{archive_name}"),
    };

    let mut manifest = VersionManifest {
        version: version.to_string(),
        published: req.published.unwrap_or_else(Utc::now),
        archive_url,
        archive_hash: FileDigest::default(),
        files,
    };
    manifest.validate().context("package contents are not publishable")?;

    let archive_path = out_dir.join(&archive_name);
    write_archive(&archive_path, &sources, &manifest)
        .with_context(|| format!("failed to write {}", archive_path.display()))?;
    manifest.archive_hash = FileDigest::compute_file(&archive_path)?;

    let manifest_path = out_dir.join(format!("{stem}.json"));
    manifest.save(&manifest_path)?;
    let latest_path = out_dir.join(latest_manifest_name(req.platform));
    manifest.save(&latest_path)?;

    info!(
        version = %manifest.version,
        platform = rid,
        files = manifest.files.len(),
        "package built"
    );

    Ok(BuiltPackage {
        archive_path,
        manifest_path,
        latest_path,
        manifest,
    })
}

/// Every publishable file under `root`, as (manifest name, path), sorted by name.
fn collect_files(root: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !(e.depth() == 1 && is_bookkeeping(e.file_name().to_str())));

    for entry in walker {
        let entry = entry.with_context(|| format!("failed to read {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(root)?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push((name, entry.into_path()));
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

fn is_bookkeeping(name: Option<&str>) -> bool {
    name.is_some_and(|n| RESERVED_NAMES.contains(&n))
}

fn write_archive(
    path: &Path,
    sources: &[(String, PathBuf)],
    manifest: &VersionManifest,
) -> Result<()> {
    let mut zip = ZipWriter::new(File::create(path)?);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for (name, src) in sources {
        #[cfg(unix)]
        let options = {
            use std::os::unix::fs::PermissionsExt;
            options.unix_permissions(fs::metadata(src)?.permissions().mode())
        };
        zip.start_file(name.as_str(), options)?;
        io::copy(&mut BufReader::new(File::open(src)?), &mut zip)?;
        debug!(file = %name, "archived");
    }

    zip.start_file(CURRENT_MANIFEST, options)?;
    zip.write_all(manifest.to_json_pretty()?.as_bytes())?;
    zip.finish()?;
    Ok(())
}
