//! Where releases come from.
//!
//! A release repository is laid out per runtime identifier:
//!
//! ```text
//! <update_url>/
//! └── linux-x64/
//!     ├── linux-x64_latest.json
//!     ├── linux-x64_1.0.2.0.json
//!     └── linux-x64_1.0.2.0.zip
//! ```
//!
//! The manifest's `url` may be absolute or relative to `update_url`.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Url};
use stepup_schema::{ManifestError, Platform, VersionManifest};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::config::{ConfigError, UpdaterConfig};

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    InvalidManifest(#[from] ManifestError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Refusing insecure URL '{0}' (set allow_insecure to permit plain http)")]
    InsecureUrl(String),

    #[error("Invalid URL '{0}'")]
    InvalidUrl(String),
}

/// Access to published manifests and package archives.
#[async_trait]
pub trait PackageSource: Send + Sync {
    /// The newest manifest published for `platform`.
    async fn fetch_latest_manifest(
        &self,
        platform: Platform,
    ) -> Result<VersionManifest, SourceError>;

    /// Write the archive at `location` to `dest`.
    async fn fetch_package(&self, location: &str, dest: &Path) -> Result<(), SourceError>;
}

#[async_trait]
impl<S: PackageSource + ?Sized> PackageSource for Box<S> {
    async fn fetch_latest_manifest(
        &self,
        platform: Platform,
    ) -> Result<VersionManifest, SourceError> {
        (**self).fetch_latest_manifest(platform).await
    }

    async fn fetch_package(&self, location: &str, dest: &Path) -> Result<(), SourceError> {
        (**self).fetch_package(location, dest).await
    }
}

/// Pick the source for the configured `update_url`: `file://` URLs read a
/// local mirror, anything else goes over HTTP.
pub fn open_source(config: &UpdaterConfig) -> Result<Box<dyn PackageSource>, SourceError> {
    let url = config.update_url()?;
    if url.starts_with("file://") {
        Ok(Box::new(LocalSource::from_url(url)?))
    } else {
        Ok(Box::new(HttpSource::new(config)?))
    }
}

/// File name of the latest manifest for `platform`.
pub fn latest_manifest_name(platform: Platform) -> String {
    format!("{platform}_latest.json")
}

/// Release repository served over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
    base_url: String,
    allow_insecure: bool,
}

impl HttpSource {
    pub fn new(config: &UpdaterConfig) -> Result<Self, SourceError> {
        let base_url = config.update_url()?.to_string();
        check_scheme(&base_url, config.allow_insecure)?;

        let client = Client::builder()
            .user_agent(crate::USER_AGENT)
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            client,
            base_url,
            allow_insecure: config.allow_insecure,
        })
    }

    pub fn manifest_url(&self, platform: Platform) -> String {
        format!(
            "{}/{platform}/{}",
            self.base_url,
            latest_manifest_name(platform)
        )
    }

    fn resolve(&self, location: &str) -> String {
        if location.contains("://") {
            location.to_string()
        } else {
            format!("{}/{}", self.base_url, location.trim_start_matches('/'))
        }
    }
}

#[async_trait]
impl PackageSource for HttpSource {
    async fn fetch_latest_manifest(
        &self,
        platform: Platform,
    ) -> Result<VersionManifest, SourceError> {
        let url = self.manifest_url(platform);
        debug!(%url, "fetching latest manifest");

        let body = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        Ok(VersionManifest::from_slice(&body)?)
    }

    async fn fetch_package(&self, location: &str, dest: &Path) -> Result<(), SourceError> {
        let url = self.resolve(location);
        check_scheme(&url, self.allow_insecure)?;
        debug!(%url, dest = %dest.display(), "downloading package");

        let response = self.client.get(&url).send().await?.error_for_status()?;

        let mut file = File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    tokio::fs::remove_file(dest).await.ok();
                    return Err(e.into());
                }
            };
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
        }
        file.flush().await?;

        debug!(bytes = downloaded, "package downloaded");
        Ok(())
    }
}

fn check_scheme(url: &str, allow_insecure: bool) -> Result<(), SourceError> {
    let parsed = Url::parse(url).map_err(|_| SourceError::InvalidUrl(url.to_string()))?;
    match parsed.scheme() {
        "https" => Ok(()),
        "http" if allow_insecure => Ok(()),
        "http" => Err(SourceError::InsecureUrl(url.to_string())),
        _ => Err(SourceError::InvalidUrl(url.to_string())),
    }
}

/// Release repository in a local directory, e.g. a mounted mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSource {
    root: PathBuf,
}

impl LocalSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Build from a `file://` URL.
    pub fn from_url(url: &str) -> Result<Self, SourceError> {
        file_url_path(url).map(Self::new)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a package location onto the mirror.
    ///
    /// `file://` URLs are used as-is and relative locations are joined to the
    /// root. Remote URLs keep their last two path segments (`<rid>/<archive>`),
    /// which is where a mirrored repository stores the archive.
    fn resolve(&self, location: &str) -> Result<PathBuf, SourceError> {
        if location.starts_with("file://") {
            return file_url_path(location);
        }
        if !location.contains("://") {
            return Ok(join_segments(&self.root, location.split('/')));
        }

        let url = Url::parse(location).map_err(|_| SourceError::InvalidUrl(location.to_string()))?;
        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|part| !part.is_empty()).collect())
            .unwrap_or_default();
        match segments.as_slice() {
            [.., dir, file] => Ok(join_segments(&self.root, [*dir, *file])),
            [file] => Ok(self.root.join(file)),
            [] => Err(SourceError::InvalidUrl(location.to_string())),
        }
    }
}

#[async_trait]
impl PackageSource for LocalSource {
    async fn fetch_latest_manifest(
        &self,
        platform: Platform,
    ) -> Result<VersionManifest, SourceError> {
        let path = self
            .root
            .join(platform.as_str())
            .join(latest_manifest_name(platform));
        debug!(path = %path.display(), "reading latest manifest");

        let body = tokio::fs::read(&path).await?;
        Ok(VersionManifest::from_slice(&body)?)
    }

    async fn fetch_package(&self, location: &str, dest: &Path) -> Result<(), SourceError> {
        let src = self.resolve(location)?;
        debug!(src = %src.display(), dest = %dest.display(), "copying package");
        tokio::fs::copy(&src, dest).await?;
        Ok(())
    }
}

fn file_url_path(url: &str) -> Result<PathBuf, SourceError> {
    Url::parse(url)
        .ok()
        .filter(|u| u.scheme() == "file")
        .and_then(|u| u.to_file_path().ok())
        .ok_or_else(|| SourceError::InvalidUrl(url.to_string()))
}

fn join_segments<'a>(root: &Path, segments: impl IntoIterator<Item = &'a str>) -> PathBuf {
    segments
        .into_iter()
        .filter(|s| !s.is_empty())
        .fold(root.to_path_buf(), |p, s| p.join(s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mockito::Server;
    use stepup_schema::{FileDigest, FileEntry};
    use tempfile::TempDir;

    fn sample_manifest() -> VersionManifest {
        VersionManifest {
            version: "1.0.2.0".to_string(),
            published: Utc::now(),
            archive_url: "linux-x64/linux-x64_1.0.2.0.zip".to_string(),
            archive_hash: FileDigest::compute(b"archive"),
            files: vec![FileEntry::new("Main", FileDigest::compute(b"main"))],
        }
    }

    fn http_config(url: String) -> UpdaterConfig {
        UpdaterConfig {
            update_url: Some(url),
            allow_insecure: true,
            ..UpdaterConfig::default()
        }
    }

    #[tokio::test]
    async fn test_fetch_latest_manifest() {
        let mut server = Server::new_async().await;
        let manifest = sample_manifest();

        let mock = server
            .mock("GET", "/linux-x64/linux-x64_latest.json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(manifest.to_json_pretty().unwrap())
            .create_async()
            .await;

        let source = HttpSource::new(&http_config(server.url())).unwrap();
        let fetched = source
            .fetch_latest_manifest(Platform::LinuxX64)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(fetched, manifest);
    }

    #[tokio::test]
    async fn test_missing_manifest_is_http_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/win-x64/win-x64_latest.json")
            .with_status(404)
            .create_async()
            .await;

        let source = HttpSource::new(&http_config(server.url())).unwrap();
        let err = source
            .fetch_latest_manifest(Platform::WinX64)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Http(_)));
    }

    #[tokio::test]
    async fn test_garbage_manifest_is_rejected() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/linux-x64/linux-x64_latest.json")
            .with_status(200)
            .with_body("<html>maintenance</html>")
            .create_async()
            .await;

        let source = HttpSource::new(&http_config(server.url())).unwrap();
        let err = source
            .fetch_latest_manifest(Platform::LinuxX64)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::InvalidManifest(_)));
    }

    #[tokio::test]
    async fn test_fetch_package_relative_location() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/linux-x64/linux-x64_1.0.2.0.zip")
            .with_status(200)
            .with_body(b"zip bytes")
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("pkg.zip");
        let source = HttpSource::new(&http_config(server.url())).unwrap();
        source
            .fetch_package("linux-x64/linux-x64_1.0.2.0.zip", &dest)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"zip bytes");
    }

    #[test]
    fn test_rejects_plain_http_by_default() {
        let config = UpdaterConfig {
            update_url: Some("http://updates.example.com".to_string()),
            ..UpdaterConfig::default()
        };
        assert!(matches!(
            HttpSource::new(&config),
            Err(SourceError::InsecureUrl(_))
        ));
        assert!(matches!(
            check_scheme("ftp://updates.example.com/x.zip", true),
            Err(SourceError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_manifest_url() {
        let config = UpdaterConfig {
            update_url: Some("https://updates.example.com/app/".to_string()),
            ..UpdaterConfig::default()
        };
        let source = HttpSource::new(&config).unwrap();
        assert_eq!(
            source.manifest_url(Platform::OsxArm64),
            "https://updates.example.com/app/osx-arm64/osx-arm64_latest.json"
        );
    }

    #[tokio::test]
    async fn test_local_source() {
        let dir = TempDir::new().unwrap();
        let rid_dir = dir.path().join("linux-x64");
        std::fs::create_dir_all(&rid_dir).unwrap();
        let manifest = sample_manifest();
        manifest
            .save(&rid_dir.join("linux-x64_latest.json"))
            .unwrap();
        std::fs::write(rid_dir.join("linux-x64_1.0.2.0.zip"), b"zip bytes").unwrap();

        let source = LocalSource::new(dir.path());
        assert_eq!(
            source
                .fetch_latest_manifest(Platform::LinuxX64)
                .await
                .unwrap(),
            manifest
        );

        let dest = dir.path().join("downloaded.zip");
        source
            .fetch_package(
                "https://updates.example.com/app/linux-x64/linux-x64_1.0.2.0.zip",
                &dest,
            )
            .await
            .unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"zip bytes");
    }

    #[test]
    fn test_open_source_picks_by_scheme() {
        let dir = TempDir::new().unwrap();
        let url = Url::from_directory_path(dir.path()).unwrap().to_string();
        let local = LocalSource::from_url(&url).unwrap();
        assert_eq!(local.root(), dir.path());

        let config = UpdaterConfig {
            update_url: Some(url),
            ..UpdaterConfig::default()
        };
        assert!(open_source(&config).is_ok());
        assert!(matches!(
            open_source(&UpdaterConfig::default()),
            Err(SourceError::Config(ConfigError::MissingUpdateUrl))
        ));
    }
}
