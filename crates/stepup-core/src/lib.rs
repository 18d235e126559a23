pub mod config;
pub mod engine;
pub mod error;
pub mod installation;
pub mod io;
pub mod launch;
pub mod lock;
pub mod package;
pub mod source;

pub use config::{ConfigError, UpdaterConfig};
pub use engine::{EngineOptions, Stage, UpdateEngine, UpdateReport, UpdateResult};
pub use error::{Severity, UpdateError};
pub use installation::{Installation, VersionProvider};
pub use launch::{LaunchError, NoRelaunch, ProcessRelauncher, Relauncher};
pub use source::{HttpSource, LocalSource, PackageSource, SourceError, open_source};

/// User Agent string for core operations
pub const USER_AGENT: &str = concat!("stepup-core/", env!("CARGO_PKG_VERSION"));

/// Last path segment of a URL, without query or fragment.
pub fn filename_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_from_url() {
        assert_eq!(
            filename_from_url("https://updates.example.com/linux-x64/linux-x64_1.0.2.0.zip?sig=abc"),
            Some("linux-x64_1.0.2.0.zip".to_string())
        );
        assert_eq!(
            filename_from_url("linux-x64_1.0.2.0.zip"),
            Some("linux-x64_1.0.2.0.zip".to_string())
        );
        assert_eq!(filename_from_url("https://updates.example.com/"), None);
    }
}
