//! Four-part application versions (`major.minor.build.revision`).
//!
//! Versions are compared component-wise as numbers, never as strings:
//! `1.10.0.0` is newer than `1.9.0.0`. Pre-release tags and other semver
//! extensions are rejected.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Number of numeric components in a well-formed version.
pub const VERSION_COMPONENTS: usize = 4;

/// A version string that does not have the expected form.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    /// Wrong number of dot-separated components.
    #[error("Malformed version '{input}': expected 4 components, got {found}")]
    ComponentCount {
        /// The rejected input.
        input: String,
        /// How many components it had.
        found: usize,
    },

    /// A component is empty, non-numeric or out of range.
    #[error("Malformed version '{input}': component '{component}' is not a number")]
    NotNumeric {
        /// The rejected input.
        input: String,
        /// The offending component.
        component: String,
    },
}

/// A parsed `major.minor.build.revision` version.
///
/// Field order matters: the derived `Ord` compares `major` first and
/// `revision` last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct AppVersion {
    /// Major component.
    pub major: u32,
    /// Minor component.
    pub minor: u32,
    /// Build component.
    pub build: u32,
    /// Revision component, the final tiebreaker.
    pub revision: u32,
}

impl AppVersion {
    /// Build a version from its components.
    pub const fn new(major: u32, minor: u32, build: u32, revision: u32) -> Self {
        Self {
            major,
            minor,
            build,
            revision,
        }
    }

    /// True if `self` is strictly greater than `baseline`.
    pub fn is_newer_than(&self, baseline: &AppVersion) -> bool {
        self > baseline
    }
}

impl FromStr for AppVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != VERSION_COMPONENTS {
            return Err(VersionError::ComponentCount {
                input: s.to_string(),
                found: parts.len(),
            });
        }

        let mut numbers = [0u32; VERSION_COMPONENTS];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            // `u32::from_str` accepts a leading '+', so check digits first.
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(VersionError::NotNumeric {
                    input: s.to_string(),
                    component: (*part).to_string(),
                });
            }
            *slot = part.parse().map_err(|_| VersionError::NotNumeric {
                input: s.to_string(),
                component: (*part).to_string(),
            })?;
        }

        let [major, minor, build, revision] = numbers;
        Ok(Self::new(major, minor, build, revision))
    }
}

impl fmt::Display for AppVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

/// Returns true if `candidate` is strictly newer than `baseline`.
///
/// # Errors
///
/// Returns [`VersionError`] if either string is not a four-part numeric version.
pub fn is_newer(candidate: &str, baseline: &str) -> Result<bool, VersionError> {
    let candidate: AppVersion = candidate.parse()?;
    let baseline: AppVersion = baseline.parse()?;
    Ok(candidate.is_newer_than(&baseline))
}
