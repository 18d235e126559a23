//! Shared types and wire format for stepup.
//!
//! Everything in this crate is pure data plus the digest function: version
//! manifests, four-part versions, runtime identifiers, and the delta between
//! two manifests. Side effects (network, installation directory) live in
//! `stepup-core`.

/// Base64 SHA-256 digests of files and archives.
pub mod hash;
pub mod manifest;
/// Runtime identifiers for published builds.
pub mod platform;
pub mod version;

// Re-exports
pub use hash::{DigestError, DigestHasher, FileDigest};
pub use manifest::{
    BACKUP_DIR, BACKUP_DISPLACED_DIR, BACKUP_STAGING_DIR, CURRENT_MANIFEST, FileEntry,
    ManifestError, PENDING_MANIFEST, RESERVED_NAMES, VersionManifest, compute_delta,
};
pub use platform::Platform;
pub use version::{AppVersion, VersionError, is_newer};
