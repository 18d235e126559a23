use std::io::{self, Read};
use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Length in bytes of a raw SHA-256 digest.
pub const DIGEST_LEN: usize = 32;

/// Errors raised while computing or validating a digest.
#[derive(Error, Debug)]
pub enum DigestError {
    /// The file being hashed could not be read.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The digest string is not base64 of a 32-byte SHA-256 value.
    #[error("Invalid digest '{0}': expected base64 of a 32-byte SHA-256 value")]
    Malformed(String),
}

/// Base64-encoded SHA-256 digest of a file or archive.
///
/// The empty digest is representable on purpose: a manifest embedded inside
/// its own archive cannot know the archive's digest, so it carries `""`.
/// Comparison is exact string equality, which is sound because the encoding
/// is canonical (standard alphabet, padded).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct FileDigest(String);

impl FileDigest {
    /// Wrap a digest string without validation (for deserialized data).
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Create a validated digest.
    ///
    /// # Errors
    ///
    /// Returns [`DigestError::Malformed`] unless `s` decodes to exactly 32 bytes.
    pub fn validated(s: &str) -> Result<Self, DigestError> {
        match STANDARD.decode(s) {
            Ok(raw) if raw.len() == DIGEST_LEN => Ok(Self(s.to_string())),
            _ => Err(DigestError::Malformed(s.to_string())),
        }
    }

    /// Encode a raw 32-byte digest.
    pub fn from_raw(raw: &[u8]) -> Self {
        Self(STANDARD.encode(raw))
    }

    /// Digest of an in-memory buffer.
    pub fn compute(data: &[u8]) -> Self {
        Self::from_raw(&Sha256::digest(data))
    }

    /// Digest of everything readable from `reader`, streamed in 64 KiB blocks.
    ///
    /// # Errors
    ///
    /// Propagates any read error.
    pub fn compute_reader(mut reader: impl Read) -> Result<Self, DigestError> {
        let mut hasher = DigestHasher::new();
        let mut buffer = vec![0u8; 64 * 1024];

        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(hasher.finish())
    }

    /// Digest of a file on disk (streaming).
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be opened or read.
    pub fn compute_file(path: &Path) -> Result<Self, DigestError> {
        let file = std::fs::File::open(path)?;
        Self::compute_reader(file)
    }

    /// True for the placeholder digest of an embedded manifest.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Return the encoded digest as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FileDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            write!(f, "<none>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl AsRef<str> for FileDigest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for FileDigest {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for FileDigest {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Incremental digest computation, for hashing bytes as they are written.
#[derive(Debug, Clone, Default)]
pub struct DigestHasher(Sha256);

impl DigestHasher {
    /// Start a new digest.
    pub fn new() -> Self {
        Self(Sha256::new())
    }

    /// Feed more bytes.
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Finish and encode.
    pub fn finish(self) -> FileDigest {
        FileDigest::from_raw(&self.0.finalize())
    }
}

impl io::Write for DigestHasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn known_vector() {
        // sha256("hello world"), base64
        let digest = FileDigest::compute(b"hello world");
        assert_eq!(
            digest.as_str(),
            "uU0nuZNNPgilLlLX2n2r+sSE7+N6U4DukIj3rOLvzek="
        );
    }

    #[test]
    fn deterministic_and_content_sensitive() {
        assert_eq!(FileDigest::compute(b"a"), FileDigest::compute(b"a"));
        assert_ne!(FileDigest::compute(b"a"), FileDigest::compute(b"b"));
    }

    #[test]
    fn file_and_buffer_agree() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        let data = vec![7u8; 200 * 1024];
        std::fs::write(&path, &data).unwrap();

        assert_eq!(
            FileDigest::compute_file(&path).unwrap(),
            FileDigest::compute(&data)
        );
    }

    #[test]
    fn incremental_matches_one_shot() {
        let mut hasher = DigestHasher::new();
        hasher.write_all(b"hello ").unwrap();
        hasher.write_all(b"world").unwrap();
        assert_eq!(hasher.finish(), FileDigest::compute(b"hello world"));
    }

    #[test]
    fn validation() {
        let good = FileDigest::compute(b"x");
        assert!(FileDigest::validated(good.as_str()).is_ok());
        assert!(FileDigest::validated("").is_err());
        assert!(FileDigest::validated("not base64!").is_err());
        // valid base64, wrong length
        assert!(FileDigest::validated("aGVsbG8=").is_err());
    }

    #[test]
    fn empty_placeholder() {
        let empty = FileDigest::default();
        assert!(empty.is_empty());
        assert_eq!(empty.to_string(), "<none>");
        assert_eq!(serde_json::to_string(&empty).unwrap(), "\"\"");
    }
}
