use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// A validated SHA-256 digest (64 hex characters).
///
/// This newtype ensures that all digests in the system are validated at
/// construction and deserialization time, preventing invalid hex strings from
/// propagating through the codebase. Artifacts are keyed by
/// (name, version, digest), so an unvalidated digest would poison store and
/// publish paths alike.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Sha256Digest(String);

/// Error returned when a digest string fails validation.
#[derive(thiserror::Error, Debug)]
pub enum DigestError {
    /// The hex portion is not exactly 64 characters long.
    #[error("invalid SHA-256 digest: expected 64 hex characters, got {0} in '{1}'")]
    Length(usize, String),

    /// The string contains characters outside `[0-9a-fA-F]`.
    #[error("invalid SHA-256 digest: non-hex characters in '{0}'")]
    NonHex(String),
}

impl Sha256Digest {
    /// Parse and validate a digest string.
    ///
    /// Accepts strings with or without a `sha256:` prefix; the stored form is
    /// lowercase hex without the prefix.
    ///
    /// # Errors
    ///
    /// Returns [`DigestError`] if the hex portion is not exactly 64 ASCII hex
    /// characters.
    pub fn parse(s: &str) -> Result<Self, DigestError> {
        let hex = s.strip_prefix("sha256:").unwrap_or(s).trim();

        if hex.len() != 64 {
            return Err(DigestError::Length(hex.len(), s.to_string()));
        }
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DigestError::NonHex(s.to_string()));
        }

        Ok(Self(hex.to_lowercase()))
    }

    /// Compute the digest of a byte slice.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hex::encode(hasher.finalize()))
    }

    /// Compute the digest of a file by streaming it in 64 KB chunks.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be opened or read.
    pub fn compute_file(path: &Path) -> std::io::Result<Self> {
        let mut file = std::fs::File::open(path)?;
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; 65536];

        loop {
            let bytes_read = file.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(Self(hex::encode(hasher.finalize())))
    }

    /// Return the digest as a lowercase hex string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The first eight hex characters, used for short display and temp names.
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl<'de> Deserialize<'de> for Sha256Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Sha256Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
