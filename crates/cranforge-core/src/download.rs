//! Streaming archive download with SHA-256 verification.
//!
//! Archives stream into a `.part` file next to their destination while the
//! digest is computed incrementally; only a fully verified file is renamed
//! into place, so a crashed or failed download never leaves a plausible-
//! looking archive behind.

use std::path::Path;

use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use cranforge_schema::Sha256Digest;

/// Errors from a single download attempt.
#[derive(thiserror::Error, Debug)]
pub enum DownloadError {
    /// Transport-level failure (connect, timeout, interrupted body).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success response status.
    #[error("HTTP {status} fetching {url}")]
    Status {
        /// The HTTP status received.
        status: reqwest::StatusCode,
        /// The requested URL.
        url: String,
    },

    /// Local filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The downloaded bytes do not match the digest the index promised.
    #[error("digest mismatch for {url}: expected {expected}, got {actual}")]
    DigestMismatch {
        /// The requested URL.
        url: String,
        /// Digest the index entry advertised.
        expected: String,
        /// Digest of the bytes actually received.
        actual: String,
    },
}

impl DownloadError {
    /// Whether retrying the same request can plausibly succeed.
    ///
    /// Transport failures and digest mismatches are transient (a mismatch is
    /// usually a truncated body from a dropped connection); a definite HTTP
    /// client error is not, while 5xx responses are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) | Self::DigestMismatch { .. } => true,
            Self::Status { status, .. } => status.is_server_error(),
            Self::Io(_) => false,
        }
    }
}

/// Download `url` to `dest`, streaming with incremental SHA-256.
///
/// When `expected` is given, the received digest must match or the partial
/// file is removed and [`DownloadError::DigestMismatch`] returned. Returns
/// the digest of the downloaded bytes.
///
/// # Errors
///
/// Any [`DownloadError`]; the destination is untouched unless the download
/// completed and verified.
pub async fn fetch_to_file(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    expected: Option<&Sha256Digest>,
) -> Result<Sha256Digest, DownloadError> {
    let response = client.get(url).send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::Status {
            status,
            url: url.to_string(),
        });
    }

    let file_name = dest
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("download");
    let part = dest.with_file_name(format!("{file_name}.part"));

    let mut file = File::create(&part).await?;
    let mut stream = response.bytes_stream();
    let mut hasher = Sha256::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        hasher.update(&chunk);
    }

    file.flush().await?;
    drop(file);

    let actual = hex::encode(hasher.finalize());
    if let Some(expected) = expected {
        if actual != expected.as_str() {
            tokio::fs::remove_file(&part).await.ok();
            return Err(DownloadError::DigestMismatch {
                url: url.to_string(),
                expected: expected.as_str().to_string(),
                actual,
            });
        }
    }

    tokio::fs::rename(&part, dest).await?;
    Ok(Sha256Digest::parse(&actual).expect("hex encoding of a sha256 is always valid"))
}
