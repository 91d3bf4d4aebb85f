//! Remote publishing.
//!
//! Publishing is an idempotent per-artifact upsert keyed by digest: an
//! artifact already present at the destination with identical bytes is
//! skipped, anything else is uploaded under a temporary name and renamed
//! into place. The manifest is not all-or-nothing -- individual failures are
//! retried, collected, and surfaced together at the end -- but each artifact
//! transfer is atomic at the destination. Uploads run sequentially: a single
//! destination link gains nothing from interleaved transfers.

use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::store::Artifact;
use crate::transport::{Transport, TransportError};

/// Attempts per artifact before it is reported failed
const MAX_RETRIES: u32 = 3;

/// Base retry delay in milliseconds, scaled by attempt number
const RETRY_DELAY_MS: u64 = 500;

/// The artifact set one run intends to publish. Built from settled build
/// results (or a staged store) and consumed exactly once.
#[derive(Debug, Clone)]
pub struct PublishManifest {
    artifacts: Vec<Artifact>,
}

impl PublishManifest {
    /// Assemble a manifest, ordered by file name for a deterministic
    /// transfer sequence.
    pub fn new(mut artifacts: Vec<Artifact>) -> Self {
        artifacts.sort_by(|a, b| a.filename.cmp(&b.filename));
        artifacts.dedup_by(|a, b| a.filename == b.filename);
        Self { artifacts }
    }

    /// The artifacts in transfer order.
    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    /// Number of artifacts.
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    /// Whether there is nothing to publish.
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

/// What happened to one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum PublishOutcome {
    /// Uploaded and renamed into place.
    Uploaded,
    /// Destination already held an identical copy; transfer skipped.
    AlreadyPresent,
    /// All attempts exhausted.
    Failed {
        /// The final attempt's error.
        error: String,
    },
}

/// Per-artifact outcome of a publish run.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactReport {
    /// Published file name.
    pub filename: String,
    /// What happened.
    #[serde(flatten)]
    pub outcome: PublishOutcome,
}

/// Outcome of the whole publish step.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PublishReport {
    /// One entry per manifest artifact, in transfer order.
    pub artifacts: Vec<ArtifactReport>,
}

impl PublishReport {
    /// File names of artifacts that exhausted their retries.
    pub fn failed(&self) -> Vec<&str> {
        self.artifacts
            .iter()
            .filter(|a| matches!(a.outcome, PublishOutcome::Failed { .. }))
            .map(|a| a.filename.as_str())
            .collect()
    }

    /// Whether every artifact reached the destination.
    pub fn is_success(&self) -> bool {
        self.failed().is_empty()
    }

    /// Number of artifacts actually transferred.
    pub fn uploaded(&self) -> usize {
        self.artifacts
            .iter()
            .filter(|a| a.outcome == PublishOutcome::Uploaded)
            .count()
    }

    /// Number of artifacts skipped as already present.
    pub fn already_present(&self) -> usize {
        self.artifacts
            .iter()
            .filter(|a| a.outcome == PublishOutcome::AlreadyPresent)
            .count()
    }
}

/// Errors that end the publish step.
#[derive(thiserror::Error, Debug)]
pub enum PublishError {
    /// The handshake failed; nothing was transferred.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The destination directory could not be prepared.
    #[error("cannot prepare destination: {0}")]
    Destination(String),

    /// Some artifacts failed after exhausting retries; the rest were
    /// published. The report carries every per-artifact outcome.
    #[error("publish incomplete, failed artifacts: {}", .report.failed().join(", "))]
    Partial {
        /// Full per-artifact report.
        report: PublishReport,
    },
}

/// Publish every manifest artifact through `transport`.
///
/// # Errors
///
/// [`PublishError::Auth`] aborts on the first handshake failure;
/// [`PublishError::Partial`] reports per-artifact failures after the rest
/// have been published.
pub async fn publish(
    manifest: &PublishManifest,
    transport: &dyn Transport,
) -> Result<PublishReport, PublishError> {
    transport.ensure_dir().await.map_err(|e| {
        if e.is_auth() {
            PublishError::Auth(e.to_string())
        } else {
            PublishError::Destination(e.to_string())
        }
    })?;

    let mut report = PublishReport::default();
    for artifact in manifest.artifacts() {
        match publish_one(artifact, transport).await {
            Ok(outcome) => {
                info!("{}: {:?}", artifact.filename, outcome);
                report.artifacts.push(ArtifactReport {
                    filename: artifact.filename.clone(),
                    outcome,
                });
            }
            Err(e) if e.is_auth() => return Err(PublishError::Auth(e.to_string())),
            Err(e) => {
                warn!("{}: giving up: {e}", artifact.filename);
                report.artifacts.push(ArtifactReport {
                    filename: artifact.filename.clone(),
                    outcome: PublishOutcome::Failed {
                        error: e.to_string(),
                    },
                });
            }
        }
    }

    if report.is_success() {
        Ok(report)
    } else {
        Err(PublishError::Partial { report })
    }
}

async fn publish_one(
    artifact: &Artifact,
    transport: &dyn Transport,
) -> Result<PublishOutcome, TransportError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match try_publish_one(artifact, transport).await {
            Ok(outcome) => return Ok(outcome),
            Err(e) if e.is_auth() => return Err(e),
            Err(e) => {
                if attempt >= MAX_RETRIES {
                    return Err(e);
                }
                warn!(
                    "{}: attempt {attempt} failed: {e}, retrying...",
                    artifact.filename
                );
                tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS * u64::from(attempt)))
                    .await;
            }
        }
    }
}

async fn try_publish_one(
    artifact: &Artifact,
    transport: &dyn Transport,
) -> Result<PublishOutcome, TransportError> {
    if let Some(remote) = transport.remote_digest(&artifact.filename).await? {
        if remote == artifact.key.sha256 {
            return Ok(PublishOutcome::AlreadyPresent);
        }
    }

    let part = format!(
        "{}.part-{}",
        artifact.filename,
        artifact.key.sha256.short()
    );
    transport.upload(&artifact.path, &part).await?;
    transport.rename(&part, &artifact.filename).await?;
    Ok(PublishOutcome::Uploaded)
}
