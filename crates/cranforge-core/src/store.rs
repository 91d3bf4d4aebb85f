//! Content-addressed artifact staging.
//!
//! Completed archives land here between the build and publish stages, keyed
//! by (name, version, digest). Writes go through a temp file in the store
//! directory and are renamed into place, so an artifact is either fully
//! visible or absent -- a crash mid-write never leaves a plausible-looking
//! entry. A sidecar manifest (`.manifest.json`, same write discipline) makes
//! the staged set enumerable across process invocations, which is what lets
//! `publish` run as a separate command.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use cranforge_schema::{PackageName, Sha256Digest, Version};

const MANIFEST_NAME: &str = ".manifest.json";

/// Errors from store operations.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The source path has no usable file name.
    #[error("not a storable archive path: {0}")]
    InvalidSource(PathBuf),

    /// The sidecar manifest is unreadable.
    #[error("corrupt store manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

/// Identity of a staged artifact: the snapshot never carries two artifacts
/// with the same key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactKey {
    /// Package name.
    pub name: PackageName,
    /// Package version.
    pub version: Version,
    /// Digest of the archive bytes, computed at `put` time.
    pub sha256: Sha256Digest,
}

/// A staged, immutable archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Content key.
    pub key: ArtifactKey,
    /// Archive file name as it will appear in the published repository.
    pub filename: String,
    /// Absolute path inside the staging store.
    pub path: PathBuf,
    /// Archive size in bytes.
    pub size: u64,
}

/// Local staging area for the current run's artifacts.
#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
    manifest: Mutex<BTreeMap<String, Artifact>>,
}

impl ArtifactStore {
    /// Open a store at `root`, loading any manifest a previous invocation
    /// left behind.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or an existing
    /// manifest cannot be parsed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;

        let manifest_path = root.join(MANIFEST_NAME);
        let manifest = if manifest_path.exists() {
            serde_json::from_str(&std::fs::read_to_string(&manifest_path)?)?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            root,
            manifest: Mutex::new(manifest),
        })
    }

    /// Open a store at `root`, discarding anything staged by earlier runs.
    /// The store then holds exactly the artifacts of the current run.
    ///
    /// # Errors
    ///
    /// Returns an error if the old directory cannot be removed or the new
    /// one cannot be created.
    pub fn create_fresh(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        if root.exists() {
            std::fs::remove_dir_all(&root)?;
        }
        Self::open(root)
    }

    /// The staging directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stage the archive at `src` for `name`/`version`.
    ///
    /// The digest is computed from the bytes themselves, so content
    /// addressing never depends on index metadata. Re-putting the same
    /// (name, version) is a consistent overwrite: the rename replaces the
    /// old archive in one step.
    ///
    /// # Errors
    ///
    /// Returns an error on filesystem failure; on error nothing new is
    /// visible in the store.
    pub fn put(
        &self,
        name: &PackageName,
        version: &Version,
        src: &Path,
    ) -> Result<Artifact, StoreError> {
        let sha256 = Sha256Digest::compute_file(src)?;
        let filename = src
            .file_name()
            .and_then(|n| n.to_str())
            .map(String::from)
            .ok_or_else(|| StoreError::InvalidSource(src.to_path_buf()))?;

        let final_path = self.root.join(&filename);

        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        let mut reader = std::fs::File::open(src)?;
        std::io::copy(&mut reader, tmp.as_file_mut())?;
        tmp.persist(&final_path).map_err(|e| StoreError::Io(e.error))?;

        let size = std::fs::metadata(&final_path)?.len();
        let artifact = Artifact {
            key: ArtifactKey {
                name: name.clone(),
                version: version.clone(),
                sha256,
            },
            filename: filename.clone(),
            path: final_path,
            size,
        };

        debug!("staged {} ({} bytes)", artifact.filename, artifact.size);

        let mut manifest = self
            .manifest
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        manifest.insert(filename, artifact.clone());
        self.write_manifest(&manifest)?;

        Ok(artifact)
    }

    /// Look up a staged artifact by its full key.
    pub fn get(&self, key: &ArtifactKey) -> Option<Artifact> {
        let manifest = self
            .manifest
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        manifest.values().find(|a| &a.key == key).cloned()
    }

    /// All staged artifacts, in file-name order.
    pub fn list(&self) -> Vec<Artifact> {
        let manifest = self
            .manifest
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        manifest.values().cloned().collect()
    }

    fn write_manifest(&self, manifest: &BTreeMap<String, Artifact>) -> Result<(), StoreError> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        serde_json::to_writer_pretty(tmp.as_file_mut(), manifest)?;
        tmp.persist(self.root.join(MANIFEST_NAME))
            .map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }
}
