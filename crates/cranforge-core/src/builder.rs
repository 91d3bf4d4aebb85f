//! Source package builds.
//!
//! A build turns a source archive into a platform binary archive by driving
//! the R toolchain (`R CMD INSTALL --build`) in a scratch directory. The
//! subprocess inherits a trimmed environment and writes its output to a log
//! file; on failure the log tail is surfaced so CI output stays readable.
//! The [`PackageBuilder`] trait is the seam the orchestrator works against,
//! letting tests substitute a recording mock for the real toolchain.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tracing::debug;

use cranforge_schema::IndexEntry;

/// Errors from building one package. Build failures are permanent for the
/// package: re-running the same compiler on the same source is not retried.
#[derive(thiserror::Error, Debug)]
pub enum BuildError {
    /// The build command exited non-zero.
    #[error("build command exited with {code:?}; last output:\n{tail}")]
    CommandFailed {
        /// Exit code, when the process was not killed by a signal.
        code: Option<i32>,
        /// Tail of the build log.
        tail: String,
    },

    /// The build succeeded but no binary archive appeared.
    #[error("build produced no binary archive for {0}")]
    MissingOutput(String),

    /// Filesystem or process-spawn failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Builds a binary archive from a downloaded source archive.
#[async_trait]
pub trait PackageBuilder: Send + Sync {
    /// Build `entry` from the source archive at `source`, working inside
    /// `workdir`, and return the path of the produced binary archive.
    async fn build(
        &self,
        entry: &IndexEntry,
        source: &Path,
        workdir: &Path,
    ) -> Result<PathBuf, BuildError>;
}

/// The real builder: `R CMD INSTALL --build <source>`.
///
/// R installs the package into a throwaway library under the workdir and
/// emits the binary archive into the current directory, named
/// `{name}_{version}*.tar.gz` (the platform suffix varies by OS).
#[derive(Debug, Clone)]
pub struct RCommandBuilder {
    r_binary: PathBuf,
}

impl RCommandBuilder {
    /// Use the `R` binary on `PATH`.
    pub fn new() -> Self {
        Self {
            r_binary: PathBuf::from("R"),
        }
    }

    /// Use an explicit R binary (tests, non-standard installs).
    pub fn with_binary(r_binary: PathBuf) -> Self {
        Self { r_binary }
    }
}

impl Default for RCommandBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PackageBuilder for RCommandBuilder {
    async fn build(
        &self,
        entry: &IndexEntry,
        source: &Path,
        workdir: &Path,
    ) -> Result<PathBuf, BuildError> {
        let library = workdir.join("lib");
        tokio::fs::create_dir_all(&library).await?;

        let log_path = workdir.join("build.log");
        let log_file = std::fs::File::create(&log_path)?;

        debug!("building {} from {}", entry.full_name(), source.display());

        let status = tokio::process::Command::new(&self.r_binary)
            .arg("CMD")
            .arg("INSTALL")
            .arg("--build")
            .arg("--library")
            .arg(&library)
            .arg(source)
            .current_dir(workdir)
            .env("TMPDIR", workdir)
            .stdout(Stdio::from(log_file.try_clone()?))
            .stderr(Stdio::from(log_file))
            .status()
            .await?;

        if !status.success() {
            let tail = read_last_lines(&log_path, 20).unwrap_or_default();
            return Err(BuildError::CommandFailed {
                code: status.code(),
                tail,
            });
        }

        find_binary_archive(workdir, entry, source)
            .ok_or_else(|| BuildError::MissingOutput(entry.full_name()))
    }
}

/// Locate the binary archive the build emitted into `workdir`.
///
/// Matches `{name}_{version}*.tar.gz` while excluding the source archive
/// itself, which may sit in the same directory under the same stem.
fn find_binary_archive(workdir: &Path, entry: &IndexEntry, source: &Path) -> Option<PathBuf> {
    let stem = entry.full_name();
    let source_name = source.file_name()?.to_str()?.to_string();

    let mut candidates: Vec<PathBuf> = std::fs::read_dir(workdir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&stem) && n.ends_with(".tar.gz") && n != source_name)
        })
        .collect();

    candidates.sort();
    candidates.into_iter().next()
}

/// Read the last N lines from a file efficiently.
///
/// Seeks to a fixed-size tail instead of loading the whole log, which for a
/// large compile can run to hundreds of megabytes.
fn read_last_lines(path: &Path, n: usize) -> std::io::Result<String> {
    use std::io::{Read, Seek, SeekFrom};

    const TAIL_SIZE: u64 = 16 * 1024;

    let mut file = std::fs::File::open(path)?;
    let file_len = file.metadata()?.len();

    let seek_pos = file_len.saturating_sub(TAIL_SIZE);
    file.seek(SeekFrom::Start(seek_pos))?;

    let mut buffer = String::new();
    file.read_to_string(&mut buffer)?;

    // If we seeked mid-file, drop the first (partial) line.
    let content = if seek_pos > 0 {
        buffer
            .find('\n')
            .map_or(buffer.as_str(), |idx| &buffer[idx + 1..])
    } else {
        &buffer
    };

    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(n);
    Ok(lines[start..].join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cranforge_schema::PackageName;

    fn entry(name: &str, version: &str) -> IndexEntry {
        IndexEntry {
            name: PackageName::new(name),
            version: version.into(),
            depends: vec![],
            needs_compilation: false,
            path: None,
            sha256: None,
        }
    }

    #[test]
    fn finds_binary_archive_excluding_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("zoo_1.8-12.tar.gz");
        let binary = dir.path().join("zoo_1.8-12_R_x86_64-pc-linux-gnu.tar.gz");
        std::fs::write(&source, b"source").unwrap();
        std::fs::write(&binary, b"binary").unwrap();

        let found = find_binary_archive(dir.path(), &entry("zoo", "1.8-12"), &source);
        assert_eq!(found, Some(binary));
    }

    #[test]
    fn missing_archive_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("zoo_1.8-12.tar.gz");
        std::fs::write(&source, b"source").unwrap();

        assert!(find_binary_archive(dir.path(), &entry("zoo", "1.8-12"), &source).is_none());
    }

    #[test]
    fn tail_of_short_file_is_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("build.log");
        std::fs::write(&log, "one\ntwo\nthree\n").unwrap();

        assert_eq!(read_last_lines(&log, 20).unwrap(), "one\ntwo\nthree");
        assert_eq!(read_last_lines(&log, 2).unwrap(), "two\nthree");
    }

    #[tokio::test]
    async fn failed_command_surfaces_log_tail() {
        let dir = tempfile::tempdir().unwrap();
        // `false` ignores its arguments and exits 1 without output.
        let builder = RCommandBuilder::with_binary(PathBuf::from("false"));
        let source = dir.path().join("pkg_1.0.tar.gz");
        std::fs::write(&source, b"src").unwrap();

        let err = builder
            .build(&entry("pkg", "1.0"), &source, dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::CommandFailed { code: Some(1), .. }));
    }
}
