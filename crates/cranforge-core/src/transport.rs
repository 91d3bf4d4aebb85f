//! Publish transports.
//!
//! The publisher talks to the destination through the [`Transport`] trait so
//! the upsert protocol stays independent of the wire. [`SshTransport`] drives
//! the system `ssh`/`scp` binaries: host trust comes from a provisioned
//! known-hosts entry (`StrictHostKeyChecking=yes`, never prompt, never fall
//! back to an unverified host) and authentication from a provisioned private
//! key (`BatchMode=yes` keeps it non-interactive). [`LocalTransport`] serves
//! `file:` destinations and the test suite.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use cranforge_schema::Sha256Digest;

/// Errors from a transport operation.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    /// The SSH handshake failed: bad key, unknown or changed host identity.
    /// Fatal for the whole publish step.
    #[error("authentication or host verification failed: {0}")]
    Auth(String),

    /// A transfer or remote command failed; retryable per artifact.
    #[error("transfer failed: {0}")]
    Transfer(String),

    /// Local filesystem or process-spawn failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The destination spec is not `user@host:/path`, `file:/path`, or a
    /// plain directory path.
    #[error("invalid destination '{0}': expected user@host:/path or file:/path")]
    InvalidDestination(String),
}

impl TransportError {
    /// Whether this failure must abort the whole publish step.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

/// Destination-side operations the publisher needs. Every mutation is
/// two-phase (upload to a temporary name, then [`rename`](Transport::rename))
/// so a concurrent reader of the destination never observes a truncated file.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Create the destination directory if it does not exist.
    async fn ensure_dir(&self) -> Result<(), TransportError>;

    /// Digest of an existing destination file, or `None` when absent.
    async fn remote_digest(&self, filename: &str) -> Result<Option<Sha256Digest>, TransportError>;

    /// Copy `local` to the destination under `remote_name` (a temporary
    /// name; visibility comes from the rename).
    async fn upload(&self, local: &Path, remote_name: &str) -> Result<(), TransportError>;

    /// Atomically move `from` over `to` within the destination directory.
    async fn rename(&self, from: &str, to: &str) -> Result<(), TransportError>;
}

/// A parsed publish destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Remote directory over SSH.
    Ssh {
        /// `user@host` (or bare host).
        target: String,
        /// Absolute directory on the remote.
        dir: String,
    },
    /// Local directory (`file:` prefix or a plain path).
    Local {
        /// The directory.
        dir: PathBuf,
    },
}

impl Destination {
    /// Parse a destination spec.
    ///
    /// `user@host:/srv/repo` selects SSH; `file:/srv/repo` or any spec
    /// without a remote-looking `host:` prefix selects the local transport.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidDestination`] for an empty spec or
    /// an SSH spec with an empty directory.
    pub fn parse(spec: &str) -> Result<Self, TransportError> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(TransportError::InvalidDestination(spec.to_string()));
        }

        if let Some(path) = spec.strip_prefix("file:") {
            return Ok(Self::Local {
                dir: PathBuf::from(path),
            });
        }

        // rsync-style rule: a colon whose prefix contains no slash marks a
        // remote target; anything else is a local path.
        if let Some((target, dir)) = spec.split_once(':') {
            if !target.contains('/') && !target.is_empty() {
                if dir.is_empty() {
                    return Err(TransportError::InvalidDestination(spec.to_string()));
                }
                return Ok(Self::Ssh {
                    target: target.to_string(),
                    dir: dir.to_string(),
                });
            }
        }

        Ok(Self::Local {
            dir: PathBuf::from(spec),
        })
    }

    /// Build the transport for this destination.
    pub fn into_transport(self, auth: SshAuth) -> Box<dyn Transport> {
        match self {
            Self::Ssh { target, dir } => Box::new(SshTransport::new(target, dir, auth)),
            Self::Local { dir } => Box::new(LocalTransport::new(dir)),
        }
    }
}

/// Externally provisioned SSH credentials. `None` fields defer to the
/// ambient ssh configuration (`~/.ssh`), which is how CI provisions them.
#[derive(Debug, Clone, Default)]
pub struct SshAuth {
    /// Private key file.
    pub identity: Option<PathBuf>,
    /// Known-hosts file carrying the destination's host key.
    pub known_hosts: Option<PathBuf>,
}

/// Transport over the system `ssh`/`scp` binaries.
#[derive(Debug, Clone)]
pub struct SshTransport {
    target: String,
    dir: String,
    auth: SshAuth,
}

impl SshTransport {
    /// Create a transport for `target` (user@host) writing into `dir`.
    pub fn new(target: String, dir: String, auth: SshAuth) -> Self {
        Self { target, dir, auth }
    }

    fn options(&self) -> Vec<String> {
        let mut opts = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=yes".to_string(),
        ];
        if let Some(known_hosts) = &self.auth.known_hosts {
            opts.push("-o".to_string());
            opts.push(format!("UserKnownHostsFile={}", known_hosts.display()));
        }
        if let Some(identity) = &self.auth.identity {
            opts.push("-i".to_string());
            opts.push(identity.display().to_string());
        }
        opts
    }

    fn remote_path(&self, filename: &str) -> String {
        format!("{}/{}", self.dir.trim_end_matches('/'), filename)
    }

    async fn run_remote(&self, command: &str) -> Result<std::process::Output, TransportError> {
        debug!("ssh {}: {command}", self.target);
        let output = tokio::process::Command::new("ssh")
            .args(self.options())
            .arg(&self.target)
            .arg(command)
            .output()
            .await?;

        // Exit 255 is ssh's own failure (connection, auth, host key), as
        // opposed to the remote command's status.
        if output.status.code() == Some(255) {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(classify_ssh_failure(&stderr));
        }

        Ok(output)
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn ensure_dir(&self) -> Result<(), TransportError> {
        let output = self
            .run_remote(&format!("mkdir -p {}", shell_quote(&self.dir)))
            .await?;
        if !output.status.success() {
            return Err(TransportError::Transfer(format!(
                "mkdir -p failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn remote_digest(&self, filename: &str) -> Result<Option<Sha256Digest>, TransportError> {
        let path = self.remote_path(filename);
        let output = self
            .run_remote(&format!("sha256sum {}", shell_quote(&path)))
            .await?;

        // Non-zero from sha256sum means the file is absent (or unreadable);
        // either way the artifact gets re-uploaded, which is safe.
        if !output.status.success() {
            return Ok(None);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        match stdout.split_whitespace().next().map(Sha256Digest::parse) {
            Some(Ok(digest)) => Ok(Some(digest)),
            _ => {
                warn!("unparseable sha256sum output for {path}");
                Ok(None)
            }
        }
    }

    async fn upload(&self, local: &Path, remote_name: &str) -> Result<(), TransportError> {
        let dest = format!("{}:{}", self.target, self.remote_path(remote_name));
        debug!("scp {} -> {dest}", local.display());

        let output = tokio::process::Command::new("scp")
            .args(self.options())
            .arg("-q")
            .arg(local)
            .arg(&dest)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if output.status.code() == Some(255) || looks_like_auth_failure(&stderr) {
                return Err(classify_ssh_failure(&stderr));
            }
            return Err(TransportError::Transfer(format!("scp failed: {stderr}")));
        }
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), TransportError> {
        let command = format!(
            "mv -f {} {}",
            shell_quote(&self.remote_path(from)),
            shell_quote(&self.remote_path(to))
        );
        let output = self.run_remote(&command).await?;
        if !output.status.success() {
            return Err(TransportError::Transfer(format!(
                "remote rename failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

/// Transport backed by a local directory.
#[derive(Debug, Clone)]
pub struct LocalTransport {
    dir: PathBuf,
}

impl LocalTransport {
    /// Create a transport writing into `dir`.
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn ensure_dir(&self) -> Result<(), TransportError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    async fn remote_digest(&self, filename: &str) -> Result<Option<Sha256Digest>, TransportError> {
        let path = self.dir.join(filename);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(Sha256Digest::compute_file(&path)?))
    }

    async fn upload(&self, local: &Path, remote_name: &str) -> Result<(), TransportError> {
        tokio::fs::copy(local, self.dir.join(remote_name)).await?;
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), TransportError> {
        tokio::fs::rename(self.dir.join(from), self.dir.join(to)).await?;
        Ok(())
    }
}

/// Classify an ssh-level failure (exit 255 or scp auth noise) into the
/// fatal-auth vs retryable-transfer split.
fn classify_ssh_failure(stderr: &str) -> TransportError {
    if looks_like_auth_failure(stderr) {
        TransportError::Auth(stderr.to_string())
    } else {
        TransportError::Transfer(stderr.to_string())
    }
}

fn looks_like_auth_failure(stderr: &str) -> bool {
    const MARKERS: &[&str] = &[
        "Permission denied",
        "Host key verification failed",
        "No supported authentication methods",
        "Too many authentication failures",
        "REMOTE HOST IDENTIFICATION HAS CHANGED",
    ];
    MARKERS.iter().any(|m| stderr.contains(m))
}

/// Single-quote a string for a remote `sh`, escaping embedded quotes.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ssh_and_local_destinations() {
        assert_eq!(
            Destination::parse("deploy@repo.example.org:/srv/cran").unwrap(),
            Destination::Ssh {
                target: "deploy@repo.example.org".to_string(),
                dir: "/srv/cran".to_string(),
            }
        );
        assert_eq!(
            Destination::parse("file:/srv/cran").unwrap(),
            Destination::Local {
                dir: PathBuf::from("/srv/cran")
            }
        );
        // a path containing a colon after a slash stays local
        assert_eq!(
            Destination::parse("/srv/odd:name").unwrap(),
            Destination::Local {
                dir: PathBuf::from("/srv/odd:name")
            }
        );
        assert!(Destination::parse("").is_err());
        assert!(Destination::parse("host:").is_err());
    }

    #[test]
    fn ssh_options_enforce_host_verification() {
        let transport = SshTransport::new(
            "deploy@host".to_string(),
            "/srv/cran".to_string(),
            SshAuth {
                identity: Some(PathBuf::from("/secrets/id_ed25519")),
                known_hosts: Some(PathBuf::from("/secrets/known_hosts")),
            },
        );

        let opts = transport.options();
        assert!(opts.contains(&"BatchMode=yes".to_string()));
        assert!(opts.contains(&"StrictHostKeyChecking=yes".to_string()));
        assert!(opts.contains(&"UserKnownHostsFile=/secrets/known_hosts".to_string()));
        assert!(opts.contains(&"-i".to_string()));
    }

    #[test]
    fn auth_failures_are_distinguished_from_transfer_failures() {
        assert!(classify_ssh_failure("user@host: Permission denied (publickey).").is_auth());
        assert!(classify_ssh_failure("Host key verification failed.").is_auth());
        assert!(!classify_ssh_failure("connection reset by peer").is_auth());
    }

    #[test]
    fn shell_quoting_survives_embedded_quotes() {
        assert_eq!(shell_quote("/srv/cran"), "'/srv/cran'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[tokio::test]
    async fn local_transport_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("pkg_1.0.tar.gz");
        std::fs::write(&src, b"archive").unwrap();

        let dest = tmp.path().join("repo");
        let transport = LocalTransport::new(dest.clone());
        transport.ensure_dir().await.unwrap();

        assert_eq!(transport.remote_digest("pkg_1.0.tar.gz").await.unwrap(), None);

        transport.upload(&src, "pkg_1.0.tar.gz.part").await.unwrap();
        transport
            .rename("pkg_1.0.tar.gz.part", "pkg_1.0.tar.gz")
            .await
            .unwrap();

        assert_eq!(
            transport.remote_digest("pkg_1.0.tar.gz").await.unwrap(),
            Some(Sha256Digest::compute(b"archive"))
        );
        assert!(dest.join("pkg_1.0.tar.gz").exists());
        assert!(!dest.join("pkg_1.0.tar.gz.part").exists());
    }
}
