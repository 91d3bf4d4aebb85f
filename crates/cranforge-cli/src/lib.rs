//! cranforge - snapshot mirror for CRAN-style package repositories
//!
//! Given a list of package names and a pinned snapshot URL, cranforge
//! resolves the full dependency closure against the snapshot's index, builds
//! or fetches a binary archive per package, stages the archives in a local
//! content-addressed store, and publishes them to a remote repository
//! directory over SSH.
//!
//! # Pipeline
//!
//! ```text
//! package list ──▶ index client ──▶ resolver ──▶ orchestrator ──▶ publisher
//!                  (PACKAGES)       (BuildPlan)   (staging store)  (ssh/scp)
//! ```
//!
//! The snapshot index is fetched once and frozen for the run; failures are
//! isolated per package and collected into a final report whose exit code
//! CI gates on.

pub mod cmd;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use cranforge_schema::PackageName;

#[derive(Debug, Parser)]
#[command(name = "cranforge")]
#[command(author, version, about = "Mirror a pinned CRAN snapshot and republish it")]
pub struct Cli {
    /// Working root for staging and scratch space (default: ~/.cranforge)
    #[arg(long, global = true, env = "CRANFORGE_HOME")]
    pub home: Option<PathBuf>,

    /// Emit the final report as JSON on stdout
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Resolve the package list and print the dependency-ordered build plan
    Plan {
        /// Path to the package list (one name per line)
        list: PathBuf,

        /// Pinned snapshot URL
        #[arg(long, env = "CRANFORGE_REPO_URL")]
        repo_url: String,
    },
    /// Resolve, then build or fetch every package into the staging store
    Build(BuildArgs),
    /// Publish the staged artifacts to the repository directory
    Publish(PublishArgs),
    /// Full pipeline: resolve, build or fetch, then publish
    Mirror {
        #[command(flatten)]
        build: BuildArgs,

        #[command(flatten)]
        publish: PublishArgs,
    },
}

/// Arguments for the resolve-and-build stage.
#[derive(Debug, Args)]
pub struct BuildArgs {
    /// Path to the package list (one name per line)
    pub list: PathBuf,

    /// Pinned snapshot URL
    #[arg(long, env = "CRANFORGE_REPO_URL")]
    pub repo_url: String,

    /// Build packages from source instead of fetching prebuilt binaries
    #[arg(short, long)]
    pub build: bool,

    /// Target platform for prebuilt binary archives
    #[arg(long, default_value = "x86_64-linux")]
    pub platform: String,

    /// Maximum parallel package tasks (default: logical CPU count)
    #[arg(long)]
    pub jobs: Option<usize>,
}

/// Arguments for the publish stage. Key and known-hosts files are
/// provisioned externally (CI secrets); unset fields defer to ambient ssh
/// configuration.
#[derive(Debug, Args)]
pub struct PublishArgs {
    /// Destination: user@host:/path or file:/path
    #[arg(long, env = "CRANFORGE_DEST")]
    pub dest: String,

    /// SSH private key file
    #[arg(long, env = "CRANFORGE_SSH_KEY")]
    pub identity: Option<PathBuf>,

    /// known_hosts file carrying the destination's host key
    #[arg(long, env = "CRANFORGE_KNOWN_HOSTS")]
    pub known_hosts: Option<PathBuf>,
}

/// Read the requested package names: one per line, blank lines and `#`
/// comments ignored.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn read_package_list(path: &Path) -> Result<Vec<PackageName>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read package list {}", path.display()))?;

    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(PackageName::new)
        .collect())
}
