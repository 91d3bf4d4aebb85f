//! Build orchestration.
//!
//! Executes a [`BuildPlan`] with a bounded worker pool. A package is
//! dispatched only once every dependency has a terminal result, so
//! independent subtrees run in parallel while dependent chains stay
//! serialized. Failures are isolated per package: a failed dependency marks
//! its transitive dependents skipped (naming the root cause) without ever
//! starting their work, and the run always settles every package instead of
//! aborting on the first error.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use cranforge_schema::{IndexEntry, PackageName, Platform, Version};

use crate::builder::{BuildError, PackageBuilder};
use crate::download::{self, DownloadError};
use crate::resolver::BuildPlan;
use crate::store::{Artifact, ArtifactStore, StoreError};

/// Attempts per package for transient failures
const MAX_ATTEMPTS: u32 = 3;

/// Base retry delay in milliseconds, scaled by attempt number
const RETRY_DELAY_MS: u64 = 500;

/// How each package reaches the artifact store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// Download the snapshot's prebuilt binary for the target platform.
    Fetch,
    /// Download the source archive and compile it.
    Build,
}

/// Frozen options for one orchestrator run.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Pinned snapshot URL.
    pub repo_url: String,
    /// Target platform for binary archives.
    pub platform: Platform,
    /// Fetch prebuilt binaries or build from source.
    pub mode: BuildMode,
    /// Worker pool bound.
    pub jobs: usize,
    /// Scratch directory for downloads and builds.
    pub work_dir: PathBuf,
    /// Cooperative cancellation: stops new dispatches, lets in-flight work
    /// settle.
    pub cancel: CancellationToken,
}

/// Terminal state of one package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum BuildStatus {
    /// Compiled from source.
    Built,
    /// Prebuilt binary fetched.
    Downloaded,
    /// The package's own download or build failed.
    Failed,
    /// Never attempted because a dependency failed. Recorded distinctly
    /// from `Failed` so the report reconstructs causality.
    SkippedDueToDependency {
        /// The package whose failure caused the skip (the original
        /// failure, not an intermediate skipped dependent).
        failed_dependency: PackageName,
    },
}

/// One package's outcome, produced exactly once per run.
#[derive(Debug, Clone, Serialize)]
pub struct BuildResult {
    /// Package name.
    pub name: PackageName,
    /// Package version.
    pub version: Version,
    /// Terminal state.
    #[serde(flatten)]
    pub status: BuildStatus,
    /// The staged artifact, for `Built`/`Downloaded`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
    /// The failure message, for `Failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BuildResult {
    /// Whether this package may be published.
    pub fn is_ok(&self) -> bool {
        matches!(self.status, BuildStatus::Built | BuildStatus::Downloaded)
    }

    fn ok(entry: &IndexEntry, status: BuildStatus, artifact: Artifact) -> Self {
        Self {
            name: entry.name.clone(),
            version: entry.version.clone(),
            status,
            artifact: Some(artifact),
            error: None,
        }
    }

    fn failed(entry: &IndexEntry, error: String) -> Self {
        Self {
            name: entry.name.clone(),
            version: entry.version.clone(),
            status: BuildStatus::Failed,
            artifact: None,
            error: Some(error),
        }
    }

    fn skipped(entry: &IndexEntry, failed_dependency: PackageName) -> Self {
        Self {
            name: entry.name.clone(),
            version: entry.version.clone(),
            status: BuildStatus::SkippedDueToDependency { failed_dependency },
            artifact: None,
            error: None,
        }
    }
}

/// Drives a [`BuildPlan`] to completion against one snapshot.
pub struct Orchestrator {
    client: reqwest::Client,
    builder: Arc<dyn PackageBuilder>,
    store: Arc<ArtifactStore>,
    opts: BuildOptions,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("opts", &self.opts)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create an orchestrator over the shared HTTP client, builder, and
    /// staging store.
    pub fn new(
        client: reqwest::Client,
        builder: Arc<dyn PackageBuilder>,
        store: Arc<ArtifactStore>,
        opts: BuildOptions,
    ) -> Self {
        Self {
            client,
            builder,
            store,
            opts,
        }
    }

    /// Settle every package in `plan`, returning one result per package in
    /// plan order.
    pub async fn run(&self, plan: &BuildPlan) -> Vec<BuildResult> {
        let in_plan: HashSet<PackageName> = plan.names().cloned().collect();
        let mut pending: VecDeque<IndexEntry> = plan.entries().to_vec().into();
        let mut terminal: HashMap<PackageName, Terminal> = HashMap::new();
        let mut results: Vec<BuildResult> = Vec::new();
        let mut tasks: JoinSet<BuildResult> = JoinSet::new();
        let semaphore = Arc::new(Semaphore::new(self.opts.jobs.max(1)));

        loop {
            // Dispatch everything whose dependencies have settled. `pending`
            // is in plan order, so a skip cascades through dependents within
            // a single pass.
            let mut waiting = VecDeque::new();
            while let Some(entry) = pending.pop_front() {
                let deps: Vec<&PackageName> = entry
                    .depends
                    .iter()
                    .filter(|d| in_plan.contains(d.as_str()))
                    .collect();

                if let Some(root) = deps.iter().find_map(|d| failure_root(&terminal, d)) {
                    warn!(
                        "skipping {}: dependency {root} did not complete",
                        entry.name
                    );
                    terminal.insert(entry.name.clone(), Terminal::Skipped(root.clone()));
                    results.push(BuildResult::skipped(&entry, root));
                } else if deps.iter().all(|d| terminal.contains_key(d.as_str())) {
                    if self.opts.cancel.is_cancelled() {
                        terminal.insert(entry.name.clone(), Terminal::Failed);
                        results
                            .push(BuildResult::failed(&entry, "run cancelled".to_string()));
                        continue;
                    }
                    tasks.spawn(process_package(
                        entry,
                        self.client.clone(),
                        Arc::clone(&self.builder),
                        Arc::clone(&self.store),
                        self.opts.clone(),
                        Arc::clone(&semaphore),
                    ));
                } else {
                    waiting.push_back(entry);
                }
            }
            pending = waiting;

            if tasks.is_empty() {
                if pending.is_empty() {
                    break;
                }
                // No runnable work but packages remain: a task panicked and
                // its package never settled. Fail the rest instead of
                // hanging.
                for entry in pending.drain(..) {
                    results.push(BuildResult::failed(
                        &entry,
                        "scheduler stalled: dependency never settled".to_string(),
                    ));
                }
                break;
            }

            match tasks.join_next().await {
                Some(Ok(result)) => {
                    terminal.insert(result.name.clone(), Terminal::from_result(&result));
                    results.push(result);
                }
                Some(Err(e)) => warn!("build task aborted: {e}"),
                None => unreachable!("join_next on a non-empty JoinSet"),
            }
        }

        // Report in plan order regardless of completion order.
        let order: HashMap<&PackageName, usize> =
            plan.names().enumerate().map(|(i, n)| (n, i)).collect();
        results.sort_by_key(|r| order.get(&r.name).copied().unwrap_or(usize::MAX));
        results
    }
}

/// One package's worker task: wait for a pool slot, then attempt the
/// download or build with bounded retries for transient failures.
async fn process_package(
    entry: IndexEntry,
    client: reqwest::Client,
    builder: Arc<dyn PackageBuilder>,
    store: Arc<ArtifactStore>,
    opts: BuildOptions,
    semaphore: Arc<Semaphore>,
) -> BuildResult {
    let _permit = match semaphore.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return BuildResult::failed(&entry, "worker pool closed".to_string()),
    };

    if opts.cancel.is_cancelled() {
        return BuildResult::failed(&entry, "run cancelled".to_string());
    }

    let mut attempt = 0;
    loop {
        attempt += 1;
        match attempt_package(&entry, &client, builder.as_ref(), &store, &opts).await {
            Ok((status, artifact)) => {
                info!("{} {}: {:?}", entry.name, entry.version, status);
                return BuildResult::ok(&entry, status, artifact);
            }
            Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                warn!("{}: attempt {attempt} failed: {e}, retrying...", entry.name);
                tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS * u64::from(attempt)))
                    .await;
            }
            Err(e) => {
                warn!("{} {} failed: {e}", entry.name, entry.version);
                return BuildResult::failed(&entry, e.to_string());
            }
        }
    }
}

/// Settled state used for dispatch decisions.
#[derive(Debug, Clone)]
enum Terminal {
    Ok,
    Failed,
    Skipped(PackageName),
}

impl Terminal {
    fn from_result(result: &BuildResult) -> Self {
        match &result.status {
            BuildStatus::Built | BuildStatus::Downloaded => Self::Ok,
            BuildStatus::Failed => Self::Failed,
            BuildStatus::SkippedDueToDependency { failed_dependency } => {
                Self::Skipped(failed_dependency.clone())
            }
        }
    }
}

/// The original failure behind `name`, if it did not complete: the package
/// itself when it failed, or the root cause it was skipped for.
fn failure_root(
    terminal: &HashMap<PackageName, Terminal>,
    name: &PackageName,
) -> Option<PackageName> {
    match terminal.get(name.as_str())? {
        Terminal::Ok => None,
        Terminal::Failed => Some(name.clone()),
        Terminal::Skipped(root) => Some(root.clone()),
    }
}

/// Errors from one attempt at one package.
#[derive(thiserror::Error, Debug)]
enum AttemptError {
    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AttemptError {
    /// Only download-level failures are worth a retry; a compiler that just
    /// failed will fail again, and store errors are local faults.
    fn is_transient(&self) -> bool {
        matches!(self, Self::Download(e) if e.is_transient())
    }
}

/// The Downloaded-vs-Built decision point.
///
/// Today the choice is global, driven by the CLI's `--build` flag. The entry
/// stays in the signature so a per-package availability probe (e.g. "is
/// there a binary for this platform?") can replace the policy without
/// touching the scheduler.
fn decide_action(_entry: &IndexEntry, mode: BuildMode) -> Action {
    match mode {
        BuildMode::Fetch => Action::FetchBinary,
        BuildMode::Build => Action::BuildFromSource,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    FetchBinary,
    BuildFromSource,
}

async fn attempt_package(
    entry: &IndexEntry,
    client: &reqwest::Client,
    builder: &dyn PackageBuilder,
    store: &ArtifactStore,
    opts: &BuildOptions,
) -> Result<(BuildStatus, Artifact), AttemptError> {
    let workdir = opts.work_dir.join(entry.full_name());
    tokio::fs::create_dir_all(&workdir).await?;

    match decide_action(entry, opts.mode) {
        Action::FetchBinary => {
            let url = binary_url(&opts.repo_url, &opts.platform, entry);
            let dest = workdir.join(entry.source_filename());
            // The snapshot publishes digests for source archives only; the
            // store computes the binary's own digest at put time.
            download::fetch_to_file(client, &url, &dest, None).await?;
            let artifact = store.put(&entry.name, &entry.version, &dest)?;
            Ok((BuildStatus::Downloaded, artifact))
        }
        Action::BuildFromSource => {
            let url = source_url(&opts.repo_url, entry);
            let source = workdir.join(entry.source_filename());
            download::fetch_to_file(client, &url, &source, entry.sha256.as_ref()).await?;
            let archive = builder.build(entry, &source, &workdir).await?;
            let artifact = store.put(&entry.name, &entry.version, &archive)?;
            Ok((BuildStatus::Built, artifact))
        }
    }
}

fn binary_url(repo_url: &str, platform: &Platform, entry: &IndexEntry) -> String {
    format!(
        "{}/bin/{}/contrib/{}",
        repo_url.trim_end_matches('/'),
        platform,
        entry.source_filename()
    )
}

fn source_url(repo_url: &str, entry: &IndexEntry) -> String {
    format!("{}/{}", repo_url.trim_end_matches('/'), entry.source_path())
}
