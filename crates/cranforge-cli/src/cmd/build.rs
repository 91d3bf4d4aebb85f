//! Build command: resolve and stage artifacts.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use cranforge_core::RunReport;
use cranforge_core::builder::{PackageBuilder, RCommandBuilder};
use cranforge_core::client::IndexClient;
use cranforge_core::orchestrator::{BuildMode, BuildOptions, BuildResult, Orchestrator};
use cranforge_core::resolver;
use cranforge_core::store::ArtifactStore;
use cranforge_core::paths;
use cranforge_schema::Platform;

use crate::BuildArgs;

/// Resolve the list and settle every package into the staging store.
/// Returns the per-package results alongside the store for the publish
/// stage.
pub async fn run(args: &BuildArgs, home: &Path) -> Result<(Vec<BuildResult>, Arc<ArtifactStore>)> {
    let names = crate::read_package_list(&args.list)?;

    let client = IndexClient::new()?;
    let index = client.fetch_index(&args.repo_url).await?;
    let plan = resolver::resolve(&names, &index)?;
    println!(
        "  resolved {} packages from {} requested",
        plan.len(),
        names.len()
    );

    // Fresh staging per run: the store holds exactly this run's artifacts.
    let store = Arc::new(ArtifactStore::create_fresh(paths::staging_path(home))?);

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling run");
            signal_cancel.cancel();
        }
    });

    let opts = BuildOptions {
        repo_url: args.repo_url.clone(),
        platform: Platform::new(&args.platform),
        mode: if args.build {
            BuildMode::Build
        } else {
            BuildMode::Fetch
        },
        jobs: args.jobs.unwrap_or_else(num_cpus::get),
        work_dir: paths::work_path(home),
        cancel,
    };

    let builder: Arc<dyn PackageBuilder> = Arc::new(RCommandBuilder::new());
    let orchestrator = Orchestrator::new(client.inner().clone(), builder, store.clone(), opts);
    let results = orchestrator.run(&plan).await;

    Ok((results, store))
}

/// `cranforge build`: stage artifacts and report.
pub async fn build(args: &BuildArgs, home: &Path, json: bool) -> Result<i32> {
    let (results, _store) = run(args, home).await?;
    let report = RunReport::new(results);
    super::output(&report, json)?;
    Ok(report.exit_code())
}
