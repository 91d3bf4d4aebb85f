//! Plan command: resolve and print, build nothing.

use std::path::Path;

use anyhow::Result;

use cranforge_core::client::IndexClient;
use cranforge_core::resolver;
use cranforge_schema::PackageName;

/// Resolve the package list against the snapshot and print the
/// dependency-ordered plan with its parallelism layers.
pub async fn plan(list: &Path, repo_url: &str) -> Result<()> {
    let names = crate::read_package_list(list)?;
    tracing::debug!("resolving {} requested packages", names.len());

    let client = IndexClient::new()?;
    let index = client.fetch_index(repo_url).await?;
    let plan = resolver::resolve(&names, &index)?;

    println!("  build plan: {} packages", plan.len());
    for entry in plan.entries() {
        println!("    {} {}", entry.name, entry.version);
    }

    let layers = plan.layers();
    println!("  {} layers", layers.len());
    for (i, layer) in layers.iter().enumerate() {
        let names: Vec<&str> = layer.iter().map(PackageName::as_str).collect();
        println!("    {i}: {}", names.join(", "));
    }

    Ok(())
}
