//! Publish command: push the staged store to the destination.

use std::path::Path;

use anyhow::{Result, bail};

use cranforge_core::RunReport;
use cranforge_core::publish::{self, PublishError, PublishManifest};
use cranforge_core::store::ArtifactStore;
use cranforge_core::transport::{Destination, SshAuth, Transport};

use crate::PublishArgs;

/// Build the transport for the destination spec and provisioned
/// credentials.
pub fn make_transport(args: &PublishArgs) -> Result<Box<dyn Transport>> {
    let destination = Destination::parse(&args.dest)?;
    Ok(destination.into_transport(SshAuth {
        identity: args.identity.clone(),
        known_hosts: args.known_hosts.clone(),
    }))
}

/// `cranforge publish`: push everything a previous `build` staged.
pub async fn publish(args: &PublishArgs, home: &Path, json: bool) -> Result<i32> {
    let store = ArtifactStore::open(cranforge_core::paths::staging_path(home))?;
    let manifest = PublishManifest::new(store.list());
    if manifest.is_empty() {
        bail!("nothing staged to publish; run `cranforge build` first");
    }
    println!("  publishing {} artifacts to {}", manifest.len(), args.dest);

    let transport = make_transport(args)?;
    let report = match publish::publish(&manifest, transport.as_ref()).await {
        Ok(report) => RunReport::default().with_publish(report),
        Err(PublishError::Partial { report }) => RunReport::default().with_publish(report),
        // Auth and destination failures abort with nothing useful to report.
        Err(e) => return Err(e.into()),
    };

    super::output(&report, json)?;
    Ok(report.exit_code())
}
