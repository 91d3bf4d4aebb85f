//! Mirror command: the full pipeline in one run.

use std::path::Path;

use anyhow::Result;

use cranforge_core::RunReport;
use cranforge_core::publish::{self, PublishError, PublishManifest};

use crate::{BuildArgs, PublishArgs};

/// `cranforge mirror`: resolve, build or fetch, then publish whatever
/// settled successfully. Build failures never block publishing the healthy
/// subset; they surface in the report and the exit code instead.
pub async fn mirror(
    build_args: &BuildArgs,
    publish_args: &PublishArgs,
    home: &Path,
    json: bool,
) -> Result<i32> {
    let (results, _store) = super::build::run(build_args, home).await?;

    // Only settled Built/Downloaded packages make the manifest.
    let manifest = PublishManifest::new(
        results
            .iter()
            .filter_map(|r| r.artifact.clone())
            .collect(),
    );

    let mut report = RunReport::new(results);

    if manifest.is_empty() {
        println!("  nothing to publish");
    } else {
        println!(
            "  publishing {} artifacts to {}",
            manifest.len(),
            publish_args.dest
        );
        let transport = super::publish::make_transport(publish_args)?;
        match publish::publish(&manifest, transport.as_ref()).await {
            Ok(publish_report) => report = report.with_publish(publish_report),
            Err(PublishError::Partial {
                report: publish_report,
            }) => report = report.with_publish(publish_report),
            Err(e) => return Err(e.into()),
        }
    }

    super::output(&report, json)?;
    Ok(report.exit_code())
}
