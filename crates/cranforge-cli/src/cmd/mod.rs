//! Command implementations.

pub mod build;
pub mod mirror;
pub mod plan;
pub mod publish;

use anyhow::Result;
use cranforge_core::RunReport;

/// Print the final report in the selected format.
pub(crate) fn output(report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report.render());
    }
    Ok(())
}
