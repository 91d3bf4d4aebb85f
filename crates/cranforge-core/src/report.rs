//! Final run report.
//!
//! Collects every package's terminal outcome and, when a publish step ran,
//! every artifact's transfer outcome. The text rendering is what CI logs
//! show; the JSON form is stable output for tooling that wants to re-run
//! only the failed subset.

use serde::Serialize;

use crate::orchestrator::{BuildResult, BuildStatus};
use crate::publish::PublishReport;

/// Everything that happened in one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    /// Per-package outcomes, in plan order.
    pub results: Vec<BuildResult>,
    /// Per-artifact publish outcomes, when a publish step ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish: Option<PublishReport>,
}

impl RunReport {
    /// Wrap settled build results.
    pub fn new(results: Vec<BuildResult>) -> Self {
        Self {
            results,
            publish: None,
        }
    }

    /// Attach the publish outcome.
    #[must_use]
    pub fn with_publish(mut self, publish: PublishReport) -> Self {
        self.publish = Some(publish);
        self
    }

    /// Whether every package and every publish transfer succeeded.
    pub fn is_success(&self) -> bool {
        self.results.iter().all(BuildResult::is_ok)
            && self.publish.as_ref().is_none_or(PublishReport::is_success)
    }

    /// Process exit code: non-zero as soon as anything failed or was
    /// skipped.
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.is_success())
    }

    /// Human-readable summary for CI logs.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("  summary\n");

        let mut ok = 0usize;
        let mut failed = 0usize;
        let mut skipped = 0usize;

        for result in &self.results {
            match &result.status {
                BuildStatus::Built => {
                    ok += 1;
                    out.push_str(&format!("    built      {} {}\n", result.name, result.version));
                }
                BuildStatus::Downloaded => {
                    ok += 1;
                    out.push_str(&format!("    downloaded {} {}\n", result.name, result.version));
                }
                BuildStatus::Failed => {
                    failed += 1;
                    let reason = result.error.as_deref().unwrap_or("unknown error");
                    out.push_str(&format!(
                        "    failed     {} {} ({reason})\n",
                        result.name, result.version
                    ));
                }
                BuildStatus::SkippedDueToDependency { failed_dependency } => {
                    skipped += 1;
                    out.push_str(&format!(
                        "    skipped    {} {} (dependency {failed_dependency} failed)\n",
                        result.name, result.version
                    ));
                }
            }
        }

        out.push_str(&format!("  {ok} ok, {failed} failed, {skipped} skipped\n"));

        if let Some(publish) = &self.publish {
            out.push_str(&format!(
                "  publish: {} uploaded, {} already present, {} failed\n",
                publish.uploaded(),
                publish.already_present(),
                publish.failed().len()
            ));
            for name in publish.failed() {
                out.push_str(&format!("    failed     {name}\n"));
            }
        }

        out
    }

    /// Machine-readable report.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails, which the report's types do
    /// not produce in practice.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::{ArtifactReport, PublishOutcome};
    use cranforge_schema::PackageName;

    fn result(name: &str, status: BuildStatus, error: Option<&str>) -> BuildResult {
        BuildResult {
            name: PackageName::new(name),
            version: "1.0".into(),
            status,
            artifact: None,
            error: error.map(String::from),
        }
    }

    #[test]
    fn all_ok_run_exits_zero() {
        let report = RunReport::new(vec![
            result("a", BuildStatus::Downloaded, None),
            result("b", BuildStatus::Built, None),
        ]);
        assert!(report.is_success());
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn any_failure_or_skip_exits_nonzero() {
        let report = RunReport::new(vec![
            result("a", BuildStatus::Downloaded, None),
            result("b", BuildStatus::Failed, Some("compile error")),
            result(
                "c",
                BuildStatus::SkippedDueToDependency {
                    failed_dependency: PackageName::new("b"),
                },
                None,
            ),
        ]);
        assert_eq!(report.exit_code(), 1);

        let text = report.render();
        assert!(text.contains("failed     b 1.0 (compile error)"));
        assert!(text.contains("skipped    c 1.0 (dependency b failed)"));
        assert!(text.contains("1 ok, 1 failed, 1 skipped"));
    }

    #[test]
    fn partial_publish_exits_nonzero() {
        let publish = PublishReport {
            artifacts: vec![
                ArtifactReport {
                    filename: "a_1.0.tar.gz".to_string(),
                    outcome: PublishOutcome::Uploaded,
                },
                ArtifactReport {
                    filename: "b_1.0.tar.gz".to_string(),
                    outcome: PublishOutcome::Failed {
                        error: "simulated drop".to_string(),
                    },
                },
            ],
        };
        let report =
            RunReport::new(vec![result("a", BuildStatus::Downloaded, None)]).with_publish(publish);

        assert_eq!(report.exit_code(), 1);
        assert!(report.render().contains("1 uploaded, 0 already present, 1 failed"));
    }

    #[test]
    fn json_report_carries_statuses() {
        let report = RunReport::new(vec![result("a", BuildStatus::Built, None)]);
        let json: serde_json::Value =
            serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["results"][0]["status"], "built");
        assert_eq!(json["results"][0]["name"], "a");
    }
}
