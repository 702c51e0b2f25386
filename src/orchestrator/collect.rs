//! Metrics collection for one snapshot.
//!
//! Toolchain-backed metrics come from the selected handler. Layout compliance
//! and history hygiene are computed here from the filesystem and git. A metric
//! whose tool is unavailable is listed in `MetricsSnapshot::unavailable`;
//! any other tool error aborts the collection.

use chrono::Utc;
use std::path::Path;

use crate::errors::{ToolError, WorkflowError};
use crate::metrics::{MetricsSnapshot, metric};
use crate::remedy_config::RemedyToml;
use crate::toolchain::Toolchain;
use crate::tracker::GitTracker;

pub struct MetricsCollector<'a> {
    root: &'a Path,
    toml: &'a RemedyToml,
    toolchain: Option<&'a dyn Toolchain>,
}

impl<'a> MetricsCollector<'a> {
    pub fn new(root: &'a Path, toml: &'a RemedyToml, toolchain: Option<&'a dyn Toolchain>) -> Self {
        Self {
            root,
            toml,
            toolchain,
        }
    }

    pub async fn collect(&self) -> Result<MetricsSnapshot, WorkflowError> {
        let mut snapshot = MetricsSnapshot {
            captured_at: Some(Utc::now()),
            ..Default::default()
        };

        match self.toolchain {
            Some(toolchain) => self.collect_from(toolchain, &mut snapshot).await?,
            None => {
                for name in [
                    metric::COVERAGE,
                    metric::COMPLEXITY,
                    metric::SECURITY,
                    metric::BUILD,
                    metric::DOCUMENTATION,
                ] {
                    snapshot.mark_unavailable(name, "no toolchain detected");
                }
            }
        }

        snapshot.layout_compliant = missing_dirs(self.root, &self.toml.layout.required_dirs).is_empty();

        match GitTracker::open(self.root)
            .and_then(|git| git.history_findings(self.toml.thresholds.max_blob_bytes))
        {
            Ok(findings) => {
                for finding in &findings {
                    tracing::warn!(
                        path = %finding.path,
                        commit = %finding.commit,
                        "History finding: {}",
                        finding.reason
                    );
                }
                snapshot.history_findings = findings.len() as u32;
            }
            Err(e) => snapshot.mark_unavailable(metric::HISTORY, &e.to_string()),
        }

        tracing::info!(
            coverage = snapshot.coverage,
            complexity = snapshot.complexity.average,
            critical = snapshot.vulnerabilities.critical,
            build_passing = snapshot.build_passing,
            unavailable = snapshot.unavailable.len(),
            "Collected metrics"
        );
        Ok(snapshot)
    }

    async fn collect_from(
        &self,
        toolchain: &dyn Toolchain,
        snapshot: &mut MetricsSnapshot,
    ) -> Result<(), WorkflowError> {
        if let Some(report) = available(toolchain.run_tests(self.root).await, metric::COVERAGE, snapshot)? {
            snapshot.coverage = report.coverage;
        }
        if let Some(report) =
            available(toolchain.measure_complexity(self.root).await, metric::COMPLEXITY, snapshot)?
        {
            snapshot.complexity = report;
        }
        if let Some(report) = available(toolchain.scan_security(self.root).await, metric::SECURITY, snapshot)? {
            snapshot.vulnerabilities = report;
        }
        if let Some(report) = available(toolchain.verify_build(self.root).await, metric::BUILD, snapshot)? {
            snapshot.build_passing = report.passed;
        }
        snapshot.documentation_coverage = available(
            toolchain.measure_documentation(self.root).await,
            metric::DOCUMENTATION,
            snapshot,
        )?;
        Ok(())
    }
}

/// `Ok(None)` and a note in the snapshot when the tool is unavailable.
fn available<T>(
    result: Result<T, ToolError>,
    name: &str,
    snapshot: &mut MetricsSnapshot,
) -> Result<Option<T>, WorkflowError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ToolError::Unavailable { tool, reason }) => {
            tracing::warn!(metric = name, tool = %tool, "Metric unavailable: {}", reason);
            snapshot.mark_unavailable(name, &format!("{} ({})", reason, tool));
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Required directories that do not exist under `root`.
pub fn missing_dirs<'d>(root: &Path, required: &'d [String]) -> Vec<&'d str> {
    required
        .iter()
        .filter(|dir| !root.join(dir.as_str()).is_dir())
        .map(String::as_str)
        .collect()
}
