//! Metric snapshots and the return shapes of the toolchain contract.
//!
//! The orchestration core never computes coverage, complexity or vulnerability
//! numbers itself; it only stores and compares the shapes defined here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Names used in `MetricsSnapshot::unavailable` entries.
pub mod metric {
    pub const COVERAGE: &str = "coverage";
    pub const COMPLEXITY: &str = "complexity";
    pub const SECURITY: &str = "security";
    pub const BUILD: &str = "build";
    pub const DOCUMENTATION: &str = "documentation";
    pub const HISTORY: &str = "history";
}

/// Result of `detect` for one toolchain handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageDetection {
    pub language: String,
    /// 0.0 (no evidence) to 1.0 (certain).
    pub confidence: f64,
    /// Marker files or other evidence that produced the confidence.
    pub evidence: Vec<String>,
}

impl LanguageDetection {
    pub fn none(language: &str) -> Self {
        Self {
            language: language.to_string(),
            confidence: 0.0,
            evidence: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplexityReport {
    pub average: f64,
    pub maximum: f64,
    #[serde(default)]
    pub violation_count: u32,
}

/// Vulnerability counts by severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityReport {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
}

impl SecurityReport {
    pub fn total(&self) -> u32 {
        self.critical + self.high + self.medium + self.low
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildReport {
    pub passed: bool,
    /// Combined stdout/stderr tail, kept for the decision log.
    #[serde(default)]
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    pub framework: String,
    /// Line coverage as a fraction in `0.0..=1.0`.
    pub coverage: f64,
    pub passing: u32,
    pub failing: u32,
}

/// A named numeric snapshot of project health.
///
/// `captured_at == None` marks the empty/default snapshot that exists before
/// assessment has run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    #[serde(default)]
    pub captured_at: Option<DateTime<Utc>>,
    /// Test coverage fraction in `0.0..=1.0`.
    #[serde(default)]
    pub coverage: f64,
    #[serde(default)]
    pub complexity: ComplexityReport,
    #[serde(default)]
    pub vulnerabilities: SecurityReport,
    #[serde(default)]
    pub build_passing: bool,
    /// Fraction of public items documented, when a handler can measure it.
    #[serde(default)]
    pub documentation_coverage: Option<f64>,
    /// Secret-like or oversized blobs found in reachable history.
    #[serde(default)]
    pub history_findings: u32,
    #[serde(default)]
    pub layout_compliant: bool,
    /// Metrics that could not be collected, with the reason.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unavailable: Vec<String>,
}

impl MetricsSnapshot {
    pub fn is_captured(&self) -> bool {
        self.captured_at.is_some()
    }

    /// Whether `name` was collected (not listed in `unavailable`).
    pub fn is_available(&self, name: &str) -> bool {
        !self
            .unavailable
            .iter()
            .any(|entry| entry.split(':').next().map(str::trim) == Some(name))
    }

    pub fn mark_unavailable(&mut self, name: &str, reason: &str) {
        self.unavailable.push(format!("{}: {}", name, reason));
    }
}
