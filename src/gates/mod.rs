//! Readiness gates evaluated before a project may graduate.
//!
//! Gates are recomputed from a `MetricsSnapshot` on every evaluation; only the
//! JSON snapshot written into a report is ever persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::metrics::{MetricsSnapshot, metric};
use crate::remedy_config::{RemedyToml, Waiver};

pub const COVERAGE: &str = "coverage";
pub const AVERAGE_COMPLEXITY: &str = "average_complexity";
pub const CRITICAL_VULNERABILITIES: &str = "critical_vulnerabilities";
pub const BUILD_PASSING: &str = "build_passing";
pub const DOCUMENTATION_COVERAGE: &str = "documentation_coverage";
pub const HISTORY_HYGIENE: &str = "history_hygiene";
pub const LAYOUT_COMPLIANT: &str = "layout_compliant";

/// Every gate, in evaluation order.
pub const GATE_NAMES: [&str; 7] = [
    COVERAGE,
    AVERAGE_COMPLEXITY,
    CRITICAL_VULNERABILITIES,
    BUILD_PASSING,
    DOCUMENTATION_COVERAGE,
    HISTORY_HYGIENE,
    LAYOUT_COMPLIANT,
];

/// How a gate compares its current value with the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDirection {
    AtLeast,
    Below,
    AtMost,
}

impl GateDirection {
    pub fn satisfied(self, value: f64, threshold: f64) -> bool {
        match self {
            GateDirection::AtLeast => value >= threshold,
            GateDirection::Below => value < threshold,
            GateDirection::AtMost => value <= threshold,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            GateDirection::AtLeast => ">=",
            GateDirection::Below => "<",
            GateDirection::AtMost => "<=",
        }
    }
}

/// Reads the value a gate checks out of a snapshot. `None` means the
/// collaborator could not measure it.
pub type Measure = fn(&MetricsSnapshot) -> Option<f64>;

#[derive(Clone, Copy)]
pub struct GateDefinition {
    pub name: &'static str,
    pub direction: GateDirection,
    pub threshold: f64,
    pub measure: Measure,
}

impl fmt::Debug for GateDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GateDefinition")
            .field("name", &self.name)
            .field("direction", &self.direction)
            .field("threshold", &self.threshold)
            .finish()
    }
}

fn flag(value: bool) -> f64 {
    if value { 1.0 } else { 0.0 }
}

fn available(snapshot: &MetricsSnapshot, name: &str, value: f64) -> Option<f64> {
    (snapshot.is_captured() && snapshot.is_available(name)).then_some(value)
}

/// The fixed gate list with thresholds taken from configuration.
pub fn standard_gates(toml: &RemedyToml) -> Vec<GateDefinition> {
    let t = &toml.thresholds;
    vec![
        GateDefinition {
            name: COVERAGE,
            direction: GateDirection::AtLeast,
            threshold: t.min_coverage,
            measure: |m| available(m, metric::COVERAGE, m.coverage),
        },
        GateDefinition {
            name: AVERAGE_COMPLEXITY,
            direction: GateDirection::Below,
            threshold: t.max_average_complexity,
            measure: |m| available(m, metric::COMPLEXITY, m.complexity.average),
        },
        GateDefinition {
            name: CRITICAL_VULNERABILITIES,
            direction: GateDirection::AtMost,
            threshold: t.max_critical_vulnerabilities as f64,
            measure: |m| available(m, metric::SECURITY, m.vulnerabilities.critical as f64),
        },
        GateDefinition {
            name: BUILD_PASSING,
            direction: GateDirection::AtLeast,
            threshold: 1.0,
            measure: |m| available(m, metric::BUILD, flag(m.build_passing)),
        },
        GateDefinition {
            name: DOCUMENTATION_COVERAGE,
            direction: GateDirection::AtLeast,
            threshold: t.min_documentation_coverage,
            measure: |m| {
                m.documentation_coverage
                    .and_then(|v| available(m, metric::DOCUMENTATION, v))
            },
        },
        GateDefinition {
            name: HISTORY_HYGIENE,
            direction: GateDirection::AtMost,
            threshold: 0.0,
            measure: |m| available(m, metric::HISTORY, m.history_findings as f64),
        },
        GateDefinition {
            name: LAYOUT_COMPLIANT,
            direction: GateDirection::AtLeast,
            threshold: 1.0,
            measure: |m| m.is_captured().then_some(flag(m.layout_compliant)),
        },
    ]
}

/// Result of evaluating one gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessGate {
    pub name: String,
    pub direction: GateDirection,
    pub threshold: f64,
    /// `None` when the metric could not be measured; such a gate fails.
    pub current_value: Option<f64>,
    pub passed: bool,
    /// Documented waivers. They never change `passed`.
    #[serde(default)]
    pub exception_conditions: Vec<String>,
}

impl ReadinessGate {
    pub fn is_waived(&self) -> bool {
        !self.passed && !self.exception_conditions.is_empty()
    }

    /// The specific shortfall for a failing gate.
    pub fn gap(&self) -> String {
        let Some(value) = self.current_value else {
            return format!(
                "{}: not measured (requires {} {})",
                self.name,
                self.direction.symbol(),
                self.threshold
            );
        };
        format!(
            "{}: {} is not {} {} (off by {:.2})",
            self.name,
            format_value(value),
            self.direction.symbol(),
            format_value(self.threshold),
            (value - self.threshold).abs()
        )
    }
}

pub fn format_value(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value)
    } else {
        format!("{:.2}", value)
    }
}

/// All gates from one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateReport {
    pub evaluated_at: DateTime<Utc>,
    pub gates: Vec<ReadinessGate>,
}

impl GateReport {
    /// Every gate passed on its own merits.
    pub fn is_ready(&self) -> bool {
        self.gates.iter().all(|g| g.passed)
    }

    /// Every gate passed or carries an explicit waiver.
    pub fn is_ready_with_waivers(&self) -> bool {
        self.gates.iter().all(|g| g.passed || g.is_waived())
    }

    pub fn failed(&self) -> impl Iterator<Item = &ReadinessGate> {
        self.gates.iter().filter(|g| !g.passed)
    }

    pub fn waived(&self) -> impl Iterator<Item = &ReadinessGate> {
        self.gates.iter().filter(|g| g.is_waived())
    }

    /// Gap descriptions for failing gates without a waiver.
    pub fn blocking_failures(&self) -> Vec<String> {
        self.failed()
            .filter(|g| !g.is_waived())
            .map(ReadinessGate::gap)
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&ReadinessGate> {
        self.gates.iter().find(|g| g.name == name)
    }
}

pub struct GateEvaluator {
    definitions: Vec<GateDefinition>,
    waivers: Vec<Waiver>,
}

impl GateEvaluator {
    pub fn new(definitions: Vec<GateDefinition>, waivers: Vec<Waiver>) -> Self {
        Self {
            definitions,
            waivers,
        }
    }

    pub fn from_config(toml: &RemedyToml) -> Self {
        Self::new(standard_gates(toml), toml.gates.waivers.clone())
    }

    /// Evaluate every gate. Never stops at the first failure.
    pub fn evaluate_all(&self, metrics: &MetricsSnapshot) -> GateReport {
        let gates = self
            .definitions
            .iter()
            .map(|def| {
                let current_value = (def.measure)(metrics);
                let passed = current_value
                    .map(|v| def.direction.satisfied(v, def.threshold))
                    .unwrap_or(false);
                let exception_conditions = self
                    .waivers
                    .iter()
                    .filter(|w| w.gate == def.name)
                    .map(|w| match &w.approved_by {
                        Some(by) => format!("{} (approved by {})", w.reason, by),
                        None => w.reason.clone(),
                    })
                    .collect();
                ReadinessGate {
                    name: def.name.to_string(),
                    direction: def.direction,
                    threshold: def.threshold,
                    current_value,
                    passed,
                    exception_conditions,
                }
            })
            .collect();

        GateReport {
            evaluated_at: Utc::now(),
            gates,
        }
    }
}
