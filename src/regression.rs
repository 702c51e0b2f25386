//! Post-graduation regression detection.
//!
//! Compares a freshly collected snapshot against the graduation baseline and
//! produces a `ReEntryEvent` recommending which phase to re-enter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::metrics::{MetricsSnapshot, metric};
use crate::phase::Phase;
use crate::remedy_config::RemedyToml;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegressionTrigger {
    CoverageDrop,
    ComplexityIncrease,
    SecurityBreach,
    BuildBroken,
}

impl RegressionTrigger {
    /// Higher is more severe.
    fn severity(self) -> u8 {
        match self {
            RegressionTrigger::SecurityBreach => 4,
            RegressionTrigger::BuildBroken => 3,
            RegressionTrigger::CoverageDrop => 2,
            RegressionTrigger::ComplexityIncrease => 1,
        }
    }

    pub fn recommended_phase(self) -> Phase {
        match self {
            RegressionTrigger::CoverageDrop => Phase::Testing,
            RegressionTrigger::ComplexityIncrease | RegressionTrigger::SecurityBreach => {
                Phase::Quality
            }
            RegressionTrigger::BuildBroken => Phase::Structure,
        }
    }
}

impl fmt::Display for RegressionTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegressionTrigger::CoverageDrop => "coverage-drop",
            RegressionTrigger::ComplexityIncrease => "complexity-increase",
            RegressionTrigger::SecurityBreach => "security-breach",
            RegressionTrigger::BuildBroken => "build-broken",
        };
        f.write_str(name)
    }
}

/// A detected regression. Appended to the workflow state and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReEntryEvent {
    pub detected_at: DateTime<Utc>,
    pub trigger: RegressionTrigger,
    pub baseline_value: f64,
    pub current_value: f64,
    pub threshold_breached: f64,
    pub recommended_phase: Phase,
}

impl ReEntryEvent {
    fn new(trigger: RegressionTrigger, baseline_value: f64, current_value: f64, threshold: f64) -> Self {
        Self {
            detected_at: Utc::now(),
            trigger,
            baseline_value,
            current_value,
            threshold_breached: threshold,
            recommended_phase: trigger.recommended_phase(),
        }
    }

    pub fn describe(&self) -> String {
        format!(
            "{}: baseline {:.2}, now {:.2} (limit {:.2}) -> re-enter {}",
            self.trigger,
            self.baseline_value,
            self.current_value,
            self.threshold_breached,
            self.recommended_phase
        )
    }
}

/// Fixed regression thresholds, resolved from configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegressionDetector {
    pub min_coverage: f64,
    pub coverage_drop_points: f64,
    pub complexity_increase_ratio: f64,
}

impl Default for RegressionDetector {
    fn default() -> Self {
        Self::from_config(&RemedyToml::default())
    }
}

impl RegressionDetector {
    pub fn from_config(toml: &RemedyToml) -> Self {
        Self {
            min_coverage: toml.thresholds.min_coverage,
            coverage_drop_points: toml.regression.coverage_drop_points,
            complexity_increase_ratio: toml.regression.complexity_increase_ratio,
        }
    }

    /// Every breach between `baseline` and `current`, most severe first.
    pub fn detect_all(&self, baseline: &MetricsSnapshot, current: &MetricsSnapshot) -> Vec<ReEntryEvent> {
        let mut events = Vec::new();

        if current.is_available(metric::SECURITY)
            && current.vulnerabilities.critical > baseline.vulnerabilities.critical
        {
            events.push(ReEntryEvent::new(
                RegressionTrigger::SecurityBreach,
                baseline.vulnerabilities.critical as f64,
                current.vulnerabilities.critical as f64,
                baseline.vulnerabilities.critical as f64,
            ));
        }

        if current.is_available(metric::BUILD) && !current.build_passing {
            events.push(ReEntryEvent::new(
                RegressionTrigger::BuildBroken,
                if baseline.build_passing { 1.0 } else { 0.0 },
                0.0,
                1.0,
            ));
        }

        let coverage_floor = self.min_coverage - self.coverage_drop_points;
        if current.is_available(metric::COVERAGE) && current.coverage < coverage_floor {
            events.push(ReEntryEvent::new(
                RegressionTrigger::CoverageDrop,
                baseline.coverage,
                current.coverage,
                coverage_floor,
            ));
        }

        let base_avg = baseline.complexity.average;
        if current.is_available(metric::COMPLEXITY) && base_avg > 0.0 {
            let ceiling = base_avg * (1.0 + self.complexity_increase_ratio);
            if current.complexity.average > ceiling {
                events.push(ReEntryEvent::new(
                    RegressionTrigger::ComplexityIncrease,
                    base_avg,
                    current.complexity.average,
                    ceiling,
                ));
            }
        }

        events.sort_by(|a, b| b.trigger.severity().cmp(&a.trigger.severity()));
        events
    }

    /// The most severe breach, if any.
    pub fn detect(&self, baseline: &MetricsSnapshot, current: &MetricsSnapshot) -> Option<ReEntryEvent> {
        self.detect_all(baseline, current).into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{ComplexityReport, SecurityReport};

    fn healthy() -> MetricsSnapshot {
        MetricsSnapshot {
            captured_at: Some(Utc::now()),
            coverage: 0.65,
            complexity: ComplexityReport {
                average: 5.0,
                maximum: 12.0,
                violation_count: 0,
            },
            vulnerabilities: SecurityReport::default(),
            build_passing: true,
            documentation_coverage: Some(0.6),
            history_findings: 0,
            layout_compliant: true,
            unavailable: Vec::new(),
        }
    }

    #[test]
    fn test_no_regression_for_identical_snapshots() {
        let detector = RegressionDetector::default();
        assert!(detector.detect(&healthy(), &healthy()).is_none());
    }

    #[test]
    fn test_coverage_drop_recommends_testing() {
        let detector = RegressionDetector::default();
        let mut current = healthy();
        current.coverage = 0.45;

        let event = detector.detect(&healthy(), &current).unwrap();

        assert_eq!(event.trigger, RegressionTrigger::CoverageDrop);
        assert_eq!(event.recommended_phase, Phase::Testing);
        assert_eq!(event.baseline_value, 0.65);
        assert_eq!(event.current_value, 0.45);
        assert!((event.threshold_breached - 0.50).abs() < 1e-9);
    }

    #[test]
    fn test_small_coverage_dip_is_tolerated() {
        let detector = RegressionDetector::default();
        let mut current = healthy();
        current.coverage = 0.55;
        assert!(detector.detect(&healthy(), &current).is_none());
    }

    #[test]
    fn test_complexity_increase_over_twenty_percent() {
        let detector = RegressionDetector::default();
        let mut current = healthy();
        current.complexity.average = 6.0;
        assert!(detector.detect(&healthy(), &current).is_none());

        current.complexity.average = 6.5;
        let event = detector.detect(&healthy(), &current).unwrap();
        assert_eq!(event.trigger, RegressionTrigger::ComplexityIncrease);
        assert_eq!(event.recommended_phase, Phase::Quality);
    }

    #[test]
    fn test_new_critical_vulnerability_is_most_severe() {
        let detector = RegressionDetector::default();
        let mut current = healthy();
        current.coverage = 0.1;
        current.vulnerabilities.critical = 1;

        let all = detector.detect_all(&healthy(), &current);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].trigger, RegressionTrigger::SecurityBreach);
        assert_eq!(
            detector.detect(&healthy(), &current).unwrap().trigger,
            RegressionTrigger::SecurityBreach
        );
    }

    #[test]
    fn test_broken_build_recommends_structure() {
        let detector = RegressionDetector::default();
        let mut current = healthy();
        current.build_passing = false;
        let event = detector.detect(&healthy(), &current).unwrap();
        assert_eq!(event.trigger, RegressionTrigger::BuildBroken);
        assert_eq!(event.recommended_phase, Phase::Structure);
    }

    #[test]
    fn test_unavailable_metrics_never_trigger() {
        let detector = RegressionDetector::default();
        let mut current = healthy();
        current.coverage = 0.0;
        current.unavailable.push("coverage: pytest not installed".into());
        assert!(detector.detect(&healthy(), &current).is_none());
    }

    #[test]
    fn test_trigger_serializes_kebab_case() {
        let json = serde_json::to_string(&RegressionTrigger::CoverageDrop).unwrap();
        assert_eq!(json, "\"coverage-drop\"");
        assert_eq!(RegressionTrigger::SecurityBreach.to_string(), "security-breach");
    }
}
