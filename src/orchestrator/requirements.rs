//! Named entry requirements for each phase.
//!
//! A requirement is a pure predicate over the workflow state and the
//! configuration. When it is unmet it says exactly what is missing.

use super::state::{ENTERED, WorkflowState};
use crate::gates::{self, GateEvaluator};
use crate::metrics::metric;
use crate::phase::Phase;
use crate::remedy_config::RemedyToml;

pub type Check = fn(&WorkflowState, &RemedyToml, Phase) -> Result<(), String>;

#[derive(Clone, Copy)]
pub struct Requirement {
    pub name: &'static str,
    check: Check,
}

impl std::fmt::Debug for Requirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Requirement").field(&self.name).finish()
    }
}

impl Requirement {
    /// `Err` carries the specific unmet condition.
    pub fn evaluate(&self, state: &WorkflowState, toml: &RemedyToml, target: Phase) -> Result<(), String> {
        (self.check)(state, toml, target)
    }
}

const PRIOR_PHASE_COMPLETE: Requirement = Requirement {
    name: "prior phase complete",
    check: |state, _, target| match target.predecessor() {
        Some(prior) if !state.is_phase_complete(prior) => {
            Err(format!("prior phase not complete: {} has not finished", prior))
        }
        _ => Ok(()),
    },
};

const BASELINE_CAPTURED: Requirement = Requirement {
    name: "baseline metrics captured",
    check: |state, _, _| {
        if state.baseline_metrics.is_captured() {
            Ok(())
        } else {
            Err("baseline metrics not captured; run 'remedy assess'".to_string())
        }
    },
};

const TOOLCHAIN_SELECTED: Requirement = Requirement {
    name: "toolchain detected",
    check: |state, toml, _| {
        if state.toolchain.is_some() || toml.forced_toolchain().is_some() {
            Ok(())
        } else {
            Err("no toolchain detected; set [project].toolchain in remedy.toml".to_string())
        }
    },
};

const COVERAGE_AT_MINIMUM: Requirement = Requirement {
    name: "coverage at configured minimum",
    check: |state, toml, _| {
        if toml.waiver_for(gates::COVERAGE).is_some() {
            return Ok(());
        }
        let minimum = toml.thresholds.min_coverage;
        let metrics = &state.current_metrics;
        if !metrics.is_captured() || !metrics.is_available(metric::COVERAGE) {
            return Err(format!(
                "coverage not measured (requires >= {:.2}); configure [toolchain.commands].tests",
                minimum
            ));
        }
        if metrics.coverage >= minimum {
            Ok(())
        } else {
            Err(format!(
                "coverage {:.2} is below the configured minimum {:.2}",
                metrics.coverage, minimum
            ))
        }
    },
};

const BUILD_PASSING: Requirement = Requirement {
    name: "build passing",
    check: |state, toml, _| {
        if toml.waiver_for(gates::BUILD_PASSING).is_some() {
            return Ok(());
        }
        let metrics = &state.current_metrics;
        if !metrics.is_captured() || !metrics.is_available(metric::BUILD) {
            Err("build status not measured".to_string())
        } else if metrics.build_passing {
            Ok(())
        } else {
            Err("build is failing".to_string())
        }
    },
};

const GATES_PASSING: Requirement = Requirement {
    name: "readiness gates pass",
    check: |state, toml, _| {
        let report = GateEvaluator::from_config(toml).evaluate_all(&state.current_metrics);
        if report.is_ready_with_waivers() {
            Ok(())
        } else {
            Err(format!(
                "readiness gates failing: {}",
                report.blocking_failures().join("; ")
            ))
        }
    },
};

const REGRESSION_RECORDED: Requirement = Requirement {
    name: "regression recorded since graduation",
    check: |state, _, _| {
        let graduated_at = state.timestamp(Phase::Graduated, ENTERED);
        let recorded = state
            .latest_re_entry()
            .is_some_and(|event| graduated_at.is_none_or(|at| event.detected_at >= at));
        if recorded {
            Ok(())
        } else {
            Err("no regression recorded since graduation; run 'remedy monitor'".to_string())
        }
    },
};

/// Requirements for moving from `from` into `to`.
///
/// Re-entering a remediation phase from `Graduated` only needs a recorded
/// regression; the normal entry requirements were met on the way up.
pub fn requirements_for(from: Phase, to: Phase) -> Vec<Requirement> {
    if from == Phase::Graduated {
        return vec![REGRESSION_RECORDED];
    }
    match to {
        Phase::Assessment => Vec::new(),
        Phase::Structure => vec![PRIOR_PHASE_COMPLETE, BASELINE_CAPTURED],
        Phase::Testing => vec![PRIOR_PHASE_COMPLETE, TOOLCHAIN_SELECTED],
        Phase::Quality => vec![PRIOR_PHASE_COMPLETE, COVERAGE_AT_MINIMUM],
        Phase::Validation => vec![PRIOR_PHASE_COMPLETE, BUILD_PASSING],
        Phase::Graduated => vec![PRIOR_PHASE_COMPLETE, GATES_PASSING],
    }
}

/// Every unmet requirement for `from -> to`, as explicit messages.
pub fn unmet(state: &WorkflowState, toml: &RemedyToml, from: Phase, to: Phase) -> Vec<String> {
    requirements_for(from, to)
        .iter()
        .filter_map(|r| r.evaluate(state, toml, to).err())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsSnapshot;
    use crate::remedy_config::Waiver;
    use chrono::{Duration, Utc};

    fn captured(coverage: f64) -> MetricsSnapshot {
        MetricsSnapshot {
            captured_at: Some(Utc::now()),
            coverage,
            build_passing: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_structure_requires_assessment_and_baseline() {
        let state = WorkflowState::default();
        let unmet = unmet(&state, &RemedyToml::default(), Phase::Assessment, Phase::Structure);
        assert_eq!(unmet.len(), 2);
        assert!(unmet[0].contains("prior phase not complete"));
        assert!(unmet[1].contains("baseline metrics not captured"));
    }

    #[test]
    fn test_quality_reports_coverage_gap() {
        let mut state = WorkflowState::default();
        state.mark_complete(Phase::Testing);
        state.current_metrics = captured(0.42);

        let unmet = unmet(&state, &RemedyToml::default(), Phase::Testing, Phase::Quality);

        assert_eq!(unmet, vec!["coverage 0.42 is below the configured minimum 0.60"]);
    }

    #[test]
    fn test_waived_coverage_satisfies_quality_entry() {
        let mut state = WorkflowState::default();
        state.mark_complete(Phase::Testing);
        state.current_metrics = captured(0.10);
        let mut toml = RemedyToml::default();
        toml.gates.waivers.push(Waiver {
            gate: gates::COVERAGE.to_string(),
            reason: "legacy module".to_string(),
            approved_by: None,
        });

        assert!(unmet(&state, &toml, Phase::Testing, Phase::Quality).is_empty());
    }

    #[test]
    fn test_unmeasured_build_blocks_validation() {
        let mut state = WorkflowState::default();
        state.mark_complete(Phase::Quality);
        state.current_metrics = captured(0.9);
        state.current_metrics.mark_unavailable(metric::BUILD, "no toolchain detected");

        let unmet = unmet(&state, &RemedyToml::default(), Phase::Quality, Phase::Validation);
        assert_eq!(unmet, vec!["build status not measured"]);
    }

    #[test]
    fn test_reentry_needs_regression_after_graduation() {
        let mut state = WorkflowState::default();
        let graduated_at = Utc::now();
        state.stamp(Phase::Graduated, ENTERED, graduated_at);

        let unmet_now = unmet(&state, &RemedyToml::default(), Phase::Graduated, Phase::Testing);
        assert!(unmet_now[0].contains("no regression recorded"));

        let detector = crate::regression::RegressionDetector::default();
        let baseline = captured(0.65);
        let mut event = detector.detect(&baseline, &captured(0.45)).unwrap();
        event.detected_at = graduated_at + Duration::seconds(5);
        state.re_entry_events.push(event);

        assert!(unmet(&state, &RemedyToml::default(), Phase::Graduated, Phase::Testing).is_empty());
    }
}
