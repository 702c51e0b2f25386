//! Phase definitions for the remediation workflow.
//!
//! This module provides:
//! - `Phase`, the fixed sequence of remediation stages
//! - the explicit transition table (`Phase::successors`)
//! - `TaskSpec` / `TaskAction`, the ordered task plan each phase executes
//! - `plan_for`, which merges the built-in plan with configured extra tasks

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::remedy_config::ExtraTask;

/// One stage of the remediation sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum Phase {
    #[default]
    Assessment,
    Structure,
    Testing,
    Quality,
    Validation,
    Graduated,
}

impl Phase {
    /// Every phase in workflow order.
    pub const ALL: [Phase; 6] = [
        Phase::Assessment,
        Phase::Structure,
        Phase::Testing,
        Phase::Quality,
        Phase::Validation,
        Phase::Graduated,
    ];

    /// Phases a graduated project may fall back to after a regression.
    pub const RE_ENTRY_TARGETS: [Phase; 3] = [Phase::Structure, Phase::Testing, Phase::Quality];

    /// Legal next phases from `self`. The table is total: every phase has an entry.
    pub fn successors(self) -> &'static [Phase] {
        match self {
            Phase::Assessment => &[Phase::Structure],
            Phase::Structure => &[Phase::Testing],
            Phase::Testing => &[Phase::Quality],
            Phase::Quality => &[Phase::Validation],
            Phase::Validation => &[Phase::Graduated],
            Phase::Graduated => &Self::RE_ENTRY_TARGETS,
        }
    }

    pub fn can_transition_to(self, next: Phase) -> bool {
        self.successors().contains(&next)
    }

    /// The phase that must be complete before this one can be entered.
    pub fn predecessor(self) -> Option<Phase> {
        match self {
            Phase::Assessment => None,
            Phase::Structure => Some(Phase::Assessment),
            Phase::Testing => Some(Phase::Structure),
            Phase::Quality => Some(Phase::Testing),
            Phase::Validation => Some(Phase::Quality),
            Phase::Graduated => Some(Phase::Validation),
        }
    }

    /// Lowercase identifier used for file names, timestamp keys and CLI commands.
    pub fn slug(self) -> &'static str {
        match self {
            Phase::Assessment => "assessment",
            Phase::Structure => "structure",
            Phase::Testing => "testing",
            Phase::Quality => "quality",
            Phase::Validation => "validation",
            Phase::Graduated => "graduated",
        }
    }

    /// Position in the workflow order (0-based).
    pub fn index(self) -> usize {
        Self::ALL.iter().position(|p| *p == self).unwrap_or(0)
    }

    /// Phases strictly after `self` in workflow order.
    pub fn later_phases(self) -> impl Iterator<Item = Phase> {
        Self::ALL.into_iter().skip(self.index() + 1)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Assessment => "Assessment",
            Phase::Structure => "Structure",
            Phase::Testing => "Testing",
            Phase::Quality => "Quality",
            Phase::Validation => "Validation",
            Phase::Graduated => "Graduated",
        };
        f.write_str(name)
    }
}

impl FromStr for Phase {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "assessment" | "assess" => Ok(Phase::Assessment),
            "structure" => Ok(Phase::Structure),
            "testing" => Ok(Phase::Testing),
            "quality" => Ok(Phase::Quality),
            "validation" | "validate" => Ok(Phase::Validation),
            "graduated" | "graduate" => Ok(Phase::Graduated),
            _ => anyhow::bail!(
                "Invalid phase '{}'. Valid values: assessment, structure, testing, quality, validation, graduated",
                s
            ),
        }
    }
}

/// What a task does when it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskAction {
    /// Record which toolchain handler matches the project.
    DetectToolchain,
    /// Collect a full metrics snapshot; `baseline` also overwrites the baseline.
    CollectMetrics { baseline: bool },
    /// Create any missing required directories.
    EnsureLayout,
    /// Make sure workflow bookkeeping is git-ignored.
    EnsureGitignore,
    /// Ask the toolchain to bootstrap a test harness.
    BootstrapTests,
    /// Ask the toolchain to install lint/format configuration.
    InstallQualityGates,
    /// Evaluate readiness gates and write a validation report.
    EvaluateGates,
    /// Run an arbitrary command in the project root.
    Run { argv: Vec<String> },
}

impl TaskAction {
    /// Whether this action only reads the project (no commit expected).
    pub fn is_measurement(&self) -> bool {
        matches!(
            self,
            TaskAction::DetectToolchain | TaskAction::CollectMetrics { .. } | TaskAction::EvaluateGates
        )
    }
}

/// A planned unit of work within a phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    pub id: String,
    pub description: String,
    /// Commit category, e.g. `structure`, `test`, `quality`.
    pub category: String,
    pub action: TaskAction,
}

impl TaskSpec {
    pub fn new(id: &str, description: &str, category: &str, action: TaskAction) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
            category: category.to_string(),
            action,
        }
    }
}

/// Built-in task plan for a phase.
pub fn default_plan(phase: Phase) -> Vec<TaskSpec> {
    match phase {
        Phase::Assessment => vec![
            TaskSpec::new(
                "detect-toolchain",
                "Detect project language and toolchain",
                "assess",
                TaskAction::DetectToolchain,
            ),
            TaskSpec::new(
                "capture-baseline",
                "Capture baseline metrics",
                "assess",
                TaskAction::CollectMetrics { baseline: true },
            ),
        ],
        Phase::Structure => vec![
            TaskSpec::new(
                "structure-layout",
                "Create standard directory layout",
                "structure",
                TaskAction::EnsureLayout,
            ),
            TaskSpec::new(
                "structure-gitignore",
                "Ignore workflow bookkeeping files",
                "structure",
                TaskAction::EnsureGitignore,
            ),
        ],
        Phase::Testing => vec![
            TaskSpec::new(
                "testing-bootstrap",
                "Bootstrap test harness",
                "test",
                TaskAction::BootstrapTests,
            ),
            TaskSpec::new(
                "testing-measure",
                "Measure test coverage",
                "test",
                TaskAction::CollectMetrics { baseline: false },
            ),
        ],
        Phase::Quality => vec![
            TaskSpec::new(
                "quality-gates",
                "Install lint and format configuration",
                "quality",
                TaskAction::InstallQualityGates,
            ),
            TaskSpec::new(
                "quality-measure",
                "Measure complexity and vulnerabilities",
                "quality",
                TaskAction::CollectMetrics { baseline: false },
            ),
        ],
        Phase::Validation => vec![
            TaskSpec::new(
                "validation-measure",
                "Collect final metrics",
                "validate",
                TaskAction::CollectMetrics { baseline: false },
            ),
            TaskSpec::new(
                "validation-gates",
                "Evaluate readiness gates",
                "validate",
                TaskAction::EvaluateGates,
            ),
        ],
        Phase::Graduated => Vec::new(),
    }
}

/// Built-in plan for `phase` with configured extra tasks spliced in, in file order.
///
/// Extra tasks go before the run of measurement tasks that ends a phase, so
/// metrics and gate verdicts reflect their changes. Assessment is the
/// exception: its baseline describes the project before any task, so extra
/// tasks run after it.
pub fn plan_for(phase: Phase, extra: &[ExtraTask]) -> Vec<TaskSpec> {
    let mut plan = default_plan(phase);
    let extras: Vec<TaskSpec> = extra
        .iter()
        .filter(|t| t.phase == phase)
        .map(|t| TaskSpec {
            id: t.id.clone(),
            description: t.description.clone(),
            category: t.category.clone(),
            action: TaskAction::Run { argv: t.run.clone() },
        })
        .collect();

    let insert_at = if phase == Phase::Assessment {
        plan.len()
    } else {
        plan.iter()
            .rposition(|t| !t.action.is_measurement())
            .map_or(0, |i| i + 1)
    };
    plan.splice(insert_at..insert_at, extras);
    plan
}
