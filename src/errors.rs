//! Typed error hierarchy for the remediation workflow.
//!
//! Two enums cover the two layers:
//! - `WorkflowError`: everything the orchestration core surfaces to a command
//! - `ToolError`: failures reported by a toolchain handler or subprocess
//!
//! `WorkflowError::exit_code` is the single place that maps failures onto the
//! process exit-code family consumed by callers.

use std::path::PathBuf;
use thiserror::Error;

use crate::phase::Phase;

/// Exit code for a successful command.
pub const EXIT_OK: i32 = 0;
/// Exit code for precondition or validation failures.
pub const EXIT_PRECONDITION: i32 = 1;
/// Exit code for configuration errors.
pub const EXIT_CONFIG: i32 = 2;
/// Exit code for external tool failures.
pub const EXIT_TOOL: i32 = 3;
/// Exit code for a run stopped by a signal after its checkpoint was saved.
pub const EXIT_INTERRUPTED: i32 = 130;

/// Errors surfaced by the orchestration core.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Cannot move from {from} to {to}: {reason}")]
    PhaseTransitionRejected {
        from: Phase,
        to: Phase,
        reason: String,
    },

    #[error("{} readiness gate(s) failed: {}", failures.len(), failures.join("; "))]
    GateFailed { failures: Vec<String> },

    #[error("Task {task_id} broke the build and was reverted: {output}")]
    BuildVerificationFailed { task_id: String, output: String },

    #[error(
        "Workflow file {path} is unreadable ({message}){}",
        backup.as_ref().map(|b| format!("; a copy was saved to {}", b.display())).unwrap_or_default()
    )]
    CheckpointCorrupted {
        path: PathBuf,
        /// `None` when nothing was written, e.g. on read-only commands.
        backup: Option<PathBuf>,
        message: String,
    },

    #[error("Tool '{tool}' is unavailable: {reason}")]
    ToolUnavailable { tool: String, reason: String },

    #[error("Tool '{tool}' failed: {message}")]
    ToolFailure { tool: String, message: String },

    /// The build check could not run after a commit; the commit was kept and
    /// must be verified before the task counts as done.
    #[error("Build check '{tool}' did not finish ({message}); commit {} was kept unverified", &commit_ref[..commit_ref.len().min(8)])]
    UnverifiedCommit {
        tool: String,
        commit_ref: String,
        message: String,
    },

    #[error("Regression detected ({trigger}); re-enter the {recommended} phase")]
    RegressionDetected { trigger: String, recommended: Phase },

    #[error("Phase {phase} is incomplete: {failed} task(s) failed ({})", task_ids.join(", "))]
    PhaseIncomplete {
        phase: Phase,
        failed: usize,
        task_ids: Vec<String>,
    },

    #[error("Project has not graduated (current phase: {phase}); nothing to monitor yet")]
    NotGraduated { phase: Phase },

    #[error("Another run holds the project lock at {path} ({holder})")]
    LockHeld { path: PathBuf, holder: String },

    #[error("Working tree has uncommitted changes: {}", paths.join(", "))]
    DirtyWorktree { paths: Vec<String> },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Run interrupted during {phase}; checkpoint saved, run 'remedy resume' to continue")]
    Interrupted { phase: Phase },

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl WorkflowError {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        WorkflowError::Io {
            path: path.into(),
            source,
        }
    }

    /// Exit code for this failure class.
    pub fn exit_code(&self) -> i32 {
        match self {
            WorkflowError::PhaseTransitionRejected { .. }
            | WorkflowError::GateFailed { .. }
            | WorkflowError::BuildVerificationFailed { .. }
            | WorkflowError::CheckpointCorrupted { .. }
            | WorkflowError::RegressionDetected { .. }
            | WorkflowError::PhaseIncomplete { .. }
            | WorkflowError::NotGraduated { .. }
            | WorkflowError::LockHeld { .. }
            | WorkflowError::DirtyWorktree { .. } => EXIT_PRECONDITION,
            WorkflowError::Config(_) => EXIT_CONFIG,
            WorkflowError::ToolUnavailable { .. }
            | WorkflowError::ToolFailure { .. }
            | WorkflowError::UnverifiedCommit { .. }
            | WorkflowError::Git(_)
            | WorkflowError::Io { .. } => EXIT_TOOL,
            WorkflowError::Interrupted { .. } => EXIT_INTERRUPTED,
        }
    }
}

impl From<ToolError> for WorkflowError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::Unavailable { tool, reason } => WorkflowError::ToolUnavailable { tool, reason },
            other => WorkflowError::ToolFailure {
                tool: other.tool().to_string(),
                message: other.to_string(),
            },
        }
    }
}

/// Errors from a toolchain handler or one of its subprocesses.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{tool} is not available: {reason}")]
    Unavailable { tool: String, reason: String },

    #[error("{tool} did not finish within {secs}s")]
    TimedOut { tool: String, secs: u64 },

    #[error("{tool} failed: {message}")]
    Failed { tool: String, message: String },

    #[error("{tool} produced output that does not match the expected shape: {message}")]
    InvalidOutput { tool: String, message: String },
}

impl ToolError {
    /// Name of the tool that failed.
    pub fn tool(&self) -> &str {
        match self {
            ToolError::Unavailable { tool, .. }
            | ToolError::TimedOut { tool, .. }
            | ToolError::Failed { tool, .. }
            | ToolError::InvalidOutput { tool, .. } => tool,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, ToolError::Unavailable { .. })
    }
}
