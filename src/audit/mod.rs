//! Append-only log of automated workflow decisions.
//!
//! Every transition, commit, revert, skipped step and gate evaluation is
//! written as one JSON line to `.remedy/decisions.jsonl`. Records are never
//! rewritten, and the log can be read without the run lock.

pub mod logger;

pub use logger::DecisionLog;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::phase::Phase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    PhaseEntered,
    PhaseCompleted,
    TransitionRejected,
    TaskCommitted,
    TaskUnchanged,
    TaskReverted,
    ToolUnavailable,
    ToolFailure,
    GatesEvaluated,
    WaiverApplied,
    RegressionDetected,
    ReEntered,
    CheckpointResumed,
    CheckpointRestarted,
    Interrupted,
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Serialized form is the display form.
        let name = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        f.write_str(&name)
    }
}

/// One immutable decision record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub phase: Phase,
    pub kind: DecisionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub message: String,
    /// Supporting detail such as build output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl DecisionRecord {
    pub fn new(phase: Phase, kind: DecisionKind, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            phase,
            kind,
            task_id: None,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_task(mut self, task_id: &str) -> Self {
        self.task_id = Some(task_id.to_string());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
