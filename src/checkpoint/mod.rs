//! Task-level progress tracking for the phase currently executing.
//!
//! A `Checkpoint` is written to `.remedy/checkpoints/<phase>.json` after
//! every task so an interrupted run can resume where it stopped.

pub mod manager;

pub use manager::CheckpointManager;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::phase::{Phase, TaskSpec};

/// One task of a phase run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: String,
    pub description: String,
    pub completed: bool,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub commit_ref: Option<String>,
    /// Last failure message; cleared when the task later completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    /// Set when the task was completed without running (tool unavailable).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped_reason: Option<String>,
    /// Commit kept by a run whose build check did not finish. The next run
    /// verifies it instead of running the task again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unverified_commit: Option<String>,
}

impl TaskRecord {
    fn pending(spec: &TaskSpec) -> Self {
        Self {
            id: spec.id.clone(),
            description: spec.description.clone(),
            completed: false,
            completed_at: None,
            commit_ref: None,
            failure: None,
            skipped_reason: None,
            unverified_commit: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        !self.completed && self.failure.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub phase: Phase,
    pub started_at: DateTime<Utc>,
    pub last_checkpoint_at: DateTime<Utc>,
    #[serde(default)]
    pub interrupted: bool,
    pub tasks: Vec<TaskRecord>,
}

impl Checkpoint {
    pub fn new(phase: Phase, plan: &[TaskSpec]) -> Self {
        let now = Utc::now();
        Self {
            phase,
            started_at: now,
            last_checkpoint_at: now,
            interrupted: false,
            tasks: plan.iter().map(TaskRecord::pending).collect(),
        }
    }

    pub fn task(&self, id: &str) -> Option<&TaskRecord> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn completed_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.completed).count()
    }

    /// Ids of tasks not yet completed, in plan order.
    pub fn pending_ids(&self) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|t| !t.completed)
            .map(|t| t.id.clone())
            .collect()
    }

    pub fn failed_ids(&self) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|t| t.is_failed())
            .map(|t| t.id.clone())
            .collect()
    }

    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(|t| t.completed)
    }

    /// Whether this checkpoint was created from the same task list.
    pub fn matches_plan(&self, phase: Phase, plan: &[TaskSpec]) -> bool {
        self.phase == phase
            && self.tasks.len() == plan.len()
            && self.tasks.iter().zip(plan).all(|(t, s)| t.id == s.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::default_plan;

    #[test]
    fn new_checkpoint_has_all_tasks_pending() {
        let plan = default_plan(Phase::Structure);
        let cp = Checkpoint::new(Phase::Structure, &plan);
        assert_eq!(cp.tasks.len(), plan.len());
        assert_eq!(cp.completed_count(), 0);
        assert!(!cp.interrupted);
        assert_eq!(cp.pending_ids(), vec!["structure-layout", "structure-gitignore"]);
    }

    #[test]
    fn matches_plan_compares_ids_in_order() {
        let plan = default_plan(Phase::Testing);
        let cp = Checkpoint::new(Phase::Testing, &plan);
        assert!(cp.matches_plan(Phase::Testing, &plan));

        let mut reversed = plan.clone();
        reversed.reverse();
        assert!(!cp.matches_plan(Phase::Testing, &reversed));
        assert!(!cp.matches_plan(Phase::Quality, &plan));
    }

    #[test]
    fn checkpoint_json_shape() {
        let cp = Checkpoint::new(Phase::Quality, &default_plan(Phase::Quality));
        let value = serde_json::to_value(&cp).unwrap();
        assert_eq!(value["phase"], "Quality");
        assert!(value.get("startedAt").is_some());
        assert!(value.get("lastCheckpointAt").is_some());
        assert_eq!(value["interrupted"], false);
        let task = &value["tasks"][0];
        assert_eq!(task["completed"], false);
        assert!(task.get("completedAt").is_some());
        assert!(task.get("commitRef").is_some());
        assert!(task.get("failure").is_none());
    }
}
