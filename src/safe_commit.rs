//! Commit-verify-revert wrapper around a single task.

use std::future::Future;
use std::path::{Path, PathBuf};

use crate::audit::{DecisionKind, DecisionLog, DecisionRecord};
use crate::errors::WorkflowError;
use crate::phase::{Phase, TaskSpec};
use crate::toolchain::BuildVerifier;
use crate::tracker::GitTracker;
use crate::util::tail;

const BUILD_OUTPUT_TAIL: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Changes were committed. `verified` is false when no build check
    /// could be run.
    Committed { commit_ref: String, verified: bool },
    /// The task left the tree unchanged; nothing was committed or verified.
    Unchanged,
}

impl TaskOutcome {
    pub fn commit_ref(&self) -> Option<String> {
        match self {
            TaskOutcome::Committed { commit_ref, .. } => Some(commit_ref.clone()),
            TaskOutcome::Unchanged => None,
        }
    }
}

pub struct SafeCommitExecutor {
    root: PathBuf,
    git: GitTracker,
}

impl SafeCommitExecutor {
    pub fn open(root: &Path) -> Result<Self, WorkflowError> {
        Ok(Self {
            root: root.to_path_buf(),
            git: GitTracker::open(root)?,
        })
    }

    pub fn git(&self) -> &GitTracker {
        &self.git
    }

    /// Run `effect`, commit what it changed and verify the build.
    ///
    /// A failed verification reverts the commit with a new commit, logs the
    /// build output and returns `BuildVerificationFailed`. A verifier that
    /// times out or crashes leaves the commit alone and returns
    /// `UnverifiedCommit` naming it, for [`Self::verify_kept_commit`] later.
    /// If `effect` itself fails, its uncommitted changes are discarded, and so
    /// are untracked artifacts left by measurement tasks or the build check.
    pub async fn run_task<F>(
        &self,
        log: &mut DecisionLog,
        phase: Phase,
        task: &TaskSpec,
        effect: F,
        verifier: &dyn BuildVerifier,
    ) -> Result<TaskOutcome, WorkflowError>
    where
        F: Future<Output = Result<(), WorkflowError>>,
    {
        let dirty = self.git.dirty_paths()?;
        if !dirty.is_empty() {
            return Err(WorkflowError::DirtyWorktree { paths: dirty });
        }

        if let Err(e) = effect.await {
            self.git.discard_changes()?;
            return Err(e);
        }

        if task.action.is_measurement() {
            self.git.discard_changes()?;
            log.append(
                &DecisionRecord::new(phase, DecisionKind::TaskUnchanged, "Measurement only; no commit")
                    .with_task(&task.id),
            )?;
            return Ok(TaskOutcome::Unchanged);
        }

        let Some(commit_ref) =
            self.git
                .commit_task(&task.category, &task.description, phase, &task.id)?
        else {
            log.append(
                &DecisionRecord::new(phase, DecisionKind::TaskUnchanged, "No changes to commit")
                    .with_task(&task.id),
            )?;
            return Ok(TaskOutcome::Unchanged);
        };

        self.verify_commit(log, phase, task, commit_ref, verifier).await
    }

    /// Finish a task whose commit was kept by an earlier run because the
    /// build check could not complete. The task's effect is not run again;
    /// the kept commit is verified and reverted if the build fails.
    pub async fn verify_kept_commit(
        &self,
        log: &mut DecisionLog,
        phase: Phase,
        task: &TaskSpec,
        commit_ref: String,
        verifier: &dyn BuildVerifier,
    ) -> Result<TaskOutcome, WorkflowError> {
        let dirty = self.git.dirty_paths()?;
        if !dirty.is_empty() {
            return Err(WorkflowError::DirtyWorktree { paths: dirty });
        }
        tracing::info!(task = %task.id, commit = %short(&commit_ref), "Verifying kept commit");
        self.verify_commit(log, phase, task, commit_ref, verifier).await
    }

    async fn verify_commit(
        &self,
        log: &mut DecisionLog,
        phase: Phase,
        task: &TaskSpec,
        commit_ref: String,
        verifier: &dyn BuildVerifier,
    ) -> Result<TaskOutcome, WorkflowError> {
        let verification = verifier.verify(&self.root).await;
        self.git.discard_changes()?;

        match verification {
            Ok(report) if report.passed => {
                log.append(
                    &DecisionRecord::new(
                        phase,
                        DecisionKind::TaskCommitted,
                        format!("Committed {} and verified build", short(&commit_ref)),
                    )
                    .with_task(&task.id),
                )?;
                Ok(TaskOutcome::Committed {
                    commit_ref,
                    verified: true,
                })
            }
            Ok(report) => {
                let revert_ref = self.git.revert_commit(&commit_ref, &task.description)?;
                let output = tail(&report.output, BUILD_OUTPUT_TAIL);
                log.append(
                    &DecisionRecord::new(
                        phase,
                        DecisionKind::TaskReverted,
                        format!(
                            "Build failed after {}; reverted with {}",
                            short(&commit_ref),
                            short(&revert_ref)
                        ),
                    )
                    .with_task(&task.id)
                    .with_detail(output.clone()),
                )?;
                Err(WorkflowError::BuildVerificationFailed {
                    task_id: task.id.clone(),
                    output,
                })
            }
            Err(e) if e.is_unavailable() => {
                log.append(
                    &DecisionRecord::new(
                        phase,
                        DecisionKind::ToolUnavailable,
                        format!("Committed {} without build verification", short(&commit_ref)),
                    )
                    .with_task(&task.id)
                    .with_detail(e.to_string()),
                )?;
                Ok(TaskOutcome::Committed {
                    commit_ref,
                    verified: false,
                })
            }
            Err(e) => {
                tracing::warn!(task = %task.id, commit = %commit_ref, "Build check could not run: {}", e);
                Err(WorkflowError::UnverifiedCommit {
                    tool: e.tool().to_string(),
                    commit_ref,
                    message: e.to_string(),
                })
            }
        }
    }
}

fn short(sha: &str) -> &str {
    &sha[..sha.len().min(8)]
}
