use chrono::{TimeDelta, Utc};
use std::fs;
use std::path::{Path, PathBuf};

use super::Checkpoint;
use crate::errors::WorkflowError;
use crate::phase::{Phase, TaskSpec};
use crate::remedy_config::CheckpointConfig;
use crate::util;

/// Owns the checkpoint files under `.remedy/checkpoints/`.
pub struct CheckpointManager {
    dir: PathBuf,
    stale_after: TimeDelta,
}

impl CheckpointManager {
    /// A window too large to represent never expires.
    pub fn new(dir: &Path, stale_after_secs: u64) -> Self {
        Self {
            dir: dir.to_path_buf(),
            stale_after: CheckpointConfig::window(stale_after_secs).unwrap_or(TimeDelta::MAX),
        }
    }

    pub fn path_for(&self, phase: Phase) -> PathBuf {
        self.dir.join(format!("{}.json", phase.slug()))
    }

    fn archive_dir(&self) -> PathBuf {
        self.dir.join("archive")
    }

    /// The active checkpoint for `phase`, if one exists.
    pub fn load_checkpoint(&self, phase: Phase) -> Result<Option<Checkpoint>, WorkflowError> {
        let path = self.path_for(phase);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|e| WorkflowError::io(&path, e))?;

        match serde_json::from_str::<Checkpoint>(&content) {
            Ok(cp) if cp.phase == phase => Ok(Some(cp)),
            Ok(cp) => Err(self.corrupted(
                &path,
                format!("file names phase {} but belongs to {}", cp.phase, phase),
            )?),
            Err(e) => Err(self.corrupted(&path, e.to_string())?),
        }
    }

    fn corrupted(&self, path: &Path, message: String) -> Result<WorkflowError, WorkflowError> {
        let backup = util::backup_file(path, "corrupt")?;
        tracing::warn!(path = %path.display(), "Checkpoint unreadable: {}", message);
        Ok(WorkflowError::CheckpointCorrupted {
            path: path.to_path_buf(),
            backup: Some(backup),
            message,
        })
    }

    /// True when a prior run left `interrupted` set, or when pending tasks
    /// remain and nothing has been written for longer than the stale window.
    pub fn is_interrupted(&self, checkpoint: &Checkpoint) -> bool {
        if checkpoint.interrupted {
            return true;
        }
        !checkpoint.is_finished() && Utc::now() - checkpoint.last_checkpoint_at > self.stale_after
    }

    /// Resume the existing checkpoint for `phase` or start a fresh one.
    ///
    /// The caller holds the project lock, so any unfinished checkpoint built
    /// from the same task list belongs to a run that is no longer alive and is
    /// returned unmodified. Anything else is archived and replaced. The bool
    /// is `true` when an existing checkpoint was resumed.
    pub fn resume_or_start(
        &self,
        phase: Phase,
        plan: &[TaskSpec],
    ) -> Result<(Checkpoint, bool), WorkflowError> {
        if let Some(existing) = self.load_checkpoint(phase)? {
            if existing.matches_plan(phase, plan) {
                tracing::info!(
                    phase = %phase,
                    completed = existing.completed_count(),
                    total = existing.tasks.len(),
                    interrupted = self.is_interrupted(&existing),
                    "Resuming checkpoint"
                );
                return Ok((existing, true));
            }
            tracing::info!(phase = %phase, "Task plan changed; archiving previous checkpoint");
            self.archive(&existing)?;
        }

        let checkpoint = Checkpoint::new(phase, plan);
        self.save(&checkpoint)?;
        Ok((checkpoint, false))
    }

    pub fn save(&self, checkpoint: &Checkpoint) -> Result<(), WorkflowError> {
        util::write_json_atomic(&self.path_for(checkpoint.phase), checkpoint)
    }

    /// Record a task as completed and persist immediately.
    ///
    /// Completion is monotonic: a task that is already completed keeps its
    /// original timestamp and commit.
    pub fn mark_task_complete(
        &self,
        checkpoint: &mut Checkpoint,
        task_id: &str,
        commit_ref: Option<String>,
    ) -> Result<(), WorkflowError> {
        let now = Utc::now();
        let task = self.task_mut(checkpoint, task_id)?;
        if !task.completed {
            task.completed = true;
            task.completed_at = Some(now);
            task.commit_ref = commit_ref;
            task.failure = None;
            task.unverified_commit = None;
        }
        checkpoint.last_checkpoint_at = now;
        self.save(checkpoint)
    }

    /// Complete a task without running it, keeping the reason visible.
    pub fn mark_task_skipped(
        &self,
        checkpoint: &mut Checkpoint,
        task_id: &str,
        reason: &str,
    ) -> Result<(), WorkflowError> {
        self.task_mut(checkpoint, task_id)?.skipped_reason = Some(reason.to_string());
        self.mark_task_complete(checkpoint, task_id, None)
    }

    /// Record a failure for a task that stays incomplete.
    pub fn record_failure(
        &self,
        checkpoint: &mut Checkpoint,
        task_id: &str,
        message: &str,
    ) -> Result<(), WorkflowError> {
        let task = self.task_mut(checkpoint, task_id)?;
        if !task.completed {
            task.failure = Some(message.to_string());
        }
        checkpoint.last_checkpoint_at = Utc::now();
        self.save(checkpoint)
    }

    /// Remember a commit whose build check did not finish.
    pub fn record_unverified(
        &self,
        checkpoint: &mut Checkpoint,
        task_id: &str,
        commit_ref: &str,
        message: &str,
    ) -> Result<(), WorkflowError> {
        let task = self.task_mut(checkpoint, task_id)?;
        task.unverified_commit = Some(commit_ref.to_string());
        task.failure = Some(message.to_string());
        checkpoint.last_checkpoint_at = Utc::now();
        self.save(checkpoint)
    }

    /// Record a failure whose changes were reverted. The task runs again on
    /// the next attempt.
    pub fn record_reverted(
        &self,
        checkpoint: &mut Checkpoint,
        task_id: &str,
        message: &str,
    ) -> Result<(), WorkflowError> {
        self.task_mut(checkpoint, task_id)?.unverified_commit = None;
        self.record_failure(checkpoint, task_id, message)
    }

    /// Persist the checkpoint with `interrupted = true` before exiting.
    pub fn mark_interrupted(&self, checkpoint: &mut Checkpoint) -> Result<(), WorkflowError> {
        checkpoint.interrupted = true;
        checkpoint.last_checkpoint_at = Utc::now();
        self.save(checkpoint)
    }

    /// Mark every active checkpoint as interrupted, for an exit that cannot
    /// wait for the running task to finish.
    pub fn mark_all_interrupted(&self) -> Result<Vec<Phase>, WorkflowError> {
        let mut marked = Vec::new();
        for mut checkpoint in self.active() {
            self.mark_interrupted(&mut checkpoint)?;
            marked.push(checkpoint.phase);
        }
        Ok(marked)
    }

    /// Clear a leftover interruption flag once a resumed run is under way.
    pub fn clear_interrupted(&self, checkpoint: &mut Checkpoint) -> Result<(), WorkflowError> {
        if checkpoint.interrupted {
            checkpoint.interrupted = false;
            self.save(checkpoint)?;
        }
        Ok(())
    }

    /// Move the checkpoint for a finished (or superseded) run into `archive/`.
    pub fn archive(&self, checkpoint: &Checkpoint) -> Result<Option<PathBuf>, WorkflowError> {
        let path = self.path_for(checkpoint.phase);
        if !path.exists() {
            return Ok(None);
        }
        let archive_dir = self.archive_dir();
        fs::create_dir_all(&archive_dir).map_err(|e| WorkflowError::io(&archive_dir, e))?;
        let target = archive_dir.join(format!(
            "{}-{}.json",
            checkpoint.phase.slug(),
            Utc::now().format("%Y%m%dT%H%M%S%.3fZ")
        ));
        fs::rename(&path, &target).map_err(|e| WorkflowError::io(&target, e))?;
        Ok(Some(target))
    }

    /// Back up and remove the checkpoint for `phase` so the next run starts
    /// fresh. Works on corrupted files too.
    pub fn discard(&self, phase: Phase) -> Result<Option<PathBuf>, WorkflowError> {
        let path = self.path_for(phase);
        if !path.exists() {
            return Ok(None);
        }
        let backup = util::backup_file(&path, "discarded")?;
        fs::remove_file(&path).map_err(|e| WorkflowError::io(&path, e))?;
        Ok(Some(backup))
    }

    /// Every active checkpoint on disk, skipping unreadable ones.
    pub fn active(&self) -> Vec<Checkpoint> {
        Phase::ALL
            .iter()
            .filter_map(|phase| {
                let content = fs::read_to_string(self.path_for(*phase)).ok()?;
                serde_json::from_str(&content).ok()
            })
            .collect()
    }

    fn task_mut<'a>(
        &self,
        checkpoint: &'a mut Checkpoint,
        task_id: &str,
    ) -> Result<&'a mut super::TaskRecord, WorkflowError> {
        let phase = checkpoint.phase;
        checkpoint
            .tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| WorkflowError::CheckpointCorrupted {
                path: self.path_for(phase),
                backup: None,
                message: format!("task '{}' is not part of the {} checkpoint", task_id, phase),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::TaskAction;
    use tempfile::tempdir;

    fn five_tasks() -> Vec<TaskSpec> {
        (1..=5)
            .map(|i| {
                TaskSpec::new(
                    &format!("task-{i}"),
                    &format!("Task {i}"),
                    "chore",
                    TaskAction::Run {
                        argv: vec!["true".into()],
                    },
                )
            })
            .collect()
    }

    fn manager() -> (CheckpointManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let manager = CheckpointManager::new(&dir.path().join("checkpoints"), 1800);
        (manager, dir)
    }

    #[test]
    fn test_start_creates_file_with_pending_tasks() {
        let (manager, _dir) = manager();
        let (cp, resumed) = manager.resume_or_start(Phase::Testing, &five_tasks()).unwrap();
        assert!(!resumed);
        assert!(manager.path_for(Phase::Testing).exists());
        assert_eq!(cp.completed_count(), 0);
    }

    #[test]
    fn test_killed_run_resumes_at_first_pending_task() {
        let (manager, _dir) = manager();
        let plan = five_tasks();
        let (mut cp, _) = manager.resume_or_start(Phase::Structure, &plan).unwrap();
        for id in ["task-1", "task-2", "task-3"] {
            manager
                .mark_task_complete(&mut cp, id, Some(format!("sha-{id}")))
                .unwrap();
        }
        drop(cp);

        let (resumed, was_resumed) = manager.resume_or_start(Phase::Structure, &plan).unwrap();

        assert!(was_resumed);
        assert_eq!(resumed.completed_count(), 3);
        assert_eq!(resumed.pending_ids(), vec!["task-4", "task-5"]);
        assert_eq!(resumed.task("task-2").unwrap().commit_ref.as_deref(), Some("sha-task-2"));
    }

    #[test]
    fn test_forced_exit_marks_running_checkpoint_interrupted() {
        let (manager, _dir) = manager();
        let plan = five_tasks();
        let (mut cp, _) = manager.resume_or_start(Phase::Testing, &plan).unwrap();
        manager.mark_task_complete(&mut cp, "task-1", None).unwrap();
        assert!(!manager.load_checkpoint(Phase::Testing).unwrap().unwrap().interrupted);

        let marked = manager.mark_all_interrupted().unwrap();

        assert_eq!(marked, vec![Phase::Testing]);
        let saved = manager.load_checkpoint(Phase::Testing).unwrap().unwrap();
        assert!(saved.interrupted);
        assert_eq!(saved.completed_count(), 1);
        let (_, resumed) = manager.resume_or_start(Phase::Testing, &plan).unwrap();
        assert!(resumed);
    }

    #[test]
    fn test_forced_exit_without_checkpoints_marks_nothing() {
        let (manager, _dir) = manager();
        assert!(manager.mark_all_interrupted().unwrap().is_empty());
    }

    #[test]
    fn test_unverified_commit_survives_reload_until_completed() {
        let (manager, _dir) = manager();
        let plan = five_tasks();
        let (mut cp, _) = manager.resume_or_start(Phase::Quality, &plan).unwrap();
        manager
            .record_unverified(&mut cp, "task-2", "abc123", "cargo timed out")
            .unwrap();

        let (mut resumed, _) = manager.resume_or_start(Phase::Quality, &plan).unwrap();
        let task = resumed.task("task-2").unwrap();
        assert_eq!(task.unverified_commit.as_deref(), Some("abc123"));
        assert!(!task.completed);

        manager
            .mark_task_complete(&mut resumed, "task-2", Some("abc123".into()))
            .unwrap();
        assert!(resumed.task("task-2").unwrap().unverified_commit.is_none());
    }

    #[test]
    fn test_reverted_task_forgets_kept_commit() {
        let (manager, _dir) = manager();
        let (mut cp, _) = manager.resume_or_start(Phase::Quality, &five_tasks()).unwrap();
        manager.record_unverified(&mut cp, "task-1", "abc123", "timed out").unwrap();
        manager.record_reverted(&mut cp, "task-1", "build failed").unwrap();

        let task = cp.task("task-1").unwrap();
        assert!(task.unverified_commit.is_none());
        assert_eq!(task.failure.as_deref(), Some("build failed"));
        assert!(task.is_failed());
    }

    #[test]
    fn test_resume_returns_checkpoint_unmodified() {
        let (manager, _dir) = manager();
        let plan = five_tasks();
        let (mut cp, _) = manager.resume_or_start(Phase::Quality, &plan).unwrap();
        manager.mark_task_complete(&mut cp, "task-1", None).unwrap();
        manager.mark_interrupted(&mut cp).unwrap();

        let (resumed, _) = manager.resume_or_start(Phase::Quality, &plan).unwrap();
        assert_eq!(resumed, cp);
        assert!(manager.is_interrupted(&resumed));
    }

    #[test]
    fn test_changed_plan_archives_and_restarts() {
        let (manager, dir) = manager();
        let plan = five_tasks();
        let (mut cp, _) = manager.resume_or_start(Phase::Testing, &plan).unwrap();
        manager.mark_task_complete(&mut cp, "task-1", None).unwrap();

        let shorter = &plan[..2];
        let (fresh, resumed) = manager.resume_or_start(Phase::Testing, shorter).unwrap();

        assert!(!resumed);
        assert_eq!(fresh.tasks.len(), 2);
        assert_eq!(fresh.completed_count(), 0);
        let archived = fs::read_dir(dir.path().join("checkpoints/archive")).unwrap().count();
        assert_eq!(archived, 1);
    }

    #[test]
    fn test_completion_is_monotonic() {
        let (manager, _dir) = manager();
        let (mut cp, _) = manager.resume_or_start(Phase::Testing, &five_tasks()).unwrap();
        manager
            .mark_task_complete(&mut cp, "task-1", Some("abc".into()))
            .unwrap();
        let first_at = cp.task("task-1").unwrap().completed_at;

        manager
            .mark_task_complete(&mut cp, "task-1", Some("def".into()))
            .unwrap();
        manager.record_failure(&mut cp, "task-1", "late failure").unwrap();

        let task = cp.task("task-1").unwrap();
        assert!(task.completed);
        assert_eq!(task.commit_ref.as_deref(), Some("abc"));
        assert_eq!(task.completed_at, first_at);
        assert!(task.failure.is_none());
    }

    #[test]
    fn test_every_completion_is_persisted() {
        let (manager, _dir) = manager();
        let (mut cp, _) = manager.resume_or_start(Phase::Testing, &five_tasks()).unwrap();
        manager.mark_task_complete(&mut cp, "task-1", None).unwrap();

        let on_disk = manager.load_checkpoint(Phase::Testing).unwrap().unwrap();
        assert!(on_disk.task("task-1").unwrap().completed);
        assert_eq!(on_disk.last_checkpoint_at, cp.last_checkpoint_at);
    }

    #[test]
    fn test_failure_then_success_clears_failure() {
        let (manager, _dir) = manager();
        let (mut cp, _) = manager.resume_or_start(Phase::Testing, &five_tasks()).unwrap();
        manager.record_failure(&mut cp, "task-2", "build broke").unwrap();
        assert_eq!(cp.failed_ids(), vec!["task-2"]);

        manager.mark_task_complete(&mut cp, "task-2", Some("abc".into())).unwrap();
        assert!(cp.failed_ids().is_empty());
    }

    #[test]
    fn test_stale_checkpoint_counts_as_interrupted() {
        let (manager, _dir) = manager();
        let (mut cp, _) = manager.resume_or_start(Phase::Testing, &five_tasks()).unwrap();
        assert!(!manager.is_interrupted(&cp));

        cp.last_checkpoint_at = Utc::now() - TimeDelta::hours(2);
        assert!(manager.is_interrupted(&cp));

        for task in cp.tasks.iter_mut() {
            task.completed = true;
        }
        assert!(!manager.is_interrupted(&cp));
    }

    #[test]
    fn test_unrepresentable_stale_window_never_expires() {
        let dir = tempdir().unwrap();
        for secs in [10_000_000_000_000_000, u64::MAX] {
            let manager = CheckpointManager::new(&dir.path().join("checkpoints"), secs);
            let (mut cp, _) = manager.resume_or_start(Phase::Testing, &five_tasks()).unwrap();
            cp.last_checkpoint_at = Utc::now() - TimeDelta::days(3650);
            assert!(!manager.is_interrupted(&cp));
        }
    }

    #[test]
    fn test_corrupted_checkpoint_is_backed_up() {
        let (manager, dir) = manager();
        let path = manager.path_for(Phase::Quality);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "not json").unwrap();

        let err = manager.resume_or_start(Phase::Quality, &five_tasks()).unwrap_err();

        assert!(matches!(err, WorkflowError::CheckpointCorrupted { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), "not json");
        let backups = fs::read_dir(dir.path().join("checkpoints"))
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .starts_with("quality.json.corrupt-")
            })
            .count();
        assert_eq!(backups, 1);
    }

    #[test]
    fn test_discard_allows_fresh_start_after_corruption() {
        let (manager, _dir) = manager();
        let path = manager.path_for(Phase::Quality);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "not json").unwrap();

        let backup = manager.discard(Phase::Quality).unwrap().unwrap();
        assert!(backup.exists());

        let (cp, resumed) = manager.resume_or_start(Phase::Quality, &five_tasks()).unwrap();
        assert!(!resumed);
        assert_eq!(cp.completed_count(), 0);
    }

    #[test]
    fn test_archive_removes_active_file() {
        let (manager, _dir) = manager();
        let (cp, _) = manager.resume_or_start(Phase::Testing, &five_tasks()).unwrap();
        let archived = manager.archive(&cp).unwrap().unwrap();
        assert!(archived.exists());
        assert!(manager.load_checkpoint(Phase::Testing).unwrap().is_none());
        assert!(manager.active().is_empty());
    }

    #[test]
    fn test_unknown_task_is_an_error() {
        let (manager, _dir) = manager();
        let (mut cp, _) = manager.resume_or_start(Phase::Testing, &five_tasks()).unwrap();
        assert!(manager.mark_task_complete(&mut cp, "nope", None).is_err());
    }
}
