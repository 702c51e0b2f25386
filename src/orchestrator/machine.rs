//! The phase state machine.
//!
//! `PhaseOrchestrator` owns no workflow state. Every operation takes the
//! `WorkflowState` loaded at command start, mutates it, and persists it at
//! each durability point (transition, task completion, phase completion).

use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;

use super::collect::{MetricsCollector, missing_dirs};
use super::requirements;
use super::state::{COMPLETED, ENTERED, StateStore, WorkflowState};
use crate::audit::{DecisionKind, DecisionLog, DecisionRecord};
use crate::checkpoint::{Checkpoint, CheckpointManager};
use crate::errors::WorkflowError;
use crate::gates::{GateEvaluator, GateReport};
use crate::interrupt::InterruptFlag;
use crate::metrics::MetricsSnapshot;
use crate::phase::{Phase, TaskAction, TaskSpec, plan_for};
use crate::regression::{ReEntryEvent, RegressionDetector};
use crate::remedy_config::RemedyConfig;
use crate::safe_commit::{SafeCommitExecutor, TaskOutcome};
use crate::toolchain::{BuildVerifier, NoVerifier, Toolchain, ToolchainRegistry, ToolchainVerifier, process};
use crate::util;

/// Result of `can_advance_to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionCheck {
    pub allowed: bool,
    pub reason: String,
    /// Unmet requirement messages; empty when the only problem is the table.
    pub unmet: Vec<String>,
}

/// How one task of a phase run ended, for progress display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    AlreadyComplete,
    Committed { commit_ref: String, verified: bool },
    Unchanged,
    Skipped { reason: String },
    Reverted { output: String },
    Failed { message: String },
}

/// Receives progress while a phase runs. All methods default to no-ops.
pub trait RunObserver: Send + Sync {
    fn phase_started(&self, _phase: Phase, _total: usize, _already_complete: usize) {}
    fn task_started(&self, _task: &TaskSpec) {}
    fn task_finished(&self, _task: &TaskSpec, _event: &TaskEvent) {}
    fn phase_finished(&self, _phase: Phase, _ok: bool) {}
}

struct SilentObserver;

impl RunObserver for SilentObserver {}

/// What a `monitor` run found.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorOutcome {
    pub event: Option<ReEntryEvent>,
    pub re_entered: Option<Phase>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GraduationReport<'a> {
    graduated_at: chrono::DateTime<Utc>,
    metrics: &'a MetricsSnapshot,
    gates: &'a GateReport,
}

pub struct PhaseOrchestrator {
    config: RemedyConfig,
    store: StateStore,
    checkpoints: CheckpointManager,
    registry: ToolchainRegistry,
    evaluator: GateEvaluator,
    detector: RegressionDetector,
    interrupt: InterruptFlag,
    observer: Box<dyn RunObserver>,
}

impl PhaseOrchestrator {
    pub fn new(config: RemedyConfig, registry: ToolchainRegistry, interrupt: InterruptFlag) -> Self {
        let store = StateStore::new(config.state_file());
        let checkpoints =
            CheckpointManager::new(&config.checkpoint_dir(), config.toml.checkpoint.stale_after_secs);
        let evaluator = GateEvaluator::from_config(&config.toml);
        let detector = RegressionDetector::from_config(&config.toml);
        Self {
            config,
            store,
            checkpoints,
            registry,
            evaluator,
            detector,
            interrupt,
            observer: Box::new(SilentObserver),
        }
    }

    pub fn with_observer(mut self, observer: Box<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    pub fn config(&self) -> &RemedyConfig {
        &self.config
    }

    /// Gates evaluated against the state's current metrics.
    pub fn gate_report(&self, state: &WorkflowState) -> GateReport {
        self.evaluator.evaluate_all(&state.current_metrics)
    }

    /// Whether `state` may move to `next`. Pure: reads only its arguments.
    pub fn can_advance_to(&self, state: &WorkflowState, next: Phase) -> TransitionCheck {
        let from = state.current_phase;
        if !from.can_transition_to(next) {
            let legal: Vec<String> = from.successors().iter().map(Phase::to_string).collect();
            let only = if legal.len() == 1 {
                format!("the only legal next phase is {}", legal[0])
            } else {
                format!("legal next phases are {}", legal.join(", "))
            };
            return TransitionCheck {
                allowed: false,
                reason: format!("{} cannot move to {}; {}", from, next, only),
                unmet: Vec::new(),
            };
        }

        let unmet = requirements::unmet(state, &self.config.toml, from, next);
        if unmet.is_empty() {
            TransitionCheck {
                allowed: true,
                reason: "all requirements met".to_string(),
                unmet,
            }
        } else {
            TransitionCheck {
                allowed: false,
                reason: unmet.join("; "),
                unmet,
            }
        }
    }

    /// Move to `next` and persist, or fail with `PhaseTransitionRejected`.
    ///
    /// Leaving `Graduated` is a re-entry: completion of `next` and every later
    /// phase is forgotten so the project climbs back through them.
    pub fn advance_to(
        &self,
        state: &mut WorkflowState,
        log: &mut DecisionLog,
        next: Phase,
    ) -> Result<(), WorkflowError> {
        let from = state.current_phase;
        let check = self.can_advance_to(state, next);
        if !check.allowed {
            log.append(&DecisionRecord::new(
                from,
                DecisionKind::TransitionRejected,
                format!("{} -> {} rejected: {}", from, next, check.reason),
            ))?;
            return Err(WorkflowError::PhaseTransitionRejected {
                from,
                to: next,
                reason: check.reason,
            });
        }

        let re_entry = from == Phase::Graduated;
        if re_entry {
            state.clear_completion_from(next);
            state.graduated = false;
        }
        state.current_phase = next;
        state.stamp(next, ENTERED, Utc::now());
        self.store.save(state)?;

        let (kind, message) = if re_entry {
            let trigger = state
                .latest_re_entry()
                .map(|e| e.trigger.to_string())
                .unwrap_or_default();
            (DecisionKind::ReEntered, format!("Re-entered {} after {}", next, trigger))
        } else {
            (DecisionKind::PhaseEntered, format!("Entered {} from {}", next, from))
        };
        log.append(&DecisionRecord::new(next, kind, message))?;
        tracing::info!(from = %from, to = %next, "Phase transition");
        Ok(())
    }

    /// Enter `phase` if needed and run its task plan to completion.
    ///
    /// Completed tasks of a resumed checkpoint are skipped. A task that breaks
    /// the build is reverted and recorded as failed while the remaining tasks
    /// still run; the phase then ends with `PhaseIncomplete`. Tool failures
    /// abort the run and keep the checkpoint for resumption.
    pub async fn run_phase(
        &self,
        state: &mut WorkflowState,
        log: &mut DecisionLog,
        phase: Phase,
        restart: bool,
    ) -> Result<(), WorkflowError> {
        if phase == Phase::Graduated {
            return self.graduate(state, log).await.map(|_| ());
        }
        if state.current_phase != phase {
            self.advance_to(state, log, phase)?;
        } else if state.timestamp(phase, ENTERED).is_none() {
            state.stamp(phase, ENTERED, Utc::now());
            log.append(&DecisionRecord::new(phase, DecisionKind::PhaseEntered, format!("Entered {}", phase)))?;
        }

        if restart && let Some(backup) = self.checkpoints.discard(phase)? {
            log.append(
                &DecisionRecord::new(phase, DecisionKind::CheckpointRestarted, "Discarded checkpoint on request")
                    .with_detail(backup.display().to_string()),
            )?;
        }

        let plan = plan_for(phase, &self.config.toml.tasks);
        let (mut checkpoint, resumed) = self.checkpoints.resume_or_start(phase, &plan)?;
        if resumed {
            log.append(
                &DecisionRecord::new(
                    phase,
                    DecisionKind::CheckpointResumed,
                    format!(
                        "Resuming with {} of {} tasks complete",
                        checkpoint.completed_count(),
                        checkpoint.tasks.len()
                    ),
                )
                .with_detail(format!("interrupted: {}", self.checkpoints.is_interrupted(&checkpoint))),
            )?;
            self.checkpoints.clear_interrupted(&mut checkpoint)?;
        }

        self.observer
            .phase_started(phase, plan.len(), checkpoint.completed_count());
        let result = self.run_tasks(state, log, &mut checkpoint, &plan).await;
        self.store.save(state)?;

        if let Err(e) = result {
            // A gate verdict ends the run; other errors leave it resumable.
            if matches!(e, WorkflowError::GateFailed { .. }) {
                self.checkpoints.archive(&checkpoint)?;
            }
            self.observer.phase_finished(phase, false);
            return Err(e);
        }

        let failed = checkpoint.failed_ids();
        if !failed.is_empty() {
            // Kept so the next run retries only the failed tasks.
            self.observer.phase_finished(phase, false);
            return Err(WorkflowError::PhaseIncomplete {
                phase,
                failed: failed.len(),
                task_ids: failed,
            });
        }

        state.mark_complete(phase);
        self.store.save(state)?;
        self.checkpoints.archive(&checkpoint)?;
        log.append(&DecisionRecord::new(
            phase,
            DecisionKind::PhaseCompleted,
            format!("{} complete ({} tasks)", phase, plan.len()),
        ))?;
        self.observer.phase_finished(phase, true);
        tracing::info!(phase = %phase, "Phase complete");
        Ok(())
    }

    async fn run_tasks(
        &self,
        state: &mut WorkflowState,
        log: &mut DecisionLog,
        checkpoint: &mut Checkpoint,
        plan: &[TaskSpec],
    ) -> Result<(), WorkflowError> {
        let phase = checkpoint.phase;
        let executor = SafeCommitExecutor::open(&self.config.project_dir)?;
        let toolchain = self.toolchain(state);
        let verifier: Box<dyn BuildVerifier + '_> = match toolchain {
            Some(tc) => Box::new(ToolchainVerifier(tc)),
            None => Box::new(NoVerifier),
        };

        for task in plan {
            if checkpoint.task(&task.id).is_some_and(|t| t.completed) {
                self.observer.task_finished(task, &TaskEvent::AlreadyComplete);
                continue;
            }
            if self.interrupt.is_set() {
                self.checkpoints.mark_interrupted(checkpoint)?;
                log.append_best_effort(&DecisionRecord::new(
                    phase,
                    DecisionKind::Interrupted,
                    format!(
                        "Stopped before {} with {} of {} tasks complete",
                        task.id,
                        checkpoint.completed_count(),
                        checkpoint.tasks.len()
                    ),
                ));
                return Err(WorkflowError::Interrupted { phase });
            }

            self.observer.task_started(task);
            let mut notes = Vec::new();
            let kept = checkpoint.task(&task.id).and_then(|t| t.unverified_commit.clone());
            let result = match kept {
                Some(commit_ref) => {
                    executor
                        .verify_kept_commit(log, phase, task, commit_ref, verifier.as_ref())
                        .await
                }
                None => {
                    let effect = self.execute_action(state, &mut notes, phase, task, toolchain);
                    executor
                        .run_task(log, phase, task, effect, verifier.as_ref())
                        .await
                }
            };
            for note in &notes {
                log.append(note)?;
            }

            let event = match result {
                Ok(outcome) => {
                    self.checkpoints
                        .mark_task_complete(checkpoint, &task.id, outcome.commit_ref())?;
                    match outcome {
                        TaskOutcome::Committed { commit_ref, verified } => {
                            TaskEvent::Committed { commit_ref, verified }
                        }
                        TaskOutcome::Unchanged => TaskEvent::Unchanged,
                    }
                }
                Err(WorkflowError::BuildVerificationFailed { output, .. }) => {
                    self.checkpoints.record_reverted(
                        checkpoint,
                        &task.id,
                        "build verification failed; changes reverted",
                    )?;
                    TaskEvent::Reverted { output }
                }
                Err(WorkflowError::ToolUnavailable { tool, reason }) => {
                    let reason = format!("{} unavailable: {}", tool, reason);
                    log.append(
                        &DecisionRecord::new(phase, DecisionKind::ToolUnavailable, format!("Skipped {}", task.id))
                            .with_task(&task.id)
                            .with_detail(reason.clone()),
                    )?;
                    self.checkpoints.mark_task_skipped(checkpoint, &task.id, &reason)?;
                    TaskEvent::Skipped { reason }
                }
                Err(WorkflowError::GateFailed { failures }) => {
                    let message = failures.join("; ");
                    self.checkpoints.record_failure(checkpoint, &task.id, &message)?;
                    self.observer
                        .task_finished(task, &TaskEvent::Failed { message });
                    return Err(WorkflowError::GateFailed { failures });
                }
                Err(e) => {
                    let message = e.to_string();
                    if let WorkflowError::ToolFailure { tool, .. }
                    | WorkflowError::UnverifiedCommit { tool, .. } = &e
                    {
                        log.append(
                            &DecisionRecord::new(phase, DecisionKind::ToolFailure, format!("{} failed", tool))
                                .with_task(&task.id)
                                .with_detail(message.clone()),
                        )?;
                    }
                    match &e {
                        WorkflowError::UnverifiedCommit { commit_ref, .. } => {
                            self.checkpoints
                                .record_unverified(checkpoint, &task.id, commit_ref, &message)?;
                        }
                        WorkflowError::DirtyWorktree { .. } => {}
                        _ => self.checkpoints.record_failure(checkpoint, &task.id, &message)?,
                    }
                    self.observer.task_finished(task, &TaskEvent::Failed { message });
                    return Err(e);
                }
            };
            self.store.save(state)?;
            self.observer.task_finished(task, &event);
        }
        Ok(())
    }

    /// The handler for this project: forced by configuration, chosen during
    /// assessment, or detected now.
    fn toolchain(&self, state: &WorkflowState) -> Option<&dyn Toolchain> {
        let chosen = self.config.toml.forced_toolchain().or_else(|| state.toolchain.clone());
        match chosen {
            Some(id) => self.registry.get(&id),
            None => self
                .registry
                .select(&self.config.project_dir, None)
                .ok()
                .map(|(tc, _)| tc),
        }
    }

    async fn execute_action(
        &self,
        state: &mut WorkflowState,
        notes: &mut Vec<DecisionRecord>,
        phase: Phase,
        task: &TaskSpec,
        toolchain: Option<&dyn Toolchain>,
    ) -> Result<(), WorkflowError> {
        let root = &self.config.project_dir;
        let toml = &self.config.toml;

        match &task.action {
            TaskAction::DetectToolchain => {
                let forced = toml.forced_toolchain();
                let (handler, detection) = self.registry.select(root, forced.as_deref())?;
                tracing::info!(
                    toolchain = handler.id(),
                    confidence = detection.confidence,
                    evidence = %detection.evidence.join(", "),
                    "Detected toolchain"
                );
                state.toolchain = Some(handler.id().to_string());
            }
            TaskAction::CollectMetrics { baseline } => {
                let snapshot = MetricsCollector::new(root, toml, toolchain).collect().await?;
                for limitation in &snapshot.unavailable {
                    notes.push(
                        DecisionRecord::new(phase, DecisionKind::ToolUnavailable, "Metric not collected")
                            .with_task(&task.id)
                            .with_detail(limitation.clone()),
                    );
                }
                if *baseline {
                    state.baseline_metrics = snapshot.clone();
                }
                state.current_metrics = snapshot;
            }
            TaskAction::EnsureLayout => {
                for dir in missing_dirs(root, &toml.layout.required_dirs) {
                    let path = root.join(dir);
                    std::fs::create_dir_all(&path).map_err(|e| WorkflowError::io(&path, e))?;
                    let keep = path.join(".gitkeep");
                    std::fs::write(&keep, "").map_err(|e| WorkflowError::io(&keep, e))?;
                    tracing::info!(dir, "Created directory");
                }
            }
            TaskAction::EnsureGitignore => ensure_gitignore(root)?,
            TaskAction::BootstrapTests => {
                let toolchain = require(toolchain, "test bootstrap")?;
                let report = toolchain
                    .bootstrap_tests(root, &toml.layout.required_dirs)
                    .await?;
                tracing::info!(
                    framework = %report.framework,
                    coverage = report.coverage,
                    passing = report.passing,
                    failing = report.failing,
                    "Test harness ready"
                );
            }
            TaskAction::InstallQualityGates => {
                let toolchain = require(toolchain, "quality gates")?;
                let written = toolchain.install_quality_gates(root).await?;
                for path in &written {
                    tracing::info!(path = %path.display(), "Installed quality configuration");
                }
            }
            TaskAction::EvaluateGates => {
                let report = self.gate_report(state);
                let path = self.write_report("validation", &report)?;
                notes.extend(gate_records(phase, &report, &path));
                if !report.is_ready_with_waivers() {
                    return Err(WorkflowError::GateFailed {
                        failures: report.blocking_failures(),
                    });
                }
            }
            TaskAction::Run { argv } => {
                let output = process::run(argv, root, toml.tool_timeout_secs()).await?;
                if !output.success {
                    return Err(WorkflowError::ToolFailure {
                        tool: argv.first().cloned().unwrap_or_default(),
                        message: format!(
                            "exited with {}: {}",
                            output.code.map_or("signal".to_string(), |c| c.to_string()),
                            output.combined_tail()
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    fn write_report<T: Serialize>(&self, kind: &str, value: &T) -> Result<PathBuf, WorkflowError> {
        let path = self.config.reports_dir().join(format!(
            "{}-{}.json",
            kind,
            Utc::now().format("%Y%m%dT%H%M%S%.3fZ")
        ));
        util::write_json_atomic(&path, value)?;
        Ok(path)
    }

    /// Move from Validation to Graduated after a final gate evaluation.
    ///
    /// Writes `reports/graduation-<ts>.json` and stores the metrics that later
    /// regression checks compare against.
    pub async fn graduate(
        &self,
        state: &mut WorkflowState,
        log: &mut DecisionLog,
    ) -> Result<GateReport, WorkflowError> {
        let report = self.gate_report(state);
        if state.graduated && state.current_phase == Phase::Graduated {
            return Ok(report);
        }

        self.advance_to(state, log, Phase::Graduated)?;

        let now = Utc::now();
        let path = self.write_report(
            "graduation",
            &GraduationReport {
                graduated_at: now,
                metrics: &state.current_metrics,
                gates: &report,
            },
        )?;
        for record in gate_records(Phase::Graduated, &report, &path) {
            log.append(&record)?;
        }

        state.graduated = true;
        state.graduation_baseline = Some(state.current_metrics.clone());
        state.stamp(Phase::Graduated, COMPLETED, now);
        self.store.save(state)?;

        log.append(&DecisionRecord::new(
            Phase::Graduated,
            DecisionKind::PhaseCompleted,
            format!("Graduated; report at {}", path.display()),
        ))?;
        tracing::info!(report = %path.display(), "Project graduated");
        Ok(report)
    }

    /// Re-collect metrics on a graduated project and compare them with the
    /// graduation baseline. A breach is appended to the state; with `apply`
    /// the recommended phase is re-entered.
    pub async fn monitor(
        &self,
        state: &mut WorkflowState,
        log: &mut DecisionLog,
        apply: bool,
    ) -> Result<MonitorOutcome, WorkflowError> {
        if !state.graduated {
            return Err(WorkflowError::NotGraduated {
                phase: state.current_phase,
            });
        }

        let toolchain = self.toolchain(state);
        let current = MetricsCollector::new(&self.config.project_dir, &self.config.toml, toolchain)
            .collect()
            .await?;
        let baseline = state
            .graduation_baseline
            .clone()
            .unwrap_or_else(|| state.baseline_metrics.clone());
        state.current_metrics = current;

        let Some(event) = self.detector.detect(&baseline, &state.current_metrics) else {
            self.store.save(state)?;
            return Ok(MonitorOutcome {
                event: None,
                re_entered: None,
            });
        };

        state.re_entry_events.push(event.clone());
        self.store.save(state)?;
        log.append(&DecisionRecord::new(
            Phase::Graduated,
            DecisionKind::RegressionDetected,
            event.describe(),
        ))?;
        tracing::warn!(trigger = %event.trigger, "Regression detected");

        let re_entered = if apply {
            self.advance_to(state, log, event.recommended_phase)?;
            Some(event.recommended_phase)
        } else {
            None
        };
        Ok(MonitorOutcome {
            event: Some(event),
            re_entered,
        })
    }
}

fn require<'a>(toolchain: Option<&'a dyn Toolchain>, step: &str) -> Result<&'a dyn Toolchain, WorkflowError> {
    toolchain.ok_or_else(|| WorkflowError::ToolUnavailable {
        tool: "toolchain".to_string(),
        reason: format!("no toolchain detected for {}", step),
    })
}

fn gate_records(phase: Phase, report: &GateReport, path: &std::path::Path) -> Vec<DecisionRecord> {
    let passed = report.gates.iter().filter(|g| g.passed).count();
    let mut records = vec![
        DecisionRecord::new(
            phase,
            DecisionKind::GatesEvaluated,
            format!("{} of {} gates passed", passed, report.gates.len()),
        )
        .with_detail(path.display().to_string()),
    ];
    for gate in report.waived() {
        records.push(
            DecisionRecord::new(phase, DecisionKind::WaiverApplied, gate.gap())
                .with_detail(gate.exception_conditions.join("; ")),
        );
    }
    records
}

const GITIGNORE_ENTRY: &str = ".remedy/";

fn ensure_gitignore(root: &std::path::Path) -> Result<(), WorkflowError> {
    let path = root.join(".gitignore");
    let existing = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(WorkflowError::io(&path, e)),
    };
    if existing
        .lines()
        .any(|l| matches!(l.trim(), ".remedy" | ".remedy/" | "/.remedy" | "/.remedy/"))
    {
        return Ok(());
    }
    let mut updated = existing;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(GITIGNORE_ENTRY);
    updated.push('\n');
    std::fs::write(&path, updated).map_err(|e| WorkflowError::io(&path, e))
}
