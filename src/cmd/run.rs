//! Mutating workflow commands: phase runs, `remedy graduate`, `remedy resume`
//! and `remedy monitor`.

use anyhow::Result;
use console::style;
use std::path::Path;

use remedy::audit::DecisionLog;
use remedy::checkpoint::CheckpointManager;
use remedy::errors::WorkflowError;
use remedy::interrupt::InterruptFlag;
use remedy::lock::ProjectLock;
use remedy::orchestrator::{PhaseOrchestrator, WorkflowState};
use remedy::phase::Phase;
use remedy::remedy_config::RemedyConfig;
use remedy::toolchain::ToolchainRegistry;
use remedy::ui::PhaseUI;
use remedy::ui::icons::{GRADUATE, PIVOT};
use remedy::ui::report;

use super::super::Cli;
use super::command_name;

pub fn check_run_prerequisites(project_dir: &Path) -> Result<()> {
    if !remedy::init::is_initialized(project_dir) {
        anyhow::bail!("Project not initialized. Run 'remedy init' first.");
    }
    Ok(())
}

/// Everything a mutating command holds for its lifetime. The lock is released
/// when the session drops.
struct Session {
    orchestrator: PhaseOrchestrator,
    state: WorkflowState,
    log: DecisionLog,
    _lock: ProjectLock,
}

fn open_session(cli: &Cli, project_dir: &Path, command: &str) -> Result<Session> {
    check_run_prerequisites(project_dir)?;

    let config = RemedyConfig::with_cli_args(project_dir.to_path_buf(), cli.verbose)?;
    for warning in config.validate() {
        tracing::warn!("remedy.toml: {}", warning);
    }
    config.ensure_directories()?;

    let lock = ProjectLock::acquire(&config.lock_file(), command)?;
    let checkpoints = CheckpointManager::new(
        &config.checkpoint_dir(),
        config.toml.checkpoint.stale_after_secs,
    );
    let interrupt = InterruptFlag::install(move || match checkpoints.mark_all_interrupted() {
        Ok(phases) => tracing::warn!(phases = ?phases, "Exiting on second interrupt"),
        Err(e) => tracing::warn!("Could not mark checkpoints interrupted: {}", e),
    });
    let registry = ToolchainRegistry::from_config(&config.toml);
    let log = DecisionLog::open(&config.decision_log())?;

    let orchestrator = PhaseOrchestrator::new(config, registry, interrupt)
        .with_observer(Box::new(PhaseUI::new(cli.verbose)));
    let state = orchestrator.store().load()?;

    Ok(Session {
        orchestrator,
        state,
        log,
        _lock: lock,
    })
}

fn print_next_step(state: &WorkflowState) {
    if state.graduated {
        return;
    }
    if let [next] = state.current_phase.successors() {
        println!("Next: remedy {}", command_name(*next));
    }
}

/// Run one phase (`remedy assess`, `remedy structure`, ...).
pub async fn cmd_phase(cli: &Cli, project_dir: &Path, phase: Phase, restart: bool) -> Result<()> {
    let mut s = open_session(cli, project_dir, command_name(phase))?;
    run_and_report(&mut s, phase, restart).await
}

async fn run_and_report(s: &mut Session, phase: Phase, restart: bool) -> Result<()> {
    let result = s
        .orchestrator
        .run_phase(&mut s.state, &mut s.log, phase, restart)
        .await;

    match result {
        Ok(()) => {
            if phase == Phase::Validation {
                report::print_gate_report(&s.orchestrator.gate_report(&s.state));
            }
            print_next_step(&s.state);
            Ok(())
        }
        Err(e @ WorkflowError::GateFailed { .. }) => {
            report::print_gate_report(&s.orchestrator.gate_report(&s.state));
            Err(e.into())
        }
        Err(e @ WorkflowError::PhaseTransitionRejected { .. }) => {
            let check = s.orchestrator.can_advance_to(&s.state, phase);
            report::print_transition_check(s.state.current_phase, phase, &check);
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

/// `remedy graduate`: final gate evaluation and the move to Graduated.
pub async fn cmd_graduate(cli: &Cli, project_dir: &Path) -> Result<()> {
    let mut s = open_session(cli, project_dir, "graduate")?;
    let was_graduated = s.state.graduated;

    let result = s.orchestrator.graduate(&mut s.state, &mut s.log).await;
    let report = match result {
        Ok(report) => report,
        Err(e) => {
            if matches!(e, WorkflowError::PhaseTransitionRejected { .. }) {
                let check = s.orchestrator.can_advance_to(&s.state, Phase::Graduated);
                report::print_transition_check(s.state.current_phase, Phase::Graduated, &check);
            }
            return Err(e.into());
        }
    };

    report::print_gate_report(&report);
    if was_graduated {
        println!("Project already graduated.");
    } else {
        println!(
            "{} {}",
            GRADUATE,
            style("Project graduated. Run 'remedy monitor' to watch for regressions.")
                .green()
                .bold()
        );
    }
    Ok(())
}

/// `remedy resume`: continue the current phase from its checkpoint.
pub async fn cmd_resume(cli: &Cli, project_dir: &Path, restart: bool) -> Result<()> {
    let mut s = open_session(cli, project_dir, "resume")?;
    let phase = s.state.current_phase;

    if phase == Phase::Graduated {
        println!("Project has graduated; nothing to resume. Run 'remedy monitor' to check for regressions.");
        return Ok(());
    }
    if s.state.is_phase_complete(phase) {
        println!("{} is complete; nothing to resume.", phase);
        print_next_step(&s.state);
        return Ok(());
    }

    run_and_report(&mut s, phase, restart).await
}

/// `remedy monitor`: compare fresh metrics with the graduation baseline.
///
/// Without `--apply` a regression is reported as `RegressionDetected` so the
/// exit code signals it.
pub async fn cmd_monitor(cli: &Cli, project_dir: &Path, apply: bool) -> Result<()> {
    let mut s = open_session(cli, project_dir, "monitor")?;
    let outcome = s.orchestrator.monitor(&mut s.state, &mut s.log, apply).await?;

    if cli.verbose {
        if let Some(baseline) = &s.state.graduation_baseline {
            report::print_metrics("Graduation baseline", baseline);
        }
        report::print_metrics("Current", &s.state.current_metrics);
        println!();
    }

    let Some(event) = outcome.event else {
        println!("No regression against the graduation baseline.");
        return Ok(());
    };

    report::print_regression(&event);
    match outcome.re_entered {
        Some(phase) => {
            println!(
                "{} Re-entered {}. Run 'remedy {}' to remediate.",
                PIVOT,
                style(phase).yellow().bold(),
                command_name(phase)
            );
            Ok(())
        }
        None => {
            println!(
                "Run 'remedy monitor --apply' to re-enter {}.",
                event.recommended_phase
            );
            Err(WorkflowError::RegressionDetected {
                trigger: event.trigger.to_string(),
                recommended: event.recommended_phase,
            }
            .into())
        }
    }
}
