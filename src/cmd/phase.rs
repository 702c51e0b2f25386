//! Project setup, status, decision log and reset commands.

use anyhow::Result;
use std::path::Path;

use remedy::audit::DecisionLog;
use remedy::checkpoint::CheckpointManager;
use remedy::init::{REMEDY_DIR, init_project, is_initialized};
use remedy::interrupt::InterruptFlag;
use remedy::lock::ProjectLock;
use remedy::orchestrator::{PhaseOrchestrator, StateStore};
use remedy::phase::Phase;
use remedy::remedy_config::RemedyConfig;
use remedy::toolchain::ToolchainRegistry;
use remedy::ui::report;

use super::command_name;

pub fn cmd_init(project_dir: &Path) -> Result<()> {
    let was_initialized = is_initialized(project_dir);
    let result = init_project(project_dir)?;

    if result.created {
        println!(
            "Initialized remedy project at {}",
            result.remedy_dir.display()
        );
        println!();
        println!("Created directory structure:");
        println!("  {}/", REMEDY_DIR);
        println!("  ├── remedy.toml      # Thresholds, waivers, extra tasks");
        println!("  ├── checkpoints/     # Per-phase task progress");
        println!("  ├── reports/         # Validation and graduation gate reports");
        println!("  └── logs/            # remedy.log");
        println!();
        println!("Next steps:");
        println!("  1. Review .remedy/remedy.toml");
        println!("  2. Run `remedy assess` to capture baseline metrics");
    } else if was_initialized {
        println!(
            "Remedy project already initialized at {}",
            result.remedy_dir.display()
        );
        println!("Directory structure verified.");
    } else {
        println!(
            "Completed remedy initialization at {}",
            result.remedy_dir.display()
        );
    }
    Ok(())
}

/// Read-only; works while another run holds the lock.
pub fn cmd_status(project_dir: &Path, verbose: bool) -> Result<()> {
    if !is_initialized(project_dir) {
        println!();
        println!("Project: Not initialized");
        println!();
        println!("Run 'remedy init' to initialize the project.");
        println!();
        return Ok(());
    }

    let config = RemedyConfig::new(project_dir.to_path_buf())?;
    let registry = ToolchainRegistry::from_config(&config.toml);
    let orchestrator = PhaseOrchestrator::new(config, registry, InterruptFlag::new());
    let state = orchestrator.store().load_read_only()?;
    let active = orchestrator.checkpoints().active();

    let next = match state.current_phase.successors() {
        [next] if state.is_phase_complete(state.current_phase) => Some(*next),
        _ => None,
    };
    let check = next.map(|phase| (phase, orchestrator.can_advance_to(&state, phase)));
    report::print_status(&state, check.as_ref().map(|(p, c)| (*p, c)), &active);

    if verbose {
        report::print_metrics("Baseline", &state.baseline_metrics);
        report::print_metrics("Current", &state.current_metrics);
        if state.current_metrics.is_captured() {
            report::print_gate_report(&orchestrator.gate_report(&state));
        }
    }

    if let Some(phase) = next {
        println!("Next: remedy {}", command_name(phase));
    } else if !state.is_phase_complete(state.current_phase) && state.current_phase != Phase::Graduated {
        println!("Next: remedy {}", command_name(state.current_phase));
    }
    println!();
    Ok(())
}

pub fn cmd_log(project_dir: &Path, limit: Option<usize>, verbose: bool) -> Result<()> {
    let config = RemedyConfig::new(project_dir.to_path_buf())?;
    let records = DecisionLog::read_all(&config.decision_log())?;
    let skip = limit.map_or(0, |n| records.len().saturating_sub(n));
    report::print_decisions(&records[skip..], verbose);
    Ok(())
}

/// Forget workflow progress. The decision log is append-only and is kept.
pub fn cmd_reset(project_dir: &Path, force: bool) -> Result<()> {
    use dialoguer::Confirm;

    if !is_initialized(project_dir) {
        println!("Project not initialized; nothing to reset.");
        return Ok(());
    }

    let config = RemedyConfig::new(project_dir.to_path_buf())?;
    let _lock = ProjectLock::acquire(&config.lock_file(), "reset")?;

    if !force {
        let confirm = Confirm::new()
            .with_prompt("This will reset all workflow progress. Are you sure?")
            .default(false)
            .interact()
            .unwrap_or(false);

        if !confirm {
            println!("Reset cancelled");
            return Ok(());
        }
    }

    let store = StateStore::new(config.state_file());
    store.reset()?;

    let checkpoints = CheckpointManager::new(
        &config.checkpoint_dir(),
        config.toml.checkpoint.stale_after_secs,
    );
    for phase in Phase::ALL {
        if let Some(backup) = checkpoints.discard(phase)? {
            tracing::info!(phase = %phase, backup = %backup.display(), "Discarded checkpoint");
        }
    }

    println!("Reset complete");
    Ok(())
}
