//! Plain printed reports: workflow status, gate tables, transition checks
//! and the decision log.

use console::style;

use crate::audit::{DecisionKind, DecisionRecord};
use crate::checkpoint::Checkpoint;
use crate::gates::{GateReport, ReadinessGate, format_value};
use crate::metrics::MetricsSnapshot;
use crate::orchestrator::state::{COMPLETED, ENTERED};
use crate::orchestrator::{TransitionCheck, WorkflowState};
use crate::phase::Phase;
use crate::regression::ReEntryEvent;
use crate::ui::icons::{BLOCKER, CHECK, CROSS, GRADUATE, PIVOT, PROGRESS, WARN};

/// One row of the phase table in `remedy status`.
fn phase_marker(state: &WorkflowState, phase: Phase) -> String {
    if state.is_phase_complete(phase) {
        format!("{}", style("done").green())
    } else if state.current_phase == phase {
        format!("{}", style("current").yellow().bold())
    } else if state.timestamp(phase, ENTERED).is_some() {
        format!("{}", style("entered").dim())
    } else {
        format!("{}", style("pending").dim())
    }
}

pub fn print_status(
    state: &WorkflowState,
    next: Option<(Phase, &TransitionCheck)>,
    active: &[Checkpoint],
) {
    println!();
    println!("Remediation Status");
    println!("==================");
    println!();
    println!("Current phase: {}", style(state.current_phase).yellow().bold());
    if state.graduated {
        println!("Graduated:     {}yes", GRADUATE);
    }
    if let Some(toolchain) = &state.toolchain {
        println!("Toolchain:     {}", toolchain);
    }
    println!();

    println!("{:<12} {:<10} Completed", "Phase", "Status");
    println!("{:<12} {:<10} ---------", "------------", "----------");
    for phase in Phase::ALL {
        let completed = state
            .timestamp(phase, COMPLETED)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        // Styled markers carry escape codes; pad on the plain width.
        let marker = phase_marker(state, phase);
        let pad = 10usize.saturating_sub(console::measure_text_width(&marker));
        println!("{:<12} {}{} {}", phase.to_string(), marker, " ".repeat(pad), completed);
    }
    println!();

    for checkpoint in active {
        println!(
            "{} Checkpoint for {}: {} of {} tasks complete{}",
            PROGRESS,
            checkpoint.phase,
            checkpoint.completed_count(),
            checkpoint.tasks.len(),
            if checkpoint.interrupted {
                format!(" {}", style("(interrupted)").yellow())
            } else {
                String::new()
            }
        );
        for id in checkpoint.failed_ids() {
            println!("    {} {} failed", CROSS, id);
        }
    }
    if !active.is_empty() {
        println!("  Run 'remedy resume' to continue.");
        println!();
    }

    if let Some(event) = state.latest_re_entry() {
        print_regression(event);
    }

    if let Some((phase, check)) = next {
        print_transition_check(state.current_phase, phase, check);
    }
}

pub fn print_metrics(label: &str, metrics: &MetricsSnapshot) {
    if !metrics.is_captured() {
        println!("{}: not captured", label);
        return;
    }
    println!("{}:", label);
    println!("  coverage          {:.2}", metrics.coverage);
    println!(
        "  complexity        avg {:.2}, max {:.2}",
        metrics.complexity.average, metrics.complexity.maximum
    );
    println!(
        "  vulnerabilities   {} critical, {} high, {} total",
        metrics.vulnerabilities.critical,
        metrics.vulnerabilities.high,
        metrics.vulnerabilities.total()
    );
    println!("  build passing     {}", metrics.build_passing);
    match metrics.documentation_coverage {
        Some(docs) => println!("  documentation     {:.2}", docs),
        None => println!("  documentation     -"),
    }
    println!("  history findings  {}", metrics.history_findings);
    println!("  layout compliant  {}", metrics.layout_compliant);
    for limitation in &metrics.unavailable {
        println!("  {} {}", WARN, style(limitation).yellow());
    }
}

pub fn print_transition_check(from: Phase, to: Phase, check: &TransitionCheck) {
    if check.allowed {
        println!("{} {} -> {} is ready", CHECK, from, to);
    } else if check.unmet.is_empty() {
        println!("{} {}", CROSS, check.reason);
    } else {
        println!("{} {} -> {} is blocked:", BLOCKER, from, to);
        for unmet in &check.unmet {
            println!("    - {}", unmet);
        }
    }
    println!();
}

fn gate_value(gate: &ReadinessGate) -> String {
    gate.current_value
        .map(format_value)
        .unwrap_or_else(|| "-".to_string())
}

pub fn print_gate_report(report: &GateReport) {
    println!();
    println!(
        "{:<26} {:<10} {:<12} Result",
        "Gate", "Value", "Threshold"
    );
    println!(
        "{:<26} {:<10} {:<12} ------",
        "--------------------------", "----------", "------------"
    );
    for gate in &report.gates {
        let result = if gate.passed {
            format!("{}", style("pass").green())
        } else if gate.is_waived() {
            format!("{}", style("waived").yellow())
        } else {
            format!("{}", style("FAIL").red().bold())
        };
        println!(
            "{:<26} {:<10} {:<12} {}",
            gate.name,
            gate_value(gate),
            format!("{} {}", gate.direction.symbol(), format_value(gate.threshold)),
            result
        );
        for condition in &gate.exception_conditions {
            println!("    {} waiver: {}", style("↳").dim(), condition);
        }
    }
    println!();
    let blocking = report.blocking_failures();
    if blocking.is_empty() {
        println!("{} All readiness gates satisfied", CHECK);
    } else {
        for gap in blocking {
            println!("{} {}", CROSS, gap);
        }
    }
    println!();
}

pub fn print_regression(event: &ReEntryEvent) {
    println!(
        "{} Regression at {}: {}",
        PIVOT,
        event.detected_at.format("%Y-%m-%d %H:%M:%S"),
        event.describe()
    );
    println!();
}

fn kind_style(kind: DecisionKind) -> console::StyledObject<String> {
    let name = kind.to_string();
    match kind {
        DecisionKind::TaskReverted
        | DecisionKind::TransitionRejected
        | DecisionKind::ToolFailure
        | DecisionKind::RegressionDetected => style(name).red(),
        DecisionKind::ToolUnavailable
        | DecisionKind::WaiverApplied
        | DecisionKind::Interrupted
        | DecisionKind::ReEntered => style(name).yellow(),
        DecisionKind::TaskCommitted | DecisionKind::PhaseCompleted => style(name).green(),
        _ => style(name).dim(),
    }
}

pub fn print_decisions(records: &[DecisionRecord], verbose: bool) {
    if records.is_empty() {
        println!("No decisions recorded yet.");
        return;
    }
    for record in records {
        let task = record
            .task_id
            .as_deref()
            .map(|t| format!(" [{}]", t))
            .unwrap_or_default();
        println!(
            "{} {:<10} {:<20}{} {}",
            style(record.timestamp.format("%Y-%m-%d %H:%M:%S")).dim(),
            record.phase.to_string(),
            kind_style(record.kind),
            task,
            record.message
        );
        if verbose && let Some(detail) = &record.detail {
            for line in detail.lines() {
                println!("      {}", style(line).dim());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_marker_reflects_progress() {
        let mut state = WorkflowState {
            current_phase: Phase::Testing,
            ..Default::default()
        };
        state.mark_complete(Phase::Assessment);
        state.stamp(Phase::Structure, ENTERED, chrono::Utc::now());

        console::set_colors_enabled(false);
        assert_eq!(phase_marker(&state, Phase::Assessment), "done");
        assert_eq!(phase_marker(&state, Phase::Structure), "entered");
        assert_eq!(phase_marker(&state, Phase::Testing), "current");
        assert_eq!(phase_marker(&state, Phase::Quality), "pending");
    }

    #[test]
    fn test_unmeasured_gate_shows_dash() {
        let gate = ReadinessGate {
            name: "documentation_coverage".into(),
            direction: crate::gates::GateDirection::AtLeast,
            threshold: 0.5,
            current_value: None,
            passed: false,
            exception_conditions: Vec::new(),
        };
        assert_eq!(gate_value(&gate), "-");
        assert_eq!(gate_value(&ReadinessGate { current_value: Some(0.75), ..gate }), "0.75");
    }
}
