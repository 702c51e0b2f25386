use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::orchestrator::{RunObserver, TaskEvent};
use crate::phase::{Phase, TaskSpec};
use crate::ui::icons::{CHECK, COMMIT, CROSS, REVERT, SKIP, SPARKLE, UNCHANGED, WARN};
use crate::util;

/// Terminal UI for a phase run, rendered via `indicatif` progress bars.
///
/// Two bars are stacked vertically:
/// - Task bar: how many tasks of the phase plan are complete
/// - Spinner: the task currently executing
///
/// Per-task result lines are printed above the bars through `MultiProgress`.
pub struct PhaseUI {
    multi: MultiProgress,
    task_bar: ProgressBar,
    spinner: ProgressBar,
    verbose: bool,
}

impl PhaseUI {
    /// Create the UI. Bars stay hidden until `phase_started` sizes them.
    pub fn new(verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let task_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let task_bar = multi.add(ProgressBar::new(0));
        task_bar.set_style(task_style);
        task_bar.set_prefix("Tasks");

        let spinner_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");

        let spinner = multi.add(ProgressBar::new_spinner());
        spinner.set_style(spinner_style);
        spinner.set_prefix("  Now");

        Self {
            multi,
            task_bar,
            spinner,
            verbose,
        }
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` if the rich UI fails.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    fn print_separator(&self) {
        self.print_line(format!("{}", style("═".repeat(70)).cyan()));
    }

    fn print_phase_header(&self, phase: Phase, total: usize) {
        self.print_line("");
        self.print_separator();
        self.print_line(format!(
            "{} Phase {}: {} task(s)",
            style("▶").green().bold(),
            style(phase).yellow().bold(),
            total
        ));
        self.print_separator();
        self.print_line("");
    }
}

impl RunObserver for PhaseUI {
    fn phase_started(&self, phase: Phase, total: usize, already_complete: usize) {
        self.print_phase_header(phase, total);
        if already_complete > 0 {
            self.print_line(format!(
                "  {} Resuming: {} of {} tasks already complete",
                style("↻").cyan(),
                style(already_complete).green(),
                total
            ));
        }
        self.task_bar.set_length(total as u64);
        self.task_bar.set_position(already_complete as u64);
        self.task_bar.set_message(format!("{}", style(phase).yellow()));
    }

    fn task_started(&self, task: &TaskSpec) {
        self.spinner.set_message(format!(
            "{} {}",
            style(&task.id).cyan(),
            style(format!("({})", task.description)).dim()
        ));
        self.spinner.enable_steady_tick(Duration::from_millis(100));
    }

    fn task_finished(&self, task: &TaskSpec, event: &TaskEvent) {
        let line = match event {
            TaskEvent::AlreadyComplete => {
                if self.verbose {
                    self.print_line(format!(
                        "    {} {}",
                        style("·").dim(),
                        style(format!("{} already complete", task.id)).dim()
                    ));
                }
                return;
            }
            TaskEvent::Committed { commit_ref, verified } => {
                let short = &commit_ref[..commit_ref.len().min(8)];
                let note = if *verified {
                    String::new()
                } else {
                    format!(" {}", style("(build not verified)").yellow())
                };
                format!(
                    "  {} {} {}{}",
                    COMMIT,
                    task.description,
                    style(short).dim(),
                    note
                )
            }
            TaskEvent::Unchanged => format!(
                "  {} {} {}",
                UNCHANGED,
                task.description,
                style("(no changes)").dim()
            ),
            TaskEvent::Skipped { reason } => format!(
                "  {} {} {}",
                SKIP,
                task.description,
                style(format!("skipped: {}", reason)).yellow()
            ),
            TaskEvent::Reverted { output } => {
                let mut line = format!(
                    "  {} {} {}",
                    REVERT,
                    task.description,
                    style("broke the build and was reverted").red().bold()
                );
                if self.verbose {
                    for out in util::tail(output, 800).lines() {
                        line.push_str(&format!("\n      {}", style(out).dim()));
                    }
                }
                line
            }
            TaskEvent::Failed { message } => format!(
                "  {} {} {}",
                CROSS,
                task.description,
                style(message).red()
            ),
        };
        self.task_bar.inc(1);
        self.print_line(line);
    }

    fn phase_finished(&self, phase: Phase, ok: bool) {
        self.spinner.finish_and_clear();
        if ok {
            self.task_bar
                .finish_with_message(format!("{} {}", CHECK, style(phase).green()));
            self.print_line(format!(
                "\n{} Phase {} complete!\n",
                SPARKLE,
                style(phase).green().bold()
            ));
        } else {
            self.task_bar.abandon_with_message(format!("{} {}", WARN, style(phase).red()));
            self.print_line(format!(
                "\n{} Phase {} did not finish\n",
                CROSS,
                style(phase).red().bold()
            ));
        }
    }
}
