use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use std::path::PathBuf;

use remedy::errors::{EXIT_OK, EXIT_PRECONDITION, WorkflowError};
use remedy::init::{REMEDY_DIR, is_initialized};
use remedy::phase::Phase;

mod cmd;

#[derive(Parser)]
#[command(name = "remedy")]
#[command(version, about = "Drive a repository through gated remediation phases")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the .remedy workflow directory
    Init,
    /// Detect the toolchain and capture baseline metrics
    Assess {
        /// Discard the phase checkpoint (a backup is kept) and start over
        #[arg(long)]
        restart: bool,
    },
    /// Create the standard directory layout
    Structure {
        #[arg(long)]
        restart: bool,
    },
    /// Bootstrap the test harness and measure coverage
    Testing {
        #[arg(long)]
        restart: bool,
    },
    /// Install lint configuration and measure complexity
    Quality {
        #[arg(long)]
        restart: bool,
    },
    /// Collect final metrics and evaluate readiness gates
    Validate {
        #[arg(long)]
        restart: bool,
    },
    /// Graduate a validated project
    Graduate,
    /// Continue the current phase from its checkpoint
    Resume {
        #[arg(long)]
        restart: bool,
    },
    /// Show workflow progress
    Status,
    /// Check a graduated project for regressions
    Monitor {
        /// Re-enter the recommended phase when a regression is found
        #[arg(long)]
        apply: bool,
    },
    /// Show the decision log
    Log {
        /// Only the most recent N records
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Forget workflow progress
    Reset {
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default remedy.toml file
    Init,
}

async fn run(cli: Cli) -> Result<()> {
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let log_dir = is_initialized(&project_dir).then(|| project_dir.join(REMEDY_DIR).join("logs"));
    let _guard = remedy::logging::init(log_dir.as_deref(), cli.verbose);

    match &cli.command {
        Commands::Init => cmd::cmd_init(&project_dir)?,
        Commands::Assess { restart } => {
            cmd::cmd_phase(&cli, &project_dir, Phase::Assessment, *restart).await?
        }
        Commands::Structure { restart } => {
            cmd::cmd_phase(&cli, &project_dir, Phase::Structure, *restart).await?
        }
        Commands::Testing { restart } => {
            cmd::cmd_phase(&cli, &project_dir, Phase::Testing, *restart).await?
        }
        Commands::Quality { restart } => {
            cmd::cmd_phase(&cli, &project_dir, Phase::Quality, *restart).await?
        }
        Commands::Validate { restart } => {
            cmd::cmd_phase(&cli, &project_dir, Phase::Validation, *restart).await?
        }
        Commands::Graduate => cmd::cmd_graduate(&cli, &project_dir).await?,
        Commands::Resume { restart } => cmd::cmd_resume(&cli, &project_dir, *restart).await?,
        Commands::Status => cmd::cmd_status(&project_dir, cli.verbose)?,
        Commands::Monitor { apply } => cmd::cmd_monitor(&cli, &project_dir, *apply).await?,
        Commands::Log { limit } => cmd::cmd_log(&project_dir, *limit, cli.verbose)?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
        Commands::Reset { force } => cmd::cmd_reset(&project_dir, *force)?,
    }

    Ok(())
}

fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<WorkflowError>()
        .map_or(EXIT_PRECONDITION, WorkflowError::exit_code)
}

fn report_error(err: &anyhow::Error) {
    eprintln!("{} {:#}", style("error:").red().bold(), err);
    if let Some(WorkflowError::CheckpointCorrupted { path, .. }) = err.downcast_ref::<WorkflowError>()
        && path.components().any(|c| c.as_os_str() == "checkpoints")
    {
        eprintln!(
            "{} rerun the phase command with --restart to discard the checkpoint and start the phase over",
            style("hint:").yellow().bold()
        );
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    // `run` owns the log guard, so buffered log lines are flushed before exit.
    let code = match run(cli).await {
        Ok(()) => EXIT_OK,
        Err(err) => {
            report_error(&err);
            exit_code(&err)
        }
    };
    std::process::exit(code);
}
