//! Configuration view and validation commands, `remedy config`.

use anyhow::Result;
use std::path::Path;

use remedy::init::REMEDY_DIR;
use remedy::remedy_config::{CONFIG_FILE, RemedyToml};

use super::super::ConfigCommands;

fn print_sections(toml: &RemedyToml) {
    if toml.project.name.is_some() || toml.project.toolchain.is_some() {
        println!("[project]");
        if let Some(name) = &toml.project.name {
            println!("  name = \"{}\"", name);
        }
        if let Some(toolchain) = &toml.project.toolchain {
            println!("  toolchain = \"{}\"", toolchain);
        }
        println!();
    }

    let t = &toml.thresholds;
    println!("[thresholds]");
    println!("  min_coverage = {}", t.min_coverage);
    println!("  max_average_complexity = {}", t.max_average_complexity);
    println!("  max_critical_vulnerabilities = {}", t.max_critical_vulnerabilities);
    println!("  min_documentation_coverage = {}", t.min_documentation_coverage);
    println!("  max_blob_bytes = {}", t.max_blob_bytes);
    println!();

    println!("[regression]");
    println!("  coverage_drop_points = {}", toml.regression.coverage_drop_points);
    println!(
        "  complexity_increase_ratio = {}",
        toml.regression.complexity_increase_ratio
    );
    println!();

    println!("[checkpoint]");
    println!("  stale_after_secs = {}", toml.checkpoint.stale_after_secs);
    println!();

    let commands: Vec<_> = toml
        .toolchain
        .commands
        .entries()
        .into_iter()
        .filter_map(|(name, argv)| argv.map(|a| (name, a)))
        .collect();
    if !commands.is_empty() {
        println!("[toolchain.commands]");
        for (name, argv) in commands {
            println!("  {} = {:?}", name, argv);
        }
        println!();
    }

    println!("[layout]");
    println!("  required_dirs = {:?}", toml.layout.required_dirs);
    println!();

    for waiver in &toml.gates.waivers {
        println!("[[gates.waivers]]");
        println!("  gate = \"{}\"", waiver.gate);
        println!("  reason = \"{}\"", waiver.reason);
        if let Some(by) = &waiver.approved_by {
            println!("  approved_by = \"{}\"", by);
        }
        println!();
    }

    for task in &toml.tasks {
        println!("[[tasks]]");
        println!("  phase = \"{}\"", task.phase.slug());
        println!("  id = \"{}\"", task.id);
        println!("  description = \"{}\"", task.description);
        println!("  category = \"{}\"", task.category);
        println!("  run = {:?}", task.run);
        println!();
    }
}

pub fn cmd_config(project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    let remedy_dir = project_dir.join(REMEDY_DIR);
    let config_path = remedy_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Remedy Configuration");
            println!("====================");
            println!();

            let toml = if config_path.exists() {
                println!("Config file: {}", config_path.display());
                RemedyToml::load(&config_path)?
            } else {
                println!("No remedy.toml found at {}", config_path.display());
                println!("Using default configuration.");
                RemedyToml::default()
            };
            println!();
            print_sections(&toml);

            // Effective values include environment overrides.
            println!("Effective values (with env overrides):");
            match toml.forced_toolchain() {
                Some(id) => println!("  toolchain = \"{}\"", id),
                None => println!("  toolchain = (auto-detect)"),
            }
            println!("  tool_timeout_secs = {}", toml.tool_timeout_secs());
            println!();
            if !config_path.exists() {
                println!("Run 'remedy config init' to create a remedy.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No remedy.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = RemedyToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("remedy.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if !remedy_dir.exists() {
                std::fs::create_dir_all(&remedy_dir)?;
            }

            RemedyToml::default().save(&config_path)?;

            println!("Created remedy.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [thresholds] coverage, complexity and vulnerability limits");
            println!("  - [toolchain.commands] build/test/metric commands");
            println!("  - [[gates.waivers]] documented exceptions for failing gates");
            println!("  - [[tasks]] extra per-phase tasks");
            println!();
        }
    }

    Ok(())
}
