//! Unified configuration for the remediation workflow.
//!
//! Settings are read from `.remedy/remedy.toml`. Every section has defaults,
//! so a missing or empty file is a valid configuration.
//!
//! # Configuration File Format
//!
//! ```toml
//! [project]
//! name = "my-service"
//! toolchain = "rust"
//!
//! [thresholds]
//! min_coverage = 0.60
//! max_average_complexity = 10.0
//! max_critical_vulnerabilities = 0
//! min_documentation_coverage = 0.50
//! max_blob_bytes = 5242880
//!
//! [regression]
//! coverage_drop_points = 0.10
//! complexity_increase_ratio = 0.20
//!
//! [checkpoint]
//! stale_after_secs = 1800
//!
//! [tools]
//! timeout_secs = 1800
//!
//! [toolchain.commands]
//! build = ["cargo", "build"]
//! tests = ["./scripts/coverage.sh"]
//!
//! [layout]
//! required_dirs = ["src", "tests", "docs"]
//!
//! [[gates.waivers]]
//! gate = "documentation_coverage"
//! reason = "generated SDK code"
//! approved_by = "platform-team"
//!
//! [[tasks]]
//! phase = "structure"
//! id = "structure-format"
//! description = "Apply formatter"
//! category = "refactor"
//! run = ["cargo", "fmt"]
//! ```

use chrono::TimeDelta;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::errors::WorkflowError;
use crate::gates::GATE_NAMES;
use crate::phase::{Phase, default_plan};

/// Name of the configuration file inside `.remedy/`.
pub const CONFIG_FILE: &str = "remedy.toml";

/// Project-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name (optional, defaults to directory name)
    #[serde(default)]
    pub name: Option<String>,
    /// Force a toolchain handler instead of auto-detecting one
    #[serde(default)]
    pub toolchain: Option<String>,
}

/// Readiness thresholds used by requirement predicates and gates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdsConfig {
    #[serde(default = "default_min_coverage")]
    pub min_coverage: f64,
    #[serde(default = "default_max_average_complexity")]
    pub max_average_complexity: f64,
    #[serde(default)]
    pub max_critical_vulnerabilities: u32,
    #[serde(default = "default_min_documentation_coverage")]
    pub min_documentation_coverage: f64,
    #[serde(default = "default_max_blob_bytes")]
    pub max_blob_bytes: u64,
}

fn default_min_coverage() -> f64 {
    0.60
}

fn default_max_average_complexity() -> f64 {
    10.0
}

fn default_min_documentation_coverage() -> f64 {
    0.50
}

fn default_max_blob_bytes() -> u64 {
    5 * 1024 * 1024
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            min_coverage: default_min_coverage(),
            max_average_complexity: default_max_average_complexity(),
            max_critical_vulnerabilities: 0,
            min_documentation_coverage: default_min_documentation_coverage(),
            max_blob_bytes: default_max_blob_bytes(),
        }
    }
}

/// Post-graduation regression thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionConfig {
    /// How far (as a fraction) coverage may fall below `min_coverage`.
    #[serde(default = "default_coverage_drop_points")]
    pub coverage_drop_points: f64,
    /// Allowed relative growth of average complexity over the baseline.
    #[serde(default = "default_complexity_increase_ratio")]
    pub complexity_increase_ratio: f64,
}

fn default_coverage_drop_points() -> f64 {
    0.10
}

fn default_complexity_increase_ratio() -> f64 {
    0.20
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self {
            coverage_drop_points: default_coverage_drop_points(),
            complexity_increase_ratio: default_complexity_increase_ratio(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// A checkpoint untouched for this long with pending tasks counts as interrupted.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

fn default_stale_after_secs() -> u64 {
    1800
}

impl CheckpointConfig {
    /// The stale window as a duration, or `None` when it does not fit one.
    pub fn window(secs: u64) -> Option<TimeDelta> {
        i64::try_from(secs).ok().and_then(TimeDelta::try_seconds)
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Upper bound for any single subprocess.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    1800
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Command overrides for the selected toolchain handler (argv arrays).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolchainCommands {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docs: Option<Vec<String>>,
}

impl ToolchainCommands {
    pub fn entries(&self) -> [(&'static str, Option<&Vec<String>>); 5] {
        [
            ("build", self.build.as_ref()),
            ("tests", self.tests.as_ref()),
            ("complexity", self.complexity.as_ref()),
            ("security", self.security.as_ref()),
            ("docs", self.docs.as_ref()),
        ]
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolchainSection {
    #[serde(default)]
    pub commands: ToolchainCommands,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutConfig {
    #[serde(default = "default_required_dirs")]
    pub required_dirs: Vec<String>,
}

fn default_required_dirs() -> Vec<String> {
    vec!["src".to_string(), "tests".to_string(), "docs".to_string()]
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            required_dirs: default_required_dirs(),
        }
    }
}

/// A documented exception for a failing readiness gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waiver {
    pub gate: String,
    pub reason: String,
    #[serde(default)]
    pub approved_by: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatesSection {
    #[serde(default)]
    pub waivers: Vec<Waiver>,
}

/// An extra task appended to a phase's built-in plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtraTask {
    #[serde(deserialize_with = "deserialize_phase")]
    pub phase: Phase,
    pub id: String,
    pub description: String,
    #[serde(default = "default_task_category")]
    pub category: String,
    pub run: Vec<String>,
}

fn default_task_category() -> String {
    "chore".to_string()
}

fn deserialize_phase<'de, D>(deserializer: D) -> Result<Phase, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}

/// The complete remedy.toml configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemedyToml {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub thresholds: ThresholdsConfig,
    #[serde(default)]
    pub regression: RegressionConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub toolchain: ToolchainSection,
    #[serde(default)]
    pub layout: LayoutConfig,
    #[serde(default)]
    pub gates: GatesSection,
    #[serde(default)]
    pub tasks: Vec<ExtraTask>,
}

impl RemedyToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, WorkflowError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| WorkflowError::io(path, e))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, WorkflowError> {
        let toml: Self = toml::from_str(content)
            .map_err(|e| WorkflowError::Config(format!("Failed to parse {}: {}", CONFIG_FILE, e)))?;
        toml.check()?;
        Ok(toml)
    }

    /// Problems that make the file unusable, as opposed to `validate` warnings.
    fn check(&self) -> Result<(), WorkflowError> {
        if CheckpointConfig::window(self.checkpoint.stale_after_secs).is_none() {
            return Err(WorkflowError::Config(format!(
                "checkpoint.stale_after_secs {} is out of range",
                self.checkpoint.stale_after_secs
            )));
        }
        let conflicts = self.task_id_conflicts();
        if !conflicts.is_empty() {
            return Err(WorkflowError::Config(conflicts.join("; ")));
        }
        Ok(())
    }

    /// Extra task ids that repeat each other or a built-in task id.
    pub fn task_id_conflicts(&self) -> Vec<String> {
        let builtin: HashSet<String> = Phase::ALL
            .iter()
            .flat_map(|phase| default_plan(*phase))
            .map(|task| task.id)
            .collect();
        let mut seen = HashSet::new();
        let mut conflicts = Vec::new();
        for task in &self.tasks {
            if builtin.contains(&task.id) {
                conflicts.push(format!("Task id '{}' is reserved for a built-in task", task.id));
            } else if !seen.insert(task.id.as_str()) {
                conflicts.push(format!("Duplicate task id '{}'", task.id));
            }
        }
        conflicts
    }

    /// Load `.remedy/remedy.toml`, returning defaults if it doesn't exist.
    pub fn load_or_default(remedy_dir: &Path) -> Result<Self, WorkflowError> {
        let path = remedy_dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), WorkflowError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| WorkflowError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| WorkflowError::io(path, e))
    }

    /// Toolchain to force, with the environment taking precedence over the file.
    pub fn forced_toolchain(&self) -> Option<String> {
        std::env::var("REMEDY_TOOLCHAIN")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.project.toolchain.clone())
    }

    /// Subprocess timeout in seconds (env → file → default).
    pub fn tool_timeout_secs(&self) -> u64 {
        std::env::var("REMEDY_TOOL_TIMEOUT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(self.tools.timeout_secs)
    }

    pub fn waiver_for(&self, gate: &str) -> Option<&Waiver> {
        self.gates.waivers.iter().find(|w| w.gate == gate)
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let t = &self.thresholds;

        if !(0.0..=1.0).contains(&t.min_coverage) {
            warnings.push(format!(
                "thresholds.min_coverage {} is outside 0.0..=1.0",
                t.min_coverage
            ));
        }
        if !(0.0..=1.0).contains(&t.min_documentation_coverage) {
            warnings.push(format!(
                "thresholds.min_documentation_coverage {} is outside 0.0..=1.0",
                t.min_documentation_coverage
            ));
        }
        if t.max_average_complexity <= 0.0 {
            warnings.push("thresholds.max_average_complexity must be positive".to_string());
        }
        if self.regression.coverage_drop_points < 0.0 {
            warnings.push("regression.coverage_drop_points must not be negative".to_string());
        }
        if self.regression.complexity_increase_ratio < 0.0 {
            warnings.push("regression.complexity_increase_ratio must not be negative".to_string());
        }
        if self.tools.timeout_secs == 0 {
            warnings.push("tools.timeout_secs must be greater than zero".to_string());
        }

        for waiver in &self.gates.waivers {
            if !GATE_NAMES.contains(&waiver.gate.as_str()) {
                warnings.push(format!(
                    "Waiver names unknown gate '{}'. Known gates: {}",
                    waiver.gate,
                    GATE_NAMES.join(", ")
                ));
            }
            if waiver.reason.trim().is_empty() {
                warnings.push(format!("Waiver for '{}' has no reason", waiver.gate));
            }
        }

        for (name, argv) in self.toolchain.commands.entries() {
            if let Some(argv) = argv
                && argv.is_empty()
            {
                warnings.push(format!("toolchain.commands.{} is an empty command", name));
            }
        }

        for task in &self.tasks {
            if task.run.is_empty() {
                warnings.push(format!("Task '{}' has an empty run command", task.id));
            }
            if task.phase == Phase::Graduated {
                warnings.push(format!(
                    "Task '{}' targets the Graduated phase, which runs no tasks",
                    task.id
                ));
            }
        }

        warnings
    }
}

/// Configuration combined with the resolved project paths.
#[derive(Debug, Clone)]
pub struct RemedyConfig {
    /// Path to the project directory
    pub project_dir: PathBuf,
    /// Path to the .remedy directory
    pub remedy_dir: PathBuf,
    /// Parsed remedy.toml configuration
    pub toml: RemedyToml,
    /// CLI override: verbose mode
    pub verbose: bool,
}

impl RemedyConfig {
    /// Create a new RemedyConfig from a project directory.
    pub fn new(project_dir: PathBuf) -> Result<Self, WorkflowError> {
        let project_dir = project_dir
            .canonicalize()
            .map_err(|e| WorkflowError::io(&project_dir, e))?;
        let remedy_dir = project_dir.join(crate::init::REMEDY_DIR);
        let toml = RemedyToml::load_or_default(&remedy_dir)?;

        Ok(Self {
            project_dir,
            remedy_dir,
            toml,
            verbose: false,
        })
    }

    /// Create RemedyConfig with CLI overrides.
    pub fn with_cli_args(project_dir: PathBuf, verbose: bool) -> Result<Self, WorkflowError> {
        let mut config = Self::new(project_dir)?;
        config.verbose = verbose;
        Ok(config)
    }

    pub fn config_file(&self) -> PathBuf {
        self.remedy_dir.join(CONFIG_FILE)
    }

    pub fn state_file(&self) -> PathBuf {
        self.remedy_dir.join("state.json")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.remedy_dir.join("lock")
    }

    pub fn decision_log(&self) -> PathBuf {
        self.remedy_dir.join("decisions.jsonl")
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.remedy_dir.join("checkpoints")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.remedy_dir.join("reports")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.remedy_dir.join("logs")
    }

    /// Create every directory the workflow writes into.
    pub fn ensure_directories(&self) -> Result<(), WorkflowError> {
        for dir in [
            self.remedy_dir.clone(),
            self.checkpoint_dir().join("archive"),
            self.reports_dir(),
            self.log_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| WorkflowError::io(&dir, e))?;
        }
        Ok(())
    }

    /// Validate configuration and return warnings.
    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_empty_uses_defaults() {
        let toml = RemedyToml::parse("").unwrap();
        assert_eq!(toml.thresholds.min_coverage, 0.60);
        assert_eq!(toml.thresholds.max_average_complexity, 10.0);
        assert_eq!(toml.thresholds.max_critical_vulnerabilities, 0);
        assert_eq!(toml.regression.coverage_drop_points, 0.10);
        assert_eq!(toml.regression.complexity_increase_ratio, 0.20);
        assert_eq!(toml.tools.timeout_secs, 1800);
        assert_eq!(toml.layout.required_dirs, vec!["src", "tests", "docs"]);
        assert!(toml.validate().is_empty());
    }

    #[test]
    fn test_parse_thresholds_and_commands() {
        let content = r#"
[project]
toolchain = "python"

[thresholds]
min_coverage = 0.8
max_average_complexity = 7.5

[toolchain.commands]
build = ["make", "build"]
security = ["./audit.sh"]
"#;
        let toml = RemedyToml::parse(content).unwrap();
        assert_eq!(toml.project.toolchain.as_deref(), Some("python"));
        assert_eq!(toml.thresholds.min_coverage, 0.8);
        assert_eq!(toml.thresholds.max_average_complexity, 7.5);
        assert_eq!(
            toml.toolchain.commands.build,
            Some(vec!["make".to_string(), "build".to_string()])
        );
        assert!(toml.toolchain.commands.tests.is_none());
    }

    #[test]
    fn test_parse_waivers_and_tasks() {
        let content = r#"
[[gates.waivers]]
gate = "documentation_coverage"
reason = "generated SDK code"
approved_by = "platform-team"

[[tasks]]
phase = "structure"
id = "structure-format"
description = "Apply formatter"
run = ["cargo", "fmt"]
"#;
        let toml = RemedyToml::parse(content).unwrap();
        let waiver = toml.waiver_for("documentation_coverage").unwrap();
        assert_eq!(waiver.approved_by.as_deref(), Some("platform-team"));
        assert!(toml.waiver_for("coverage").is_none());

        assert_eq!(toml.tasks.len(), 1);
        assert_eq!(toml.tasks[0].phase, Phase::Structure);
        assert_eq!(toml.tasks[0].category, "chore");
    }

    #[test]
    fn test_parse_invalid_is_config_error() {
        let err = RemedyToml::parse("[thresholds\nmin_coverage = ").unwrap_err();
        assert!(matches!(err, WorkflowError::Config(_)));
        assert_eq!(err.exit_code(), crate::errors::EXIT_CONFIG);
    }

    #[test]
    fn test_parse_unknown_task_phase_is_config_error() {
        let content = r#"
[[tasks]]
phase = "deploy"
id = "x"
description = "x"
run = ["true"]
"#;
        assert!(RemedyToml::parse(content).is_err());
    }

    #[test]
    fn test_validate_reports_problems() {
        let content = r#"
[thresholds]
min_coverage = 1.5

[toolchain.commands]
build = []

[[gates.waivers]]
gate = "speed"
reason = ""

[[tasks]]
phase = "graduated"
id = "dup"
description = "x"
run = []

[[tasks]]
phase = "testing"
id = "extra-check"
description = "y"
run = ["true"]
"#;
        let warnings = RemedyToml::parse(content).unwrap().validate();
        let joined = warnings.join("\n");
        assert!(joined.contains("min_coverage"));
        assert!(joined.contains("toolchain.commands.build"));
        assert!(joined.contains("unknown gate 'speed'"));
        assert!(joined.contains("has no reason"));
        assert!(joined.contains("empty run command"));
        assert!(joined.contains("Graduated phase"));
    }

    #[test]
    fn test_duplicate_task_ids_are_config_errors() {
        let content = r#"
[[tasks]]
phase = "structure"
id = "dup"
description = "x"
run = ["true"]

[[tasks]]
phase = "testing"
id = "dup"
description = "y"
run = ["true"]
"#;
        let err = RemedyToml::parse(content).unwrap_err();
        assert!(matches!(err, WorkflowError::Config(_)));
        assert!(err.to_string().contains("Duplicate task id 'dup'"));
    }

    #[test]
    fn test_task_id_colliding_with_builtin_is_rejected() {
        let content = r#"
[[tasks]]
phase = "testing"
id = "testing-measure"
description = "Shadow the measurement"
run = ["true"]
"#;
        let err = RemedyToml::parse(content).unwrap_err();
        assert_eq!(err.exit_code(), crate::errors::EXIT_CONFIG);
        assert!(err.to_string().contains("'testing-measure' is reserved"));
    }

    #[test]
    fn test_out_of_range_stale_window_is_config_error() {
        for secs in ["10000000000000000", "9223372036854775807"] {
            let content = format!("[checkpoint]\nstale_after_secs = {}\n", secs);
            let err = RemedyToml::parse(&content).unwrap_err();
            assert!(matches!(err, WorkflowError::Config(_)), "{secs}");
            assert!(err.to_string().contains("stale_after_secs"));
        }
        assert!(RemedyToml::parse("[checkpoint]\nstale_after_secs = 86400\n").is_ok());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempdir().unwrap();
        let toml = RemedyToml::load_or_default(dir.path()).unwrap();
        assert_eq!(toml.thresholds.min_coverage, 0.60);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut toml = RemedyToml::default();
        toml.thresholds.min_coverage = 0.75;
        toml.gates.waivers.push(Waiver {
            gate: "layout_compliant".into(),
            reason: "monorepo".into(),
            approved_by: None,
        });
        toml.save(&path).unwrap();

        let loaded = RemedyToml::load(&path).unwrap();
        assert_eq!(loaded.thresholds.min_coverage, 0.75);
        assert_eq!(loaded.gates.waivers.len(), 1);
    }

    #[test]
    fn test_config_paths() {
        let dir = tempdir().unwrap();
        let config = RemedyConfig::new(dir.path().to_path_buf()).unwrap();
        let root = dir.path().canonicalize().unwrap();
        assert_eq!(config.remedy_dir, root.join(".remedy"));
        assert_eq!(config.state_file(), root.join(".remedy/state.json"));
        assert_eq!(config.lock_file(), root.join(".remedy/lock"));
        assert_eq!(config.decision_log(), root.join(".remedy/decisions.jsonl"));

        config.ensure_directories().unwrap();
        assert!(config.checkpoint_dir().join("archive").exists());
        assert!(config.reports_dir().exists());
        assert!(config.log_dir().exists());
    }
}
