//! Initialization of the `.remedy/` workflow directory.
//!
//! `remedy init` creates the structure below. Running it again only fills in
//! whatever is missing; existing files are never overwritten.
//!
//! ```text
//! .remedy/
//! ├── remedy.toml        # configuration with every default spelled out
//! ├── .gitignore         # keeps workflow bookkeeping out of task commits
//! ├── checkpoints/
//! │   └── archive/
//! ├── reports/
//! └── logs/
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::remedy_config::{CONFIG_FILE, RemedyToml};

/// The name of the workflow directory.
pub const REMEDY_DIR: &str = ".remedy";

const SUBDIRECTORIES: [&str; 4] = ["checkpoints", "checkpoints/archive", "reports", "logs"];

/// Result of initializing a project.
#[derive(Debug)]
pub struct InitResult {
    /// Path to the .remedy directory
    pub remedy_dir: PathBuf,
    /// Whether the directory was newly created (false if it already existed)
    pub created: bool,
    /// Whether a default remedy.toml was written
    pub wrote_config: bool,
}

/// Initialize the workflow directory in `project_dir`.
///
/// The project must be a git repository: every remediation step is a commit.
pub fn init_project(project_dir: &Path) -> Result<InitResult> {
    git2::Repository::open(project_dir).with_context(|| {
        format!(
            "{} is not a git repository; run 'git init' first",
            project_dir.display()
        )
    })?;

    let remedy_dir = project_dir.join(REMEDY_DIR);
    let created = !remedy_dir.exists();

    for sub in SUBDIRECTORIES {
        let dir = remedy_dir.join(sub);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }

    let ignore_file = remedy_dir.join(".gitignore");
    if !ignore_file.exists() {
        std::fs::write(&ignore_file, "*\n")
            .with_context(|| format!("Failed to create {}", ignore_file.display()))?;
    }

    let config_path = remedy_dir.join(CONFIG_FILE);
    let wrote_config = !config_path.exists();
    if wrote_config {
        RemedyToml::default().save(&config_path)?;
    }

    Ok(InitResult {
        remedy_dir,
        created,
        wrote_config,
    })
}

/// Check if a project has a workflow directory.
pub fn is_initialized(project_dir: &Path) -> bool {
    project_dir.join(REMEDY_DIR).is_dir()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn git_dir() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        git2::Repository::init(dir.path()).unwrap();
        dir
    }

    #[test]
    fn test_init_project_creates_structure() {
        let dir = git_dir();
        let result = init_project(dir.path()).unwrap();

        assert!(result.created);
        assert!(result.wrote_config);
        assert_eq!(result.remedy_dir, dir.path().join(".remedy"));
        for sub in SUBDIRECTORIES {
            assert!(result.remedy_dir.join(sub).is_dir(), "missing {sub}");
        }
        assert!(result.remedy_dir.join("remedy.toml").is_file());
        assert!(is_initialized(dir.path()));
    }

    #[test]
    fn test_written_config_parses_to_defaults() {
        let dir = git_dir();
        init_project(dir.path()).unwrap();

        let toml = RemedyToml::load(&dir.path().join(".remedy/remedy.toml")).unwrap();
        assert_eq!(toml.thresholds.min_coverage, 0.60);
        assert!(toml.validate().is_empty());
    }

    #[test]
    fn test_init_project_is_idempotent_and_keeps_config() {
        let dir = git_dir();
        init_project(dir.path()).unwrap();
        let config = dir.path().join(".remedy/remedy.toml");
        std::fs::write(&config, "[thresholds]\nmin_coverage = 0.9\n").unwrap();

        let again = init_project(dir.path()).unwrap();

        assert!(!again.created);
        assert!(!again.wrote_config);
        assert_eq!(
            std::fs::read_to_string(&config).unwrap(),
            "[thresholds]\nmin_coverage = 0.9\n"
        );
    }

    #[test]
    fn test_init_project_completes_partial_structure() {
        let dir = git_dir();
        std::fs::create_dir_all(dir.path().join(".remedy")).unwrap();

        let result = init_project(dir.path()).unwrap();

        assert!(!result.created);
        assert!(dir.path().join(".remedy/checkpoints/archive").is_dir());
    }

    #[test]
    fn test_init_requires_git_repository() {
        let dir = tempdir().unwrap();
        let err = init_project(dir.path()).unwrap_err();
        assert!(err.to_string().contains("not a git repository"));
    }

    #[test]
    fn test_workflow_dir_ignored_by_git() {
        let dir = git_dir();
        init_project(dir.path()).unwrap();

        let repo = git2::Repository::open(dir.path()).unwrap();
        assert!(repo.is_path_ignored(".remedy/state.json").unwrap());
    }
}
