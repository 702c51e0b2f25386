//! Language toolchain handlers.
//!
//! The orchestration core talks to an ecosystem only through the `Toolchain`
//! capability set and the return shapes in `crate::metrics`. Handlers are
//! looked up by id in a `ToolchainRegistry`.

pub mod command;
pub mod process;

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::errors::{ToolError, WorkflowError};
use crate::metrics::{BuildReport, ComplexityReport, LanguageDetection, SecurityReport, TestReport};
use crate::remedy_config::RemedyToml;
use command::{CommandToolchain, PROFILES};

#[async_trait]
pub trait Toolchain: Send + Sync {
    fn id(&self) -> &str;

    fn detect(&self, root: &Path) -> LanguageDetection;

    /// Make sure a test harness exists under `targets`, then measure it.
    async fn bootstrap_tests(&self, root: &Path, targets: &[String]) -> Result<TestReport, ToolError>;

    /// Write lint/format configuration. Returns the files written.
    async fn install_quality_gates(&self, root: &Path) -> Result<Vec<PathBuf>, ToolError>;

    async fn run_tests(&self, root: &Path) -> Result<TestReport, ToolError>;

    async fn measure_complexity(&self, root: &Path) -> Result<ComplexityReport, ToolError>;

    async fn scan_security(&self, root: &Path) -> Result<SecurityReport, ToolError>;

    async fn verify_build(&self, root: &Path) -> Result<BuildReport, ToolError>;

    /// Fraction of public items documented.
    async fn measure_documentation(&self, _root: &Path) -> Result<f64, ToolError> {
        Err(ToolError::Unavailable {
            tool: self.id().to_string(),
            reason: "documentation coverage is not measured by this handler".to_string(),
        })
    }
}

/// The build/test check run after every task commit.
#[async_trait]
pub trait BuildVerifier: Send + Sync {
    async fn verify(&self, root: &Path) -> Result<BuildReport, ToolError>;
}

/// Verifies with a toolchain's `verify_build`.
pub struct ToolchainVerifier<'a>(pub &'a dyn Toolchain);

#[async_trait]
impl BuildVerifier for ToolchainVerifier<'_> {
    async fn verify(&self, root: &Path) -> Result<BuildReport, ToolError> {
        self.0.verify_build(root).await
    }
}

/// Used when no toolchain was detected: every verification is unavailable.
pub struct NoVerifier;

#[async_trait]
impl BuildVerifier for NoVerifier {
    async fn verify(&self, _root: &Path) -> Result<BuildReport, ToolError> {
        Err(ToolError::Unavailable {
            tool: "build".to_string(),
            reason: "no toolchain detected".to_string(),
        })
    }
}

pub struct ToolchainRegistry {
    handlers: HashMap<String, Box<dyn Toolchain>>,
}

impl ToolchainRegistry {
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Built-in handlers configured from `remedy.toml`.
    pub fn from_config(toml: &RemedyToml) -> Self {
        let mut registry = Self::empty();
        for profile in PROFILES {
            registry.register(Box::new(CommandToolchain::new(
                profile,
                toml.toolchain.commands.clone(),
                toml.tool_timeout_secs(),
            )));
        }
        registry
    }

    pub fn register(&mut self, handler: Box<dyn Toolchain>) {
        self.handlers.insert(handler.id().to_string(), handler);
    }

    pub fn get(&self, id: &str) -> Option<&dyn Toolchain> {
        self.handlers.get(id).map(|h| h.as_ref())
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Detection results for every handler, most confident first.
    pub fn detect_all(&self, root: &Path) -> Vec<LanguageDetection> {
        let mut detections: Vec<LanguageDetection> =
            self.handlers.values().map(|h| h.detect(root)).collect();
        detections.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.language.cmp(&b.language))
        });
        detections
    }

    /// Pick the handler for `root`: the forced id if given, otherwise the
    /// most confident detection.
    pub fn select(
        &self,
        root: &Path,
        forced: Option<&str>,
    ) -> Result<(&dyn Toolchain, LanguageDetection), WorkflowError> {
        if let Some(id) = forced {
            let handler = self.get(id).ok_or_else(|| {
                WorkflowError::Config(format!(
                    "Unknown toolchain '{}'. Available: {}",
                    id,
                    self.ids().join(", ")
                ))
            })?;
            let mut detection = handler.detect(root);
            detection.evidence.push("forced by configuration".to_string());
            return Ok((handler, detection));
        }

        let best = self
            .detect_all(root)
            .into_iter()
            .find(|d| d.confidence > 0.0)
            .ok_or_else(|| WorkflowError::ToolUnavailable {
                tool: "toolchain".to_string(),
                reason: format!("no supported toolchain detected ({})", self.ids().join(", ")),
            })?;
        let handler = self
            .get(&best.language)
            .ok_or_else(|| WorkflowError::Config(format!("Unknown toolchain '{}'", best.language)))?;
        Ok((handler, best))
    }
}
