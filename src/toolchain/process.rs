//! Subprocess execution for toolchain commands.

use serde::de::DeserializeOwned;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::errors::ToolError;
use crate::util::tail;

/// Characters of stdout/stderr kept in errors and reports.
const OUTPUT_TAIL: usize = 4000;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Tail of stderr followed by stdout, for logs.
    pub fn combined_tail(&self) -> String {
        let mut combined = String::new();
        if !self.stderr.trim().is_empty() {
            combined.push_str(self.stderr.trim());
        }
        if !self.stdout.trim().is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str(self.stdout.trim());
        }
        tail(&combined, OUTPUT_TAIL)
    }
}

/// Run `argv` in `root` and wait for it, up to `timeout_secs`.
///
/// The child gets its own process group so a terminal interrupt reaches only
/// this process; the orchestrator decides when to stop between tasks. On
/// timeout the child is killed.
pub async fn run(argv: &[String], root: &Path, timeout_secs: u64) -> Result<CommandOutput, ToolError> {
    let (program, args) = argv.split_first().ok_or_else(|| ToolError::Unavailable {
        tool: "<none>".to_string(),
        reason: "no command configured".to_string(),
    })?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(root)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    tracing::debug!(command = %argv.join(" "), timeout_secs, "Running tool");

    let child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ToolError::Unavailable {
                tool: program.clone(),
                reason: "executable not found".to_string(),
            }
        } else {
            ToolError::Failed {
                tool: program.clone(),
                message: format!("failed to start: {}", e),
            }
        }
    })?;

    let output = match timeout(Duration::from_secs(timeout_secs), child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| ToolError::Failed {
            tool: program.clone(),
            message: format!("failed to wait for process: {}", e),
        })?,
        Err(_) => {
            return Err(ToolError::TimedOut {
                tool: program.clone(),
                secs: timeout_secs,
            });
        }
    };

    let result = CommandOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    };
    tracing::debug!(command = %program, code = ?result.code, "Tool finished");
    Ok(result)
}

/// Run a command that must exit 0 and print `T` as JSON on stdout.
///
/// The whole stdout is tried first, then its last non-empty line, so tools may
/// print progress before the result.
pub async fn run_json<T: DeserializeOwned>(
    argv: &[String],
    root: &Path,
    timeout_secs: u64,
) -> Result<T, ToolError> {
    let output = run(argv, root, timeout_secs).await?;
    let tool = argv.first().cloned().unwrap_or_default();

    if !output.success {
        return Err(ToolError::Failed {
            tool,
            message: format!(
                "exited with {}: {}",
                output.code.map_or("signal".to_string(), |c| c.to_string()),
                output.combined_tail()
            ),
        });
    }

    parse_contract(&tool, &output.stdout)
}

pub fn parse_contract<T: DeserializeOwned>(tool: &str, stdout: &str) -> Result<T, ToolError> {
    let trimmed = stdout.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }
    let last_line = trimmed.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
    serde_json::from_str(last_line).map_err(|e| ToolError::InvalidOutput {
        tool: tool.to_string(),
        message: format!("{} (output: {})", e, tail(trimmed, 200)),
    })
}
