//! Shared file utilities for the remedy crate.

use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::errors::WorkflowError;

/// Serialize `value` as pretty JSON and atomically replace `path` with it.
///
/// The sequence is: write `.<name>.tmp` → fsync → rename over the target.
/// Readers always observe either the old or the new complete file.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), WorkflowError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| {
        WorkflowError::io(path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    })?;
    write_atomic(path, json.as_bytes())
}

/// Atomically replace `path` with `bytes`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), WorkflowError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| WorkflowError::io(dir, e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "state".to_string());
    let temp_path = dir.join(format!(".{file_name}.tmp"));

    let mut file = fs::File::create(&temp_path).map_err(|e| WorkflowError::io(&temp_path, e))?;
    file.write_all(bytes)
        .map_err(|e| WorkflowError::io(&temp_path, e))?;
    file.sync_all().map_err(|e| WorkflowError::io(&temp_path, e))?;
    drop(file);

    fs::rename(&temp_path, path).map_err(|e| WorkflowError::io(path, e))?;
    Ok(())
}

/// Copy `path` to a timestamped sibling (`<name>.<suffix>-<ts>`) and return it.
///
/// The original file is left untouched.
pub fn backup_file(path: &Path, suffix: &str) -> Result<PathBuf, WorkflowError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let backup = path.with_file_name(format!(
        "{}.{}-{}",
        file_name,
        suffix,
        Utc::now().format("%Y%m%dT%H%M%S%.3fZ")
    ));
    fs::copy(path, &backup).map_err(|e| WorkflowError::io(&backup, e))?;
    Ok(backup)
}

/// Keep the last `max` characters of tool output for logs and errors.
pub fn tail(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        return text.to_string();
    }
    let skipped: String = text.chars().skip(count - max).collect();
    format!("...{}", skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_json_atomic_creates_and_replaces() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/state.json");

        write_json_atomic(&path, &serde_json::json!({"v": 1})).unwrap();
        write_json_atomic(&path, &serde_json::json!({"v": 2})).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["v"], 2);
        assert!(!dir.path().join("nested/.state.json.tmp").exists());
    }

    #[test]
    fn test_backup_file_preserves_original() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{broken").unwrap();

        let backup = backup_file(&path, "corrupt").unwrap();

        assert!(path.exists());
        assert_eq!(fs::read_to_string(&backup).unwrap(), "{broken");
        assert!(
            backup
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("state.json.corrupt-")
        );
    }

    #[test]
    fn test_tail_keeps_end_of_output() {
        assert_eq!(tail("short", 10), "short");
        assert_eq!(tail("0123456789", 4), "...6789");
    }
}
