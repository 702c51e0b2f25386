//! Cross-process run lock for a project.
//!
//! Only one mutating command may run against a project at a time. The lock is
//! an advisory OS lock on `.remedy/lock`, so it disappears with the process
//! that held it and a crashed run never wedges the project. The file also
//! records who holds it, for the error shown to a second invocation.

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::errors::WorkflowError;

/// Written into the lock file by the holder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockHolder {
    pub pid: u32,
    pub command: String,
    pub acquired_at: DateTime<Utc>,
}

impl fmt::Display for LockHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let age = Utc::now().signed_duration_since(self.acquired_at);
        let age_str = if age.num_hours() > 0 {
            format!("{}h {}m ago", age.num_hours(), age.num_minutes() % 60)
        } else if age.num_minutes() > 0 {
            format!("{}m {}s ago", age.num_minutes(), age.num_seconds() % 60)
        } else {
            format!("{}s ago", age.num_seconds())
        };
        write!(f, "'{}' by PID {} started {}", self.command, self.pid, age_str)
    }
}

/// A held project lock. Released on drop.
#[derive(Debug)]
pub struct ProjectLock {
    file: File,
    path: PathBuf,
}

impl ProjectLock {
    /// Take the lock without waiting. Contention is `WorkflowError::LockHeld`.
    pub fn acquire(path: &Path, command: &str) -> Result<Self, WorkflowError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| WorkflowError::io(parent, e))?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| WorkflowError::io(path, e))?;

        if let Err(e) = file.try_lock_exclusive() {
            if e.kind() != fs2::lock_contended_error().kind() {
                return Err(WorkflowError::io(path, e));
            }
            let holder = read_holder(&mut file)
                .map(|h| h.to_string())
                .unwrap_or_else(|| "holder unknown".to_string());
            return Err(WorkflowError::LockHeld {
                path: path.to_path_buf(),
                holder,
            });
        }

        let holder = LockHolder {
            pid: std::process::id(),
            command: command.to_string(),
            acquired_at: Utc::now(),
        };
        let json = serde_json::to_string(&holder)
            .map_err(|e| WorkflowError::io(path, std::io::Error::other(e)))?;
        file.set_len(0)
            .and_then(|_| file.seek(SeekFrom::Start(0)))
            .and_then(|_| file.write_all(json.as_bytes()))
            .and_then(|_| file.sync_all())
            .map_err(|e| WorkflowError::io(path, e))?;

        tracing::debug!(path = %path.display(), command, "Acquired project lock");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProjectLock {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
        let _ = FileExt::unlock(&self.file);
    }
}

fn read_holder(file: &mut File) -> Option<LockHolder> {
    let mut content = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut content).ok()?;
    serde_json::from_str(&content).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_acquire_writes_holder() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".remedy/lock");

        let lock = ProjectLock::acquire(&path, "testing").unwrap();

        let holder: LockHolder =
            serde_json::from_str(&std::fs::read_to_string(lock.path()).unwrap()).unwrap();
        assert_eq!(holder.pid, std::process::id());
        assert_eq!(holder.command, "testing");
    }

    #[test]
    fn test_second_acquire_fails_with_holder() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lock");

        let _held = ProjectLock::acquire(&path, "quality").unwrap();
        let err = ProjectLock::acquire(&path, "status").unwrap_err();

        match err {
            WorkflowError::LockHeld { path: p, holder } => {
                assert_eq!(p, path);
                assert!(holder.contains("'quality'"));
                assert!(holder.contains(&std::process::id().to_string()));
            }
            other => panic!("expected LockHeld, got {other:?}"),
        }
    }

    #[test]
    fn test_lock_released_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lock");

        drop(ProjectLock::acquire(&path, "assess").unwrap());
        let again = ProjectLock::acquire(&path, "structure");

        assert!(again.is_ok());
    }

    #[test]
    fn test_leftover_file_without_lock_is_reused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lock");
        std::fs::write(&path, r#"{"pid":1,"command":"crashed","acquired_at":"2026-01-01T00:00:00Z"}"#)
            .unwrap();

        let lock = ProjectLock::acquire(&path, "resume").unwrap();

        let content = std::fs::read_to_string(lock.path()).unwrap();
        assert!(content.contains("resume"));
        assert!(!content.contains("crashed"));
    }
}
