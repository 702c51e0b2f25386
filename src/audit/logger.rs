use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use super::DecisionRecord;
use crate::errors::WorkflowError;

/// Writer for `.remedy/decisions.jsonl`.
///
/// The file is opened in append mode and flushed after every record, so a
/// crash loses at most the record being written.
pub struct DecisionLog {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl DecisionLog {
    pub fn open(path: &Path) -> Result<Self, WorkflowError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| WorkflowError::io(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| WorkflowError::io(path, e))?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, record: &DecisionRecord) -> Result<(), WorkflowError> {
        let json = serde_json::to_string(record).map_err(|e| {
            WorkflowError::io(&self.path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        writeln!(self.writer, "{}", json).map_err(|e| WorkflowError::io(&self.path, e))?;
        self.writer
            .flush()
            .map_err(|e| WorkflowError::io(&self.path, e))?;
        tracing::debug!(kind = %record.kind, phase = %record.phase, "{}", record.message);
        Ok(())
    }

    /// Append, logging instead of failing. For paths that are already
    /// reporting a more important error.
    pub fn append_best_effort(&mut self, record: &DecisionRecord) {
        if let Err(e) = self.append(record) {
            tracing::warn!("Failed to write decision log: {}", e);
        }
    }

    /// Read every record, oldest first.
    ///
    /// A missing file is an empty log. Blank lines are ignored and a torn
    /// final line (from a crash mid-write) is skipped; an unparseable line
    /// anywhere else is an error.
    pub fn read_all(path: &Path) -> Result<Vec<DecisionRecord>, WorkflowError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(path).map_err(|e| WorkflowError::io(path, e))?;
        let lines: Vec<String> = BufReader::new(file)
            .lines()
            .collect::<Result<_, _>>()
            .map_err(|e| WorkflowError::io(path, e))?;

        let last = lines.iter().rposition(|l| !l.trim().is_empty());
        let mut records = Vec::new();

        for (index, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<DecisionRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) if Some(index) == last => {
                    tracing::warn!(line = index + 1, "Skipping torn decision log entry: {}", e);
                }
                Err(e) => {
                    return Err(WorkflowError::io(
                        path,
                        std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            format!("line {}: {}", index + 1, e),
                        ),
                    ));
                }
            }
        }

        Ok(records)
    }
}
