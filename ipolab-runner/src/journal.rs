//! Event journal: JSONL append-only record of tick reports.
//!
//! One JSON object per line, tagged with the run id, so a journal can be
//! streamed, tailed, or shared between resumed runs of the same config.

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use ipolab_core::TickReport;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal I/O on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("encode journal entry: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A single journal line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub run_id: String,
    pub report: TickReport,
}

/// JSONL journal file.
pub struct EventJournal {
    path: PathBuf,
    run_id: String,
}

impl EventJournal {
    pub fn new(path: PathBuf, run_id: impl Into<String>) -> Self {
        Self {
            path,
            run_id: run_id.into(),
        }
    }

    fn io_err(&self, source: io::Error) -> JournalError {
        JournalError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Append one tick report. Quiet reports are not written.
    ///
    /// Returns `Ok(true)` if a line was written.
    pub fn append(&self, report: &TickReport) -> Result<bool, JournalError> {
        if report.is_quiet() {
            return Ok(false);
        }
        let entry = JournalEntry {
            run_id: self.run_id.clone(),
            report: report.clone(),
        };
        let json = serde_json::to_string(&entry)?;

        // Ensure parent directory exists
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_err(e))?;

        writeln!(file, "{json}").map_err(|e| self.io_err(e))?;
        file.flush().map_err(|e| self.io_err(e))?;

        Ok(true)
    }

    /// Read every entry, skipping malformed lines.
    pub fn read_all(&self) -> Result<Vec<JournalEntry>, JournalError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = fs::File::open(&self.path).map_err(|e| self.io_err(e))?;
        let reader = io::BufReader::new(file);
        let mut entries = Vec::new();

        for (index, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| self.io_err(e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(err) => {
                    warn!(path = %self.path.display(), line = index + 1, error = %err, "malformed journal line skipped")
                }
            }
        }

        Ok(entries)
    }

    /// Path to the journal file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}
