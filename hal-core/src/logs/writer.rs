//! Per-task append-only writers
//!
//! Each task executor owns exactly one [`TaskLogWriter`] and one
//! [`EventWriter`]; nothing else writes to those files.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;

use super::events::{EventEnvelope, TaskEvent};
use crate::error::LogError;

/// Prefix of the final log line of a finalized task
pub const SENTINEL_PREFIX: &str = "---HAL9999-DONE exit=";

/// Render the done sentinel for an exit code
pub fn done_sentinel(exit_code: i32) -> String {
    format!("{SENTINEL_PREFIX}{exit_code}---")
}

/// Parse an exit code back out of a sentinel line
pub fn parse_sentinel(line: &str) -> Option<i32> {
    line.trim()
        .strip_prefix(SENTINEL_PREFIX)?
        .strip_suffix("---")?
        .parse()
        .ok()
}

/// Append-only text log for one task
pub struct TaskLogWriter {
    file: File,
    path: PathBuf,
    finalized: bool,
}

impl TaskLogWriter {
    /// Open (creating parents) `logs/<taskId>.log` under `dir`
    pub fn open(dir: &Path, task_id: &str) -> Result<Self, LogError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{task_id}.log"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            file,
            path,
            finalized: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append raw agent output
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), LogError> {
        if self.finalized {
            return Err(LogError::Finalized);
        }
        self.file.write_all(bytes)?;
        self.file.flush()?;
        Ok(())
    }

    /// Write the sentinel line. Idempotent: the sentinel appears at
    /// most once no matter how many times the terminal path runs.
    pub fn finalize(&mut self, exit_code: i32) -> Result<(), LogError> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;
        writeln!(self.file, "\n{}", done_sentinel(exit_code))?;
        self.file.flush()?;
        Ok(())
    }
}

/// Append-only JSONL event stream for one task
pub struct EventWriter {
    file: File,
    task_id: String,
    seq: u64,
    ended: bool,
}

impl EventWriter {
    /// Open (creating parents) `events/<taskId>.jsonl` under `dir`
    pub fn open(dir: &Path, task_id: &str) -> Result<Self, LogError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{task_id}.jsonl"));
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file,
            task_id: task_id.to_string(),
            seq: 0,
            ended: false,
        })
    }

    /// Current sequence high-water mark
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Append an event, assigning the next sequence number.
    ///
    /// A second `task_end` is refused so a finalized stream can never
    /// gain another terminal event.
    pub fn emit(&mut self, event: TaskEvent) -> Result<u64, LogError> {
        if self.ended {
            return Err(LogError::Finalized);
        }
        if event.is_task_end() {
            self.ended = true;
        }
        let envelope = EventEnvelope {
            task_id: self.task_id.clone(),
            timestamp: Utc::now(),
            seq: self.seq,
            event,
        };
        let line = serde_json::to_string(&envelope)?;
        writeln!(self.file, "{line}")?;
        self.file.flush()?;
        self.seq += 1;
        Ok(envelope.seq)
    }
}
