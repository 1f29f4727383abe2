//! Activity log - one JSON line per correction attempt
//!
//! Written next to the execution state (`<state-dir>/activity.jsonl`) and
//! read back by `rd status --history`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{CorrectionAttempt, CorrectionOutcome};

/// A single activity log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub task_id: String,
    pub attempt_number: u32,
    pub timestamp: DateTime<Utc>,
    pub outcome: CorrectionOutcome,
    pub error_summary: String,
}

impl From<&CorrectionAttempt> for ActivityEntry {
    fn from(attempt: &CorrectionAttempt) -> Self {
        Self {
            task_id: attempt.task_id.clone(),
            attempt_number: attempt.attempt,
            timestamp: attempt.timestamp,
            outcome: attempt.outcome,
            error_summary: attempt.analysis_summary.clone(),
        }
    }
}

/// Append-only JSONL writer
#[derive(Debug, Clone)]
pub struct ActivityLog {
    path: PathBuf,
}

impl ActivityLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &ActivityEntry) -> eyre::Result<()> {
        debug!(task_id = %entry.task_id, attempt = entry.attempt_number, outcome = %entry.outcome, "ActivityLog::append: called");
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let json = serde_json::to_string(entry)?;
        writeln!(file, "{}", json)?;
        file.flush()?;
        Ok(())
    }
}

/// Read every entry, skipping lines that fail to parse
pub fn read_activity(path: impl AsRef<Path>) -> eyre::Result<Vec<ActivityEntry>> {
    let path = path.as_ref();
    debug!(?path, "read_activity: reading log file");
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path)?;
    let mut entries = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ActivityEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!(line, error = %e, "read_activity: failed to parse line"),
        }
    }

    debug!(count = entries.len(), "read_activity: loaded entries");
    Ok(entries)
}
