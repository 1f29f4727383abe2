//! ExecutionState - persisted for crash recovery

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CorrectionAttempt, Task};

/// Progress marker rewritten after every task transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    /// Monotonically increasing revision, bumped on every write
    pub version: u64,

    pub completed_task_ids: Vec<String>,

    /// Task that was in progress when the state was written
    pub current_task_id: Option<String>,

    pub updated_at: DateTime<Utc>,
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self {
            version: 0,
            completed_task_ids: Vec::new(),
            current_task_id: None,
            updated_at: Utc::now(),
        }
    }
}

/// Full persisted document: ExecutionState plus the task graph and histories
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    #[serde(flatten)]
    pub execution: ExecutionState,

    /// Tasks in declaration order
    #[serde(default)]
    pub tasks: Vec<Task>,

    /// Correction attempts per task id
    #[serde(default)]
    pub history: BTreeMap<String, Vec<CorrectionAttempt>>,
}
