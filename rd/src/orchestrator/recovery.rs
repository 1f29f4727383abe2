//! Crash recovery for a freshly loaded task graph
//!
//! A task persisted as in_progress was interrupted mid-run. It is treated as
//! a failed attempt: the counter goes up by one (never reset) and the task is
//! re-queued, or blocked if that was its last attempt.

use std::path::Path;

use tracing::{debug, info, warn};

use super::OrchestratorError;
use crate::domain::TaskStatus;
use crate::tasks::TaskManager;

/// Error text recorded on tasks interrupted by a crash
pub const INTERRUPTED_ERROR: &str = "interrupted by crash";

/// What recovery found in the persisted state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Whether a persisted state document existed
    pub restored: bool,

    /// Tasks already completed before this run
    pub completed: usize,

    /// Tasks that were in progress when the state was written
    pub interrupted: Vec<String>,

    /// Interrupted tasks that ran out of attempts during recovery
    pub blocked: Vec<String>,
}

impl std::fmt::Display for RecoveryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "restored: {}, completed: {}, interrupted: {}, blocked: {}",
            self.restored,
            self.completed,
            self.interrupted.len(),
            self.blocked.len()
        )
    }
}

/// Overlay persisted state onto `manager` and settle interrupted tasks
///
/// Persists the settled state before returning, so running recovery twice
/// against the same file is a no-op the second time.
pub fn recover(manager: &mut TaskManager, state_path: &Path) -> Result<RecoveryStats, OrchestratorError> {
    debug!(path = %state_path.display(), "recover: called");
    let Some(snapshot) = TaskManager::load_snapshot(state_path)? else {
        debug!("recover: no persisted state");
        return Ok(RecoveryStats::default());
    };

    let interrupted = manager.restore(snapshot);
    let mut stats = RecoveryStats {
        restored: true,
        completed: manager.completed_ids().len(),
        ..Default::default()
    };

    for id in interrupted {
        warn!(%id, "Task was in progress at crash, counting as a failed attempt");
        if manager.fail_task(&id, INTERRUPTED_ERROR)? == TaskStatus::Blocked {
            stats.blocked.push(id.clone());
        }
        stats.interrupted.push(id);
    }

    manager.persist(state_path)?;
    info!("Crash recovery complete: {}", stats);
    Ok(stats)
}
