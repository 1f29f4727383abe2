//! CorrectionApplier - commits a plan through the SpecStore

use specstore::{BackupId, SpecStore};
use tracing::{debug, info};

use super::ApplyError;
use crate::domain::CorrectionPlan;

pub trait CorrectionApplier: Send + Sync {
    /// Apply `plan` atomically, returning the backup taken before the write
    ///
    /// On any error the target file is unchanged.
    fn apply(&self, plan: &CorrectionPlan) -> Result<BackupId, ApplyError>;
}

/// Applies search/replace plans with backup-then-atomic-rename
#[derive(Debug, Clone, Default)]
pub struct AtomicApplier {
    store: SpecStore,
}

impl AtomicApplier {
    pub fn new(store: SpecStore) -> Self {
        Self { store }
    }
}

impl CorrectionApplier for AtomicApplier {
    fn apply(&self, plan: &CorrectionPlan) -> Result<BackupId, ApplyError> {
        let path = &plan.target_file;
        debug!(path = %path.display(), line = ?plan.line, "AtomicApplier::apply: called");
        let current = self.store.read(path)?;

        let Some(updated) = patch(&current, plan) else {
            debug!(path = %path.display(), "AtomicApplier::apply: search text absent or ambiguous");
            return Err(ApplyError::PatchMismatch { path: path.clone() });
        };

        let file = self.store.mutate(path, &updated)?;
        let backup = file.backup_id().ok_or_else(|| ApplyError::NoBackup { path: path.clone() })?;

        info!(path = %path.display(), backup = %backup, version = file.version, "Correction applied");
        Ok(backup)
    }
}

/// New content with `plan` applied, or None when the plan does not fit
///
/// An anchored plan must match whole lines starting at `plan.line`. An
/// unanchored plan must occur exactly once.
fn patch(current: &str, plan: &CorrectionPlan) -> Option<String> {
    if plan.search.is_empty() {
        return None;
    }

    let start = match plan.line {
        Some(line) => {
            let start = line_start(current, line)?;
            let rest = &current[start..];
            if !rest.starts_with(&plan.search) {
                return None;
            }
            let after = &rest[plan.search.len()..];
            let ends_line =
                plan.search.ends_with('\n') || after.is_empty() || after.starts_with('\n') || after.starts_with("\r\n");
            if !ends_line {
                return None;
            }
            start
        }
        None => {
            let mut found = current.match_indices(&plan.search).map(|(i, _)| i);
            let start = found.next()?;
            if found.next().is_some() {
                return None;
            }
            start
        }
    };

    let end = start + plan.search.len();
    Some(format!("{}{}{}", &current[..start], plan.replace, &current[end..]))
}

/// Byte offset where 1-indexed `line` begins
fn line_start(content: &str, line: u32) -> Option<usize> {
    match line {
        0 => None,
        1 => Some(0),
        n => content.match_indices('\n').nth(n as usize - 2).map(|(i, _)| i + 1),
    }
}
