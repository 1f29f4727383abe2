//! Core SpecStore implementation

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::atomic::atomic_write_with;
use crate::{BACKUP_INFIX, StoreError};

/// Hook run against the staged file right before a mutation is committed
///
/// Returning an error aborts the commit and leaves the original file intact.
pub type PreCommitHook = Arc<dyn Fn(&Path) -> std::io::Result<()> + Send + Sync>;

/// Restorable identifier of a backup (the backup file path)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackupId(pub String);

impl BackupId {
    /// Path of the backup file on disk
    pub fn path(&self) -> &Path {
        Path::new(&self.0)
    }

    /// Path of the spec file this backup was taken from
    pub fn original(&self) -> Option<PathBuf> {
        self.0.rfind(BACKUP_INFIX).map(|idx| PathBuf::from(&self.0[..idx]))
    }
}

impl std::fmt::Display for BackupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A spec file after a committed mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecFile {
    /// Path of the spec file
    pub path: PathBuf,

    /// SHA-256 of the committed content (hex)
    pub content_hash: String,

    /// Backup taken strictly before the commit (None if the file was new)
    pub backup_path: Option<PathBuf>,

    /// Number of backups recorded for this file
    pub version: u64,
}

impl SpecFile {
    /// Backup identifier, if a backup was taken
    pub fn backup_id(&self) -> Option<BackupId> {
        self.backup_path
            .as_ref()
            .map(|p| BackupId(p.to_string_lossy().into_owned()))
    }
}

/// SHA-256 of `bytes` as lowercase hex
pub fn content_hash(bytes: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes.as_ref());
    hex::encode(hasher.finalize())
}

/// Atomic, backed-up store for spec files
///
/// Passed by reference to whoever is allowed to mutate spec files; there is
/// no global instance.
#[derive(Clone, Default)]
pub struct SpecStore {
    pre_commit: Option<PreCommitHook>,
}

impl std::fmt::Debug for SpecStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpecStore")
            .field("pre_commit", &self.pre_commit.is_some())
            .finish()
    }
}

impl SpecStore {
    /// Create a store with no pre-commit hook
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a hook that inspects (or vetoes) every staged mutation
    pub fn with_pre_commit(mut self, hook: PreCommitHook) -> Self {
        self.pre_commit = Some(hook);
        self
    }

    /// Read a spec file as UTF-8
    pub fn read(&self, path: impl AsRef<Path>) -> Result<String, StoreError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "SpecStore::read: called");
        fs::read_to_string(path).map_err(|e| StoreError::io(path, e))
    }

    /// Copy the current content of `path` into a fresh `<path>.bak.<timestamp>`
    pub fn backup(&self, path: impl AsRef<Path>) -> Result<BackupId, StoreError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "SpecStore::backup: called");
        let content = fs::read(path).map_err(|e| StoreError::io(path, e))?;
        let backup_path = self.next_backup_path(path);
        atomic_write_with(&backup_path, &content, |_| Ok(()))?;
        debug!(backup = %backup_path.display(), "SpecStore::backup: written");
        Ok(BackupId(backup_path.to_string_lossy().into_owned()))
    }

    /// Replace the content of `path`, taking a backup first
    pub fn mutate(&self, path: impl AsRef<Path>, contents: &str) -> Result<SpecFile, StoreError> {
        let path = path.as_ref();
        debug!(path = %path.display(), len = contents.len(), "SpecStore::mutate: called");

        let backup = if path.exists() {
            Some(self.backup(path)?)
        } else {
            debug!(path = %path.display(), "SpecStore::mutate: new file, no backup");
            None
        };

        self.commit(path, contents)?;

        let version = self.list_backups(path)?.len() as u64;
        let file = SpecFile {
            path: path.to_path_buf(),
            content_hash: content_hash(contents),
            backup_path: backup.map(|b| PathBuf::from(b.0)),
            version,
        };
        info!(path = %path.display(), version, hash = %file.content_hash, "Spec file mutated");
        Ok(file)
    }

    /// Restore a backup over its original file (the current content is backed up first)
    pub fn restore(&self, backup: &BackupId) -> Result<SpecFile, StoreError> {
        debug!(%backup, "SpecStore::restore: called");
        let original = backup.original().ok_or_else(|| StoreError::BackupNotFound { id: backup.0.clone() })?;
        let content = fs::read_to_string(backup.path()).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StoreError::BackupNotFound { id: backup.0.clone() },
            _ => StoreError::io(backup.path(), e),
        })?;
        self.mutate(&original, &content)
    }

    /// All backups of `path`, oldest first
    pub fn list_backups(&self, path: impl AsRef<Path>) -> Result<Vec<BackupId>, StoreError> {
        let path = path.as_ref();
        let pattern = format!(
            "{}{}*",
            glob::Pattern::escape(&path.to_string_lossy()),
            BACKUP_INFIX
        );
        debug!(%pattern, "SpecStore::list_backups: called");

        let entries = glob::glob(&pattern).map_err(|e| StoreError::Pattern {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut backups: Vec<String> = entries
            .filter_map(Result::ok)
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        backups.sort_by_cached_key(|name| backup_order(name));
        Ok(backups.into_iter().map(BackupId).collect())
    }

    fn commit(&self, path: &Path, contents: &str) -> Result<(), StoreError> {
        match &self.pre_commit {
            Some(hook) => atomic_write_with(path, contents, |staged| hook(staged)),
            None => atomic_write_with(path, contents, |_| Ok(())),
        }
    }

    /// Timestamped backup path that does not collide with an existing one
    fn next_backup_path(&self, path: &Path) -> PathBuf {
        let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S%3f").to_string();
        let base = format!("{}{}{}", path.to_string_lossy(), BACKUP_INFIX, stamp);
        let mut candidate = PathBuf::from(&base);
        let mut suffix = 1;
        while candidate.exists() {
            candidate = PathBuf::from(format!("{}-{}", base, suffix));
            suffix += 1;
        }
        candidate
    }
}

/// Sort key for a backup name: (timestamp, collision suffix)
fn backup_order(name: &str) -> (String, u32) {
    let tag = name.rsplit_once(BACKUP_INFIX).map_or(name, |(_, tag)| tag);
    match tag.split_once('-') {
        Some((stamp, suffix)) => (stamp.to_string(), suffix.parse().unwrap_or(0)),
        None => (tag.to_string(), 0),
    }
}
