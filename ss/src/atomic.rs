//! Atomic file replacement (temp file + rename)

use std::fs::{self, File, Permissions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::StoreError;

/// Atomically replace `path` with `contents`
///
/// The bytes are staged in a sibling temp file, flushed to disk, then renamed
/// over the target. Readers observe either the old file or the new one. An
/// existing target's permissions carry over to the replacement.
pub fn atomic_write(path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Result<(), StoreError> {
    atomic_write_with(path, contents, |_| Ok(()))
}

/// Atomically replace `path`, running `before_commit` on the staged file
///
/// `before_commit` sees the fully written temp file just before the rename.
/// If it fails, the temp file is removed and the target is left untouched.
pub fn atomic_write_with<F>(path: impl AsRef<Path>, contents: impl AsRef<[u8]>, before_commit: F) -> Result<(), StoreError>
where
    F: FnOnce(&Path) -> std::io::Result<()>,
{
    let path = path.as_ref();
    let contents = contents.as_ref();
    debug!(path = %path.display(), len = contents.len(), "atomic_write: called");

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }

    let permissions = fs::metadata(path).ok().map(|m| m.permissions());
    let tmp_path = staging_path(path);
    if let Err(e) = stage(&tmp_path, contents, permissions) {
        debug!(tmp = %tmp_path.display(), error = %e, "atomic_write: staging failed");
        let _ = fs::remove_file(&tmp_path);
        return Err(StoreError::io(&tmp_path, e));
    }

    if let Err(e) = before_commit(&tmp_path) {
        debug!(tmp = %tmp_path.display(), error = %e, "atomic_write: interrupted before commit");
        let _ = fs::remove_file(&tmp_path);
        return Err(StoreError::Io {
            path: path.to_path_buf(),
            source: e,
        });
    }

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        StoreError::Io {
            path: path.to_path_buf(),
            source: e,
        }
    })?;
    sync_parent(path);

    debug!(path = %path.display(), "atomic_write: committed");
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "spec".to_string());
    path.with_file_name(format!(".{}.tmp.{}", name, std::process::id()))
}

fn stage(tmp_path: &Path, contents: &[u8], permissions: Option<Permissions>) -> std::io::Result<()> {
    let mut file = File::create(tmp_path)?;
    file.write_all(contents)?;
    if let Some(permissions) = permissions {
        file.set_permissions(permissions)?;
    }
    file.sync_all()
}

/// Flush the directory entry so the rename survives power loss
fn sync_parent(path: &Path) {
    if cfg!(unix)
        && let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty())
        && let Ok(dir) = File::open(parent)
    {
        let _ = dir.sync_all();
    }
}
