//! SpecStore - atomic, backed-up, versioned persistence for spec files
//!
//! Every mutation of a spec file goes through one call path:
//!
//! ```text
//! read current ──► write <path>.bak.<timestamp> ──► stage <path>.tmp ──► rename over <path>
//! ```
//!
//! The backup is durable before the staged file is committed, and the commit
//! is a single `rename`, so a crash at any point leaves either the original
//! bytes or the new bytes on disk, never a mix.
//!
//! # Example
//!
//! ```ignore
//! use specstore::SpecStore;
//!
//! let store = SpecStore::new();
//! let file = store.mutate("src/app.js", "const x = 0;\n")?;
//! println!("backup: {:?}", file.backup_path);
//! store.restore(&file.backup_id().unwrap())?;
//! ```

mod atomic;
mod error;
mod store;

pub use atomic::{atomic_write, atomic_write_with};
pub use error::StoreError;
pub use store::{BackupId, PreCommitHook, SpecFile, SpecStore, content_hash};

/// Infix between a spec file path and its backup timestamp
pub const BACKUP_INFIX: &str = ".bak.";
