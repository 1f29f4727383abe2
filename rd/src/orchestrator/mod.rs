//! Orchestrator: selects, executes and corrects tasks one at a time
//!
//! Restores execution state on startup, checkpoints after every transition
//! and hands failures to the Ralph-Loop.

mod core;
mod error;
pub mod hooks;
pub mod recovery;

pub use self::core::{Orchestrator, RunReport};
pub use error::OrchestratorError;
pub use hooks::{CompletionHook, LogHook, ShellHook};
pub use recovery::{RecoveryStats, recover};
