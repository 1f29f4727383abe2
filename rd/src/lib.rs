//! ralphd - spec-driven task orchestrator with bounded self-correction
//!
//! Executes a dependency graph of tasks declared in a spec directory, one at
//! a time, and recovers from failures with the Ralph-Loop: analyse the
//! failure, propose a patch, apply it atomically, re-run.
//!
//! # Modules
//!
//! - [`tasks`] - task graph, selection and lifecycle transitions
//! - [`ralph`] - analyzer, generators, applier and the loop driver
//! - [`orchestrator`] - the single driver loop and crash recovery
//! - [`gateway`] - optional warm execution host over local TCP
//! - [`exec`] - command execution with gateway fallback
//! - [`spec`] - task list parsing
//! - [`llm`] - text-generation client for LLM-backed corrections
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod cli;
pub mod config;
pub mod domain;
pub mod exec;
pub mod gateway;
pub mod llm;
pub mod orchestrator;
pub mod ralph;
pub mod spec;
pub mod tasks;

/// Build version (`git describe`, or the package version outside a checkout)
pub const VERSION: &str = env!("GIT_DESCRIBE");

pub use config::Config;
pub use domain::{CorrectionAttempt, ExecutionState, Task, TaskDescriptor, TaskStatus};
pub use orchestrator::{Orchestrator, OrchestratorError, RunReport};
pub use ralph::{ExhaustionError, RalphLoop};
pub use tasks::TaskManager;
