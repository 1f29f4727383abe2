//! Domain types for ralphd
//!
//! Core types: Task (with its lifecycle), CorrectionAttempt records produced
//! by the Ralph-Loop, and the ExecutionState snapshot used for crash recovery.

mod correction;
mod state;
mod task;

pub use correction::{
    CorrectionAttempt, CorrectionOutcome, CorrectionPlan, ErrorAnalysis, ErrorKind, PlanSource,
};
pub use state::{ExecutionState, StateSnapshot};
pub use task::{Task, TaskDescriptor, TaskStatus};
