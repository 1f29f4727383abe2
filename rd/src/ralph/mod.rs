//! Ralph-Loop: bounded self-correction of failing tasks
//!
//! Three stages behind traits ([`ErrorAnalyzer`], [`CorrectionGenerator`],
//! [`CorrectionApplier`]) driven by [`RalphLoop`]. Spec files are only ever
//! written by the applier, through the SpecStore.

mod activity;
mod analyzer;
mod applier;
mod driver;
mod error;
mod generator;

pub use activity::{ActivityEntry, ActivityLog, read_activity};
pub use analyzer::{ErrorAnalyzer, PatternAnalyzer};
pub use applier::{AtomicApplier, CorrectionApplier};
pub use driver::{LoopError, LoopOutcome, LoopTask, RalphLoop};
pub use error::{ApplyError, ExhaustionError, GeneratorError};
pub use generator::{
    ChainGenerator, CorrectionContext, CorrectionGenerator, FIXME_MARKER, FallbackGenerator, LlmGenerator,
    RuleBasedGenerator,
};
