//! Command execution: direct spawn, gateway-routed, and test verdicts
//!
//! Every path ends in [`execute_command`], which owns the timeout and
//! process-group kill semantics.

mod command;
mod fallback;
mod test_runner;

pub use command::{
    CommandOutput, CommandRequest, CommandRunner, DEFAULT_TIMEOUT_MS, DirectRunner, ExecError, MAX_OUTPUT_BYTES,
    execute_command,
};
pub use fallback::FallbackRunner;
pub use test_runner::{ShellTestRunner, TestOutcome, TestRunner};
