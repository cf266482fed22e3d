//! Execution status types.

mod run;
mod status;

pub use run::{ExecutionRun, StepRecord};
pub use status::{RunStatus, StepStatus};
