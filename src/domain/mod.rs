//! Domain layer: execution records shared by the runner, the tracker and
//! the engine façade.
//!
//! Submodules:
//! - [`execution`]: Run status, step log and the persisted run record.

pub mod execution;
