//! Public API layer: the engine façade external callers drive.

mod engine;

pub use engine::{ChatFlowEngine, ChatFlowEngineBuilder, EventOutcome, PurgeReport};
