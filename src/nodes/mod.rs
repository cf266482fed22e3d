//! Node types and their handlers.

pub mod alert_save;
pub mod classify;
pub mod control_flow;
pub mod executor;
pub mod message;
pub mod registry;
pub mod reply;
pub mod types;
pub mod utils;

pub use executor::{NodeContext, NodeExecutor, NodeOutcome};
pub use registry::NodeExecutorRegistry;
pub use types::NodeType;
