//! Validated, immutable flow graphs.

pub mod builder;
pub mod cache;
pub mod types;

pub use builder::build_flow_graph;
pub use cache::FlowGraphCache;
pub use types::{FlowGraph, FlowNode};
