//! Error types for the engines.
//!
//! - [`NodeError`]: Errors raised during individual node execution.
//! - [`WorkflowError`]: Flow loading, validation and run errors.
//! - [`AlertError`]: Alert rule, escalation and notification errors.
//! - [`ErrorContext`]: Structured error metadata (code, retryability).

pub mod alert_error;
pub mod error_context;
pub mod node_error;
pub mod workflow_error;

pub use alert_error::AlertError;
pub use error_context::{ErrorCode, ErrorContext, ErrorRetryability};
pub use node_error::NodeError;
pub use workflow_error::WorkflowError;

/// Convenience alias for flow-level results.
pub type WorkflowResult<T> = Result<T, WorkflowError>;
/// Convenience alias for node-level results.
pub type NodeResult<T> = Result<T, NodeError>;
/// Convenience alias for alert subsystem results.
pub type AlertResult<T> = Result<T, AlertError>;
