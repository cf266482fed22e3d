//! Flow-level error types.

use super::NodeError;
use crate::dsl::validation::ValidationReport;
use thiserror::Error;

/// Flow-level errors
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Flow parse error: {0}")]
    FlowParseError(String),
    #[error("Invalid flow definition '{flow_id}': {summary}")]
    InvalidFlowDefinition {
        flow_id: String,
        summary: String,
        report: Box<ValidationReport>,
    },
    #[error("Flow is not active: {0}")]
    FlowInactive(String),
    #[error("Node not found: {0}")]
    NodeNotFound(String),
    #[error("Node executor not found for type: {0}")]
    ExecutorNotFound(String),
    #[error("Max steps exceeded: {0}")]
    MaxStepsExceeded(usize),
    #[error("Flow timeout after {0} ms")]
    Timeout(u64),
    #[error("Node execution error: node={node_id}, error={error}")]
    NodeExecutionError { node_id: String, error: String },
    #[error("Tracker error: {0}")]
    TrackerError(String),
    #[error("Config error: {0}")]
    ConfigError(String),
    #[error("Node error: {0}")]
    NodeError(Box<NodeError>),
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl WorkflowError {
    /// Validation report attached to an invalid definition, if any.
    pub fn validation_report(&self) -> Option<&ValidationReport> {
        match self {
            WorkflowError::InvalidFlowDefinition { report, .. } => Some(report),
            _ => None,
        }
    }
}

impl From<NodeError> for WorkflowError {
    fn from(value: NodeError) -> Self {
        WorkflowError::NodeError(Box::new(value))
    }
}
