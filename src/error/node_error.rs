use thiserror::Error;

use super::error_context::{ErrorCode, ErrorContext, ErrorRetryability};

/// Node-level errors
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Variable not found: {0}")]
    VariableNotFound(String),
    #[error("Execution error: {0}")]
    ExecutionError(String),
    #[error("Template error: {0}")]
    TemplateError(String),
    #[error("Timeout: node execution exceeded {0} ms")]
    Timeout(u64),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Service error ({service}): {message}")]
    ServiceError {
        service: String,
        message: String,
        retryable: bool,
    },
    #[error("Gateway error: {0}")]
    GatewayError(String),
}

impl NodeError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, NodeError::Timeout(_))
    }

    /// Configuration and template problems fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            NodeError::ConfigError(_)
            | NodeError::TemplateError(_)
            | NodeError::SerializationError(_) => false,
            NodeError::ServiceError { retryable, .. } => *retryable,
            _ => true,
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            NodeError::ConfigError(_) => ErrorCode::ConfigError,
            NodeError::VariableNotFound(_) => ErrorCode::VariableNotFound,
            NodeError::ExecutionError(_) => ErrorCode::ExecutionError,
            NodeError::TemplateError(_) => ErrorCode::TemplateError,
            NodeError::Timeout(_) => ErrorCode::Timeout,
            NodeError::SerializationError(_) => ErrorCode::SerializationError,
            NodeError::ServiceError { .. } => ErrorCode::ServiceError,
            NodeError::GatewayError(_) => ErrorCode::GatewayError,
        }
    }

    pub fn error_context(&self) -> ErrorContext {
        let retryability = if self.is_retryable() {
            ErrorRetryability::Retryable
        } else {
            ErrorRetryability::NonRetryable
        };
        ErrorContext::new(self.error_code(), retryability, self.to_string())
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(e: serde_json::Error) -> Self {
        NodeError::SerializationError(e.to_string())
    }
}
