use thiserror::Error;

use crate::error::NodeError;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ServiceError {
    /// Transient; worth another attempt.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout")]
    Timeout,
}

impl ServiceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Unavailable(_) | ServiceError::Timeout)
    }

    /// Wrap into a node error naming the collaborator that failed.
    pub fn into_node_error(self, service: &str) -> NodeError {
        NodeError::ServiceError {
            service: service.to_string(),
            retryable: self.is_retryable(),
            message: self.to_string(),
        }
    }
}
