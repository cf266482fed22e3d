use serde::{Deserialize, Serialize};

/// Whether the runner may retry the failed node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorRetryability {
    Retryable,
    NonRetryable,
}

/// Error classification code, persisted alongside failed steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ConfigError,
    VariableNotFound,
    ExecutionError,
    TemplateError,
    Timeout,
    SerializationError,
    ServiceError,
    GatewayError,
}

/// Code, retryability and message of a node failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    pub code: ErrorCode,
    pub retryability: ErrorRetryability,
    pub message: String,
}

impl ErrorContext {
    pub fn new(code: ErrorCode, retryability: ErrorRetryability, message: impl Into<String>) -> Self {
        Self {
            code,
            retryability,
            message: message.into(),
        }
    }
}
