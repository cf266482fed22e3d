use thiserror::Error;

/// Errors raised by the alert rule, escalation and notification subsystems.
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Alert not found: {0}")]
    NotFound(String),
    #[error("Alert rule not found: {0}")]
    RuleNotFound(String),
    #[error("Alert {0} is already resolved")]
    AlreadyResolved(String),
    #[error("Notification dispatch failed: method={method}, error={message}")]
    Dispatch { method: String, message: String },
    #[error("No notifier registered for method type: {0}")]
    NotifierNotFound(String),
    #[error("Escalation scheduling failed for alert {alert_id}: {reason}")]
    EscalationScheduling { alert_id: String, reason: String },
    #[error("Alert rule config error: {0}")]
    ConfigError(String),
    #[error("Storage error: {0}")]
    Storage(String),
}
