//! Notification fan-out: one alert, every enabled method of its rule for the
//! current tier, concurrently, each with its own retry budget.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::types::{Alert, AlertLevel, AlertRule, MethodResult, NotificationMethod, NotificationStatus};
use crate::dsl::RetryConfig;
use crate::error::AlertError;
use crate::template;

pub const DEFAULT_MESSAGE_TEMPLATE: &str = "[{{alertLevel}}] {{ruleName}}: {{alertMessage}}";

/// Rendered notification handed to a notifier.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationMessage {
    pub alert_id: String,
    pub rule_id: String,
    pub level: AlertLevel,
    pub escalation_level: u32,
    pub body: String,
    pub recipients: Value,
}

/// 通知渠道 - one implementation per `methodType`
#[async_trait]
pub trait Notifier: Send + Sync {
    fn method_type(&self) -> &str;

    async fn send(
        &self,
        method: &NotificationMethod,
        message: &NotificationMessage,
    ) -> Result<(), AlertError>;
}

/// Writes notifications to the log. Registered as `log`.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn method_type(&self) -> &str {
        "log"
    }

    async fn send(
        &self,
        method: &NotificationMethod,
        message: &NotificationMessage,
    ) -> Result<(), AlertError> {
        info!(
            method_id = %method.id,
            alert_id = %message.alert_id,
            level = %message.level,
            escalation_level = message.escalation_level,
            body = %message.body,
            "Alert notification"
        );
        Ok(())
    }
}

/// Aggregated result of one dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub status: NotificationStatus,
    /// In priority order.
    pub results: Vec<MethodResult>,
}

impl DispatchOutcome {
    fn from_results(results: Vec<MethodResult>) -> Self {
        let status = if results.iter().any(|r| r.success) {
            NotificationStatus::Sent
        } else {
            NotificationStatus::Failed
        };
        Self { status, results }
    }
}

pub struct NotificationDispatcher {
    notifiers: HashMap<String, Arc<dyn Notifier>>,
    retry: RetryConfig,
    timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(retry: RetryConfig, timeout: Duration) -> Self {
        Self {
            notifiers: HashMap::new(),
            retry,
            timeout,
        }
    }

    pub fn register(&mut self, notifier: Arc<dyn Notifier>) {
        self.notifiers
            .insert(notifier.method_type().to_string(), notifier);
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.register(notifier);
        self
    }

    /// Enabled methods of `rule` whose tier is at most `level`, by priority.
    pub fn audience<'m>(
        rule: &AlertRule,
        methods: &'m [NotificationMethod],
        level: u32,
    ) -> Vec<&'m NotificationMethod> {
        let mut audience: Vec<&NotificationMethod> = methods
            .iter()
            .filter(|m| m.is_enabled && m.alert_rule_id == rule.id && m.escalation_level <= level)
            .collect();
        audience.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        audience
    }

    pub async fn dispatch(
        &self,
        alert: &Alert,
        rule: &AlertRule,
        methods: &[NotificationMethod],
        level: u32,
    ) -> DispatchOutcome {
        let audience = Self::audience(rule, methods, level);
        if audience.is_empty() {
            warn!(alert_id = %alert.id, rule_id = %rule.id, level, "No notification method configured");
            return DispatchOutcome::from_results(Vec::new());
        }

        let fields = message_fields(alert, rule, level);
        let sends = audience.into_iter().map(|method| {
            let message = NotificationMessage {
                alert_id: alert.id.clone(),
                rule_id: rule.id.clone(),
                level: alert.alert_level,
                escalation_level: level,
                body: template::render(
                    method
                        .message_template
                        .as_deref()
                        .unwrap_or(DEFAULT_MESSAGE_TEMPLATE),
                    &fields,
                ),
                recipients: method.recipient_config.clone(),
            };
            async move { self.send_with_retry(method, message).await }
        });
        let outcome = DispatchOutcome::from_results(join_all(sends).await);

        debug!(
            alert_id = %alert.id,
            level,
            status = ?outcome.status,
            methods = outcome.results.len(),
            "Notification dispatch finished"
        );
        outcome
    }

    async fn send_with_retry(
        &self,
        method: &NotificationMethod,
        message: NotificationMessage,
    ) -> MethodResult {
        let mut result = MethodResult {
            method_id: method.id.clone(),
            method_type: method.method_type.clone(),
            success: false,
            attempts: 0,
            error: None,
        };
        let Some(notifier) = self.notifiers.get(&method.method_type) else {
            result.error = Some(AlertError::NotifierNotFound(method.method_type.clone()).to_string());
            return result;
        };

        let max_retries = self.retry.max_retries;
        for attempt in 0..=max_retries {
            result.attempts = attempt + 1;
            let sent = match tokio::time::timeout(self.timeout, notifier.send(method, &message)).await {
                Ok(r) => r,
                Err(_) => Err(AlertError::Dispatch {
                    method: method.id.clone(),
                    message: format!("timed out after {}ms", self.timeout.as_millis()),
                }),
            };
            match sent {
                Ok(()) => {
                    result.success = true;
                    result.error = None;
                    break;
                }
                Err(e) => {
                    warn!(method_id = %method.id, attempt, error = %e, "Notification attempt failed");
                    result.error = Some(e.to_string());
                    if attempt < max_retries {
                        let interval = self.retry.interval_for(attempt);
                        if !interval.is_zero() {
                            tokio::time::sleep(interval).await;
                        }
                    }
                }
            }
        }
        result
    }
}

fn message_fields(alert: &Alert, rule: &AlertRule, level: u32) -> Map<String, Value> {
    let mut fields = match serde_json::to_value(alert) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    fields.insert("ruleName".to_string(), json!(rule.rule_name));
    fields.insert("escalationLevel".to_string(), json!(level));
    fields
}
