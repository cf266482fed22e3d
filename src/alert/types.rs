use std::borrow::Cow;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::context::ExecutionContext;
use crate::dsl::FlowFormat;
use crate::error::AlertError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Critical,
    #[default]
    Warning,
    Info,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Critical => "critical",
            AlertLevel::Warning => "warning",
            AlertLevel::Info => "info",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_true() -> bool {
    true
}

fn default_threshold() -> u32 {
    1
}

fn default_cooldown() -> u64 {
    300
}

fn default_escalation_interval() -> u64 {
    600
}

/// 告警规则
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRule {
    pub id: String,
    #[serde(default)]
    pub rule_name: String,
    pub intent_type: String,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    #[serde(default)]
    pub alert_level: AlertLevel,
    /// Hits inside the counter window needed to fire.
    #[serde(default = "default_threshold")]
    pub threshold: u32,
    /// Seconds after a fire during which the same subject stays quiet.
    #[serde(default = "default_cooldown")]
    pub cooldown_period: u64,
    /// Any keyword must occur in the message; empty matches everything.
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub enable_escalation: bool,
    /// Highest escalation level.
    #[serde(default)]
    pub escalation_threshold: u32,
    /// Seconds between escalation steps.
    #[serde(default = "default_escalation_interval")]
    pub escalation_interval: u64,
}

impl AlertRule {
    pub fn new(id: impl Into<String>, intent_type: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            rule_name: id.clone(),
            id,
            intent_type: intent_type.into(),
            is_enabled: true,
            alert_level: AlertLevel::default(),
            threshold: default_threshold(),
            cooldown_period: default_cooldown(),
            keywords: Vec::new(),
            enable_escalation: false,
            escalation_threshold: 0,
            escalation_interval: default_escalation_interval(),
        }
    }

    pub fn with_threshold(mut self, threshold: u32, cooldown_secs: u64) -> Self {
        self.threshold = threshold;
        self.cooldown_period = cooldown_secs;
        self
    }

    pub fn with_level(mut self, level: AlertLevel) -> Self {
        self.alert_level = level;
        self
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_escalation(mut self, max_level: u32, interval_secs: u64) -> Self {
        self.enable_escalation = true;
        self.escalation_threshold = max_level;
        self.escalation_interval = interval_secs;
        self
    }

    pub fn matches(&self, raised: &RaisedAlert) -> bool {
        if !self.is_enabled || self.intent_type != raised.intent_type {
            return false;
        }
        self.keywords.is_empty()
            || self
                .keywords
                .iter()
                .any(|k| !k.is_empty() && raised.message_content.contains(k.as_str()))
    }

    pub fn escalates(&self) -> bool {
        self.enable_escalation && self.escalation_threshold > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    #[default]
    Pending,
    Sent,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    #[default]
    Pending,
    Handled,
    Ignored,
    Sent,
    Escalated,
}

impl AlertStatus {
    /// Handled or ignored by a human.
    pub fn is_resolved(&self) -> bool {
        matches!(self, AlertStatus::Handled | AlertStatus::Ignored)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Pending => "pending",
            AlertStatus::Handled => "handled",
            AlertStatus::Ignored => "ignored",
            AlertStatus::Sent => "sent",
            AlertStatus::Escalated => "escalated",
        }
    }
}

/// How a human closed an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Handled,
    Ignored,
}

impl From<Resolution> for AlertStatus {
    fn from(r: Resolution) -> Self {
        match r {
            Resolution::Handled => AlertStatus::Handled,
            Resolution::Ignored => AlertStatus::Ignored,
        }
    }
}

/// Outcome of one notification method for one dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodResult {
    pub method_id: String,
    pub method_type: String,
    pub success: bool,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationRecord {
    pub level: u32,
    pub escalated_at: DateTime<Utc>,
    pub notification_status: NotificationStatus,
    #[serde(default)]
    pub notification_result: Vec<MethodResult>,
}

/// 告警记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub intent_type: String,
    pub alert_level: AlertLevel,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    pub alert_message: String,
    #[serde(default)]
    pub notification_status: NotificationStatus,
    #[serde(default)]
    pub notification_result: Vec<MethodResult>,
    #[serde(default)]
    pub status: AlertStatus,
    #[serde(default)]
    pub escalation_level: u32,
    #[serde(default)]
    pub escalation_count: u32,
    #[serde(default)]
    pub escalation_history: Vec<EscalationRecord>,
    /// Alert this one was re-raised from.
    #[serde(default)]
    pub parent_alert_id: Option<String>,
    #[serde(default)]
    pub batch_id: Option<String>,
    #[serde(default)]
    pub source_node: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub handled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub handled_by: Option<String>,
}

impl Alert {
    pub fn new(id: String, rule: &AlertRule, raised: &RaisedAlert, now: DateTime<Utc>) -> Self {
        Self {
            id,
            rule_id: rule.id.clone(),
            rule_name: rule.rule_name.clone(),
            intent_type: raised.intent_type.clone(),
            alert_level: rule.alert_level,
            session_id: raised.session_id.clone(),
            group_id: raised.group_id.clone(),
            user_id: raised.user_id.clone(),
            alert_message: raised.message_content.clone(),
            notification_status: NotificationStatus::Pending,
            notification_result: Vec::new(),
            status: AlertStatus::Pending,
            escalation_level: 0,
            escalation_count: 0,
            escalation_history: Vec::new(),
            parent_alert_id: raised.parent_alert_id.clone(),
            batch_id: raised.batch_id.clone(),
            source_node: raised.source_node.clone(),
            created_at: now,
            handled_at: None,
            handled_by: None,
        }
    }
}

/// 通知方式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationMethod {
    pub id: String,
    pub alert_rule_id: String,
    /// Selects the notifier, e.g. `log`, `wecom`, `sms`.
    pub method_type: String,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    #[serde(default)]
    pub recipient_config: Value,
    #[serde(default)]
    pub message_template: Option<String>,
    /// 1 is the highest.
    #[serde(default = "default_priority")]
    pub priority: u32,
    /// Escalation level at which this method joins the audience.
    #[serde(default)]
    pub escalation_level: u32,
}

fn default_priority() -> u32 {
    1
}

impl NotificationMethod {
    pub fn new(id: impl Into<String>, rule_id: impl Into<String>, method_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            alert_rule_id: rule_id.into(),
            method_type: method_type.into(),
            is_enabled: true,
            recipient_config: Value::Null,
            message_template: None,
            priority: default_priority(),
            escalation_level: 0,
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn at_level(mut self, level: u32) -> Self {
        self.escalation_level = level;
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.message_template = Some(template.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.is_enabled = false;
        self
    }
}

/// A risk signal raised by a node, before any rule looked at it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaisedAlert {
    pub intent_type: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub robot_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub message_content: String,
    /// Unix seconds.
    pub timestamp: i64,
    #[serde(default)]
    pub batch_id: Option<String>,
    #[serde(default)]
    pub parent_alert_id: Option<String>,
    #[serde(default)]
    pub source_node: Option<String>,
}

impl RaisedAlert {
    pub fn new(intent_type: impl Into<String>, session_id: impl Into<String>, timestamp: i64) -> Self {
        Self {
            intent_type: intent_type.into(),
            session_id: session_id.into(),
            group_id: None,
            robot_id: None,
            user_id: None,
            message_content: String::new(),
            timestamp,
            batch_id: None,
            parent_alert_id: None,
            source_node: None,
        }
    }

    /// Fill session, group, user and batch from the run context.
    pub fn from_context(
        intent_type: &str,
        message: &str,
        context: &ExecutionContext,
        timestamp: i64,
        source_node: Option<&str>,
    ) -> Self {
        let owned = |key: &str| context.get_text(key).map(str::to_string);
        let group_id = if context.get_bool("isGroup").unwrap_or(false) {
            owned("groupName")
        } else {
            None
        };
        Self {
            intent_type: intent_type.to_string(),
            session_id: owned("sessionId").unwrap_or_default(),
            group_id,
            robot_id: owned("robotId").filter(|r| !r.is_empty()),
            user_id: owned("receivedName"),
            message_content: message.to_string(),
            timestamp,
            batch_id: owned("batchId"),
            parent_alert_id: None,
            source_node: source_node.map(str::to_string),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message_content = message.into();
        self
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_robot(mut self, robot_id: impl Into<String>) -> Self {
        self.robot_id = Some(robot_id.into());
        self
    }

    pub fn with_batch(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    /// Counter subject: the group (scoped by robot) when there is one, else
    /// the session, whose key already carries the robot.
    pub fn subject(&self) -> Cow<'_, str> {
        match (&self.group_id, &self.robot_id) {
            (Some(group), Some(robot)) => Cow::Owned(format!("{}:{}", robot, group)),
            (Some(group), None) => Cow::Borrowed(group),
            (None, _) => Cow::Borrowed(&self.session_id),
        }
    }
}

/// Why a matching rule did not fire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Suppression {
    BelowThreshold { count: u32, threshold: u32 },
    Cooldown { remaining_secs: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RuleEvaluation {
    Fired { rule_id: String, alert_id: String },
    Suppressed { rule_id: String, suppression: Suppression },
    /// The rule fired but the alert could not be stored.
    Failed { rule_id: String, error: String },
}

impl RuleEvaluation {
    pub fn rule_id(&self) -> &str {
        match self {
            RuleEvaluation::Fired { rule_id, .. }
            | RuleEvaluation::Suppressed { rule_id, .. }
            | RuleEvaluation::Failed { rule_id, .. } => rule_id,
        }
    }

    pub fn alert_id(&self) -> Option<&str> {
        match self {
            RuleEvaluation::Fired { alert_id, .. } => Some(alert_id),
            RuleEvaluation::Suppressed { .. } | RuleEvaluation::Failed { .. } => None,
        }
    }

    pub fn is_fired(&self) -> bool {
        matches!(self, RuleEvaluation::Fired { .. })
    }
}

/// Rules plus their notification methods, as loaded from a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRuleSet {
    #[serde(default)]
    pub rules: Vec<AlertRule>,
    #[serde(default)]
    pub methods: Vec<NotificationMethod>,
}

impl AlertRuleSet {
    pub fn parse(content: &str, format: FlowFormat) -> Result<Self, AlertError> {
        let set: Self = match format {
            FlowFormat::Json => serde_json::from_str(content).map_err(|e| AlertError::ConfigError(e.to_string()))?,
            FlowFormat::Yaml => serde_yaml::from_str(content).map_err(|e| AlertError::ConfigError(e.to_string()))?,
        };
        set.check()?;
        Ok(set)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AlertError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| AlertError::ConfigError(format!("{}: {}", path.display(), e)))?;
        Self::parse(&content, FlowFormat::from_path(path))
    }

    fn check(&self) -> Result<(), AlertError> {
        let mut ids = std::collections::HashSet::new();
        for rule in &self.rules {
            if !ids.insert(rule.id.as_str()) {
                return Err(AlertError::ConfigError(format!("duplicate rule id: {}", rule.id)));
            }
            if rule.threshold == 0 {
                return Err(AlertError::ConfigError(format!("rule {}: threshold must be >= 1", rule.id)));
            }
            if rule.escalates() && rule.escalation_interval == 0 {
                return Err(AlertError::ConfigError(format!(
                    "rule {}: escalationInterval must be > 0",
                    rule.id
                )));
            }
        }
        for method in &self.methods {
            if !ids.contains(method.alert_rule_id.as_str()) {
                return Err(AlertError::RuleNotFound(method.alert_rule_id.clone()));
            }
        }
        Ok(())
    }
}
