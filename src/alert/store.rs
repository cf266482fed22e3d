use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::types::{Alert, AlertLevel, AlertStatus};
use crate::error::AlertError;

/// Mutation applied under the store's lock. Returning an error leaves the
/// stored alert untouched.
pub type AlertUpdate<'a> = Box<dyn FnOnce(&mut Alert) -> Result<(), AlertError> + Send + 'a>;

pub fn alert_update<'a, F>(f: F) -> AlertUpdate<'a>
where
    F: FnOnce(&mut Alert) -> Result<(), AlertError> + Send + 'a,
{
    Box::new(f)
}

/// Filter for alert listings; unset fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertQuery {
    pub session_id: Option<String>,
    pub rule_id: Option<String>,
    pub level: Option<AlertLevel>,
    pub status: Option<AlertStatus>,
    pub limit: Option<usize>,
}

impl AlertQuery {
    pub fn session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }

    pub fn rule(rule_id: impl Into<String>) -> Self {
        Self {
            rule_id: Some(rule_id.into()),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: AlertStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_level(mut self, level: AlertLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn matches(&self, alert: &Alert) -> bool {
        self.session_id.as_ref().map_or(true, |s| &alert.session_id == s)
            && self.rule_id.as_ref().map_or(true, |r| &alert.rule_id == r)
            && self.level.map_or(true, |l| alert.alert_level == l)
            && self.status.map_or(true, |s| alert.status == s)
    }
}

/// 告警存储
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn insert(&self, alert: Alert) -> Result<(), AlertError>;

    async fn get(&self, id: &str) -> Result<Option<Alert>, AlertError>;

    /// Apply `update` atomically and return the new record.
    async fn update(&self, id: &str, update: AlertUpdate<'_>) -> Result<Alert, AlertError>;

    /// Matching alerts, oldest first.
    async fn query(&self, query: &AlertQuery) -> Result<Vec<Alert>, AlertError>;
}

#[derive(Default)]
pub struct MemoryAlertStore {
    alerts: RwLock<HashMap<String, Alert>>,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn insert(&self, alert: Alert) -> Result<(), AlertError> {
        let mut alerts = self.alerts.write().await;
        if alerts.contains_key(&alert.id) {
            return Err(AlertError::Storage(format!("duplicate alert id: {}", alert.id)));
        }
        alerts.insert(alert.id.clone(), alert);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Alert>, AlertError> {
        Ok(self.alerts.read().await.get(id).cloned())
    }

    async fn update(&self, id: &str, update: AlertUpdate<'_>) -> Result<Alert, AlertError> {
        let mut alerts = self.alerts.write().await;
        let current = alerts
            .get_mut(id)
            .ok_or_else(|| AlertError::NotFound(id.to_string()))?;
        let mut next = current.clone();
        update(&mut next)?;
        *current = next.clone();
        Ok(next)
    }

    async fn query(&self, query: &AlertQuery) -> Result<Vec<Alert>, AlertError> {
        let alerts = self.alerts.read().await;
        let mut found: Vec<Alert> = alerts.values().filter(|a| query.matches(a)).cloned().collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = query.limit {
            found.truncate(limit);
        }
        Ok(found)
    }
}
