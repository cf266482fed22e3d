use parking_lot::RwLock;

use super::types::{AlertRule, AlertRuleSet, NotificationMethod, RaisedAlert};

/// Live rule set shared by the rule engine and the escalation scheduler.
/// Replacing it affects later evaluations and escalation steps only.
#[derive(Default)]
pub struct RuleCatalog {
    inner: RwLock<AlertRuleSet>,
}

impl RuleCatalog {
    pub fn new(set: AlertRuleSet) -> Self {
        Self {
            inner: RwLock::new(set),
        }
    }

    pub fn replace(&self, set: AlertRuleSet) {
        *self.inner.write() = set;
    }

    pub fn rule(&self, id: &str) -> Option<AlertRule> {
        self.inner.read().rules.iter().find(|r| r.id == id).cloned()
    }

    /// Enabled rules matching `raised`, in definition order.
    pub fn matching(&self, raised: &RaisedAlert) -> Vec<AlertRule> {
        self.inner
            .read()
            .rules
            .iter()
            .filter(|r| r.matches(raised))
            .cloned()
            .collect()
    }

    pub fn methods_for(&self, rule_id: &str) -> Vec<NotificationMethod> {
        self.inner
            .read()
            .methods
            .iter()
            .filter(|m| m.alert_rule_id == rule_id)
            .cloned()
            .collect()
    }

    pub fn rule_count(&self) -> usize {
        self.inner.read().rules.len()
    }
}
