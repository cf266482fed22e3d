//! Alert rules, notification fan-out and escalation.

pub mod catalog;
pub mod engine;
pub mod escalation;
pub mod notify;
pub mod store;
pub mod types;

pub use catalog::RuleCatalog;
pub use engine::{AlertRuleEngine, AlertSink, DEFAULT_COUNTER_WINDOW_SECS};
pub use escalation::EscalationScheduler;
pub use notify::{DispatchOutcome, LogNotifier, NotificationDispatcher, NotificationMessage, Notifier};
pub use store::{alert_update, AlertQuery, AlertStore, AlertUpdate, MemoryAlertStore};
pub use types::{
    Alert, AlertLevel, AlertRule, AlertRuleSet, AlertStatus, EscalationRecord, MethodResult,
    NotificationMethod, NotificationStatus, RaisedAlert, Resolution, RuleEvaluation, Suppression,
};
