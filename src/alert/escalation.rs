use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::catalog::RuleCatalog;
use super::notify::NotificationDispatcher;
use super::store::{alert_update, AlertStore};
use super::types::{Alert, AlertRule, AlertStatus, EscalationRecord, NotificationStatus};
use crate::core::event_bus::FlowEvent;
use crate::core::runtime_context::RuntimeContext;
use crate::error::AlertError;

struct TimerEntry {
    generation: u64,
    token: CancellationToken,
}

struct Shared {
    store: Arc<dyn AlertStore>,
    dispatcher: Arc<NotificationDispatcher>,
    catalog: Arc<RuleCatalog>,
    runtime: RuntimeContext,
    timers: DashMap<String, TimerEntry>,
    generation: AtomicU64,
    shutdown: CancellationToken,
}

/// 告警升级调度器
///
/// One cancellable timer task per alert id. Each fire re-reads the alert
/// under the store's update lock, so a resolution that lands first makes the
/// fire a no-op.
#[derive(Clone)]
pub struct EscalationScheduler {
    shared: Arc<Shared>,
}

impl EscalationScheduler {
    pub fn new(
        store: Arc<dyn AlertStore>,
        dispatcher: Arc<NotificationDispatcher>,
        catalog: Arc<RuleCatalog>,
        runtime: RuntimeContext,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                dispatcher,
                catalog,
                runtime,
                timers: DashMap::new(),
                generation: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Start the escalation chain for `alert`. A no-op when the rule does not
    /// escalate or the alert is already resolved or at the top level.
    pub fn schedule(&self, alert: &Alert, rule: &AlertRule) -> Result<(), AlertError> {
        if !rule.escalates()
            || alert.status.is_resolved()
            || alert.escalation_level >= rule.escalation_threshold
        {
            return Ok(());
        }
        let failed = |reason: &str| AlertError::EscalationScheduling {
            alert_id: alert.id.clone(),
            reason: reason.to_string(),
        };
        if rule.escalation_interval == 0 {
            return Err(failed("escalationInterval is zero"));
        }
        if self.shared.shutdown.is_cancelled() {
            return Err(failed("scheduler is shut down"));
        }
        let handle =
            tokio::runtime::Handle::try_current().map_err(|_| failed("no tokio runtime"))?;

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst);
        let token = self.shared.shutdown.child_token();
        let previous = self.shared.timers.insert(
            alert.id.clone(),
            TimerEntry {
                generation,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
        }

        let delay = Duration::from_secs(rule.escalation_interval);
        debug!(alert_id = %alert.id, delay_secs = rule.escalation_interval, "Escalation timer scheduled");
        handle.spawn(run_timer(
            self.shared.clone(),
            alert.id.clone(),
            generation,
            token,
            delay,
        ));
        Ok(())
    }

    /// Stop the timer for `alert_id`. Returns whether one was pending.
    pub fn cancel(&self, alert_id: &str) -> bool {
        match self.shared.timers.remove(alert_id) {
            Some((_, entry)) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, alert_id: &str) -> bool {
        self.shared.timers.contains_key(alert_id)
    }

    pub fn pending_count(&self) -> usize {
        self.shared.timers.len()
    }

    /// Cancel every timer and refuse new ones.
    pub fn shutdown(&self) {
        self.shared.shutdown.cancel();
        self.shared.timers.clear();
    }
}

async fn run_timer(
    shared: Arc<Shared>,
    alert_id: String,
    generation: u64,
    token: CancellationToken,
    mut delay: Duration,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!(alert_id = %alert_id, "Escalation timer cancelled");
                break;
            }
            _ = tokio::time::sleep(delay) => {}
        }
        match shared.escalate_once(&alert_id).await {
            Ok(Some(next)) => delay = next,
            Ok(None) => break,
            Err(e) => {
                warn!(alert_id = %alert_id, error = %e, "Escalation step failed");
                break;
            }
        }
    }
    shared
        .timers
        .remove_if(&alert_id, |_, entry| entry.generation == generation);
}

impl Shared {
    /// One level-up. `Some(delay)` when another step remains.
    async fn escalate_once(&self, alert_id: &str) -> Result<Option<Duration>, AlertError> {
        let current = self
            .store
            .get(alert_id)
            .await?
            .ok_or_else(|| AlertError::NotFound(alert_id.to_string()))?;
        let rule = self
            .catalog
            .rule(&current.rule_id)
            .ok_or_else(|| AlertError::RuleNotFound(current.rule_id.clone()))?;
        let max_level = rule.escalation_threshold;
        if current.status.is_resolved() || current.escalation_level >= max_level {
            return Ok(None);
        }

        let now = self.runtime.now();
        let updated = self
            .store
            .update(
                alert_id,
                alert_update(move |alert| {
                    if alert.status.is_resolved() {
                        return Err(AlertError::AlreadyResolved(alert.id.clone()));
                    }
                    if alert.escalation_level >= max_level {
                        return Err(AlertError::EscalationScheduling {
                            alert_id: alert.id.clone(),
                            reason: "already at the highest level".to_string(),
                        });
                    }
                    alert.escalation_level += 1;
                    alert.escalation_count += 1;
                    alert.status = AlertStatus::Escalated;
                    alert.escalation_history.push(EscalationRecord {
                        level: alert.escalation_level,
                        escalated_at: now,
                        notification_status: NotificationStatus::Pending,
                        notification_result: Vec::new(),
                    });
                    Ok(())
                }),
            )
            .await;
        let escalated = match updated {
            Ok(alert) => alert,
            Err(AlertError::AlreadyResolved(_)) => {
                debug!(alert_id, "Alert resolved before escalation fired");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let level = escalated.escalation_level;
        info!(alert_id, level, max_level, "Alert escalated");

        let methods = self.catalog.methods_for(&rule.id);
        let outcome = self
            .dispatcher
            .dispatch(&escalated, &rule, &methods, level)
            .await;
        let recorded = self
            .store
            .update(
                alert_id,
                alert_update(move |alert| {
                    if let Some(record) = alert
                        .escalation_history
                        .iter_mut()
                        .rev()
                        .find(|r| r.level == level)
                    {
                        record.notification_status = outcome.status;
                        record.notification_result = outcome.results;
                    }
                    Ok(())
                }),
            )
            .await;
        if let Err(e) = recorded {
            warn!(alert_id, error = %e, "Failed to record escalation notification");
        }

        self.runtime.events.emit(FlowEvent::AlertEscalated {
            alert_id: alert_id.to_string(),
            escalation_level: level,
            timestamp: now,
        });

        if level < max_level {
            Ok(Some(Duration::from_secs(rule.escalation_interval)))
        } else {
            Ok(None)
        }
    }
}
