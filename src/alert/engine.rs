use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use super::catalog::RuleCatalog;
use super::escalation::EscalationScheduler;
use super::notify::NotificationDispatcher;
use super::store::{alert_update, AlertQuery, AlertStore};
use super::types::{
    Alert, AlertRule, AlertRuleSet, AlertStatus, NotificationMethod, NotificationStatus, RaisedAlert,
    Resolution, RuleEvaluation, Suppression,
};
use crate::core::event_bus::FlowEvent;
use crate::core::runtime_context::RuntimeContext;
use crate::error::AlertError;

pub const DEFAULT_COUNTER_WINDOW_SECS: u64 = 3600;

/// Receives alerts raised by flow nodes.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn raise(&self, alert: RaisedAlert) -> Result<Vec<RuleEvaluation>, AlertError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CounterKey {
    rule_id: String,
    subject: String,
}

/// Hits of one `(rule, subject)` pair inside the sliding window.
#[derive(Debug, Default)]
struct HitWindow {
    hits: VecDeque<i64>,
    last_fired: Option<i64>,
    cooldown: u64,
}

/// Counter state taken by a fire, restored if the alert is never stored.
struct FireClaim {
    fired_at: i64,
    previous: Option<i64>,
    hits: VecDeque<i64>,
}

impl HitWindow {
    fn prune(&mut self, now: i64, window: u64) {
        let floor = now.saturating_sub(window as i64);
        while self.hits.front().is_some_and(|&t| t <= floor) {
            self.hits.pop_front();
        }
    }

    /// Record a hit at `now` and decide whether the rule fires.
    fn record(&mut self, rule: &AlertRule, now: i64, window: u64) -> Result<FireClaim, Suppression> {
        self.cooldown = rule.cooldown_period;
        self.prune(now, window);
        self.hits.push_back(now);

        let count = self.hits.len() as u32;
        if count < rule.threshold {
            return Err(Suppression::BelowThreshold {
                count,
                threshold: rule.threshold,
            });
        }
        if let Some(fired) = self.last_fired {
            let elapsed = now.saturating_sub(fired).max(0) as u64;
            if elapsed < rule.cooldown_period {
                return Err(Suppression::Cooldown {
                    remaining_secs: rule.cooldown_period - elapsed,
                });
            }
        }
        Ok(FireClaim {
            fired_at: now,
            previous: self.last_fired.replace(now),
            hits: std::mem::take(&mut self.hits),
        })
    }

    /// Undo a fire whose alert was not stored.
    fn release(&mut self, claim: FireClaim) {
        if self.last_fired == Some(claim.fired_at) {
            self.last_fired = claim.previous;
        }
        let mut hits = claim.hits;
        hits.extend(self.hits.drain(..));
        self.hits = hits;
    }

    fn is_expired(&self, now: i64) -> bool {
        self.hits.is_empty()
            && self
                .last_fired
                .map_or(true, |t| now.saturating_sub(t) >= self.cooldown as i64)
    }
}

/// 告警规则引擎
///
/// Matches raised alerts against the rule catalog, counts hits per
/// `(rule, subject)` in a sliding window and applies the cooldown. Fired
/// alerts are stored before evaluation returns; notification and escalation
/// scheduling run on a delivery task that outlives the caller.
pub struct AlertRuleEngine {
    catalog: Arc<RuleCatalog>,
    store: Arc<dyn AlertStore>,
    dispatcher: Arc<NotificationDispatcher>,
    scheduler: EscalationScheduler,
    counters: Mutex<HashMap<CounterKey, HitWindow>>,
    deliveries: Mutex<Vec<JoinHandle<()>>>,
    runtime: RuntimeContext,
    window_secs: u64,
}

impl AlertRuleEngine {
    pub fn new(
        rules: AlertRuleSet,
        store: Arc<dyn AlertStore>,
        dispatcher: Arc<NotificationDispatcher>,
        runtime: RuntimeContext,
    ) -> Self {
        let catalog = Arc::new(RuleCatalog::new(rules));
        let scheduler = EscalationScheduler::new(
            store.clone(),
            dispatcher.clone(),
            catalog.clone(),
            runtime.clone(),
        );
        Self {
            catalog,
            store,
            dispatcher,
            scheduler,
            counters: Mutex::new(HashMap::new()),
            deliveries: Mutex::new(Vec::new()),
            runtime,
            window_secs: DEFAULT_COUNTER_WINDOW_SECS,
        }
    }

    pub fn with_window_secs(mut self, window_secs: u64) -> Self {
        self.window_secs = window_secs;
        self
    }

    pub fn scheduler(&self) -> &EscalationScheduler {
        &self.scheduler
    }

    pub fn store(&self) -> &Arc<dyn AlertStore> {
        &self.store
    }

    /// Swap the rule set. Counters of removed rules age out via `evict_expired`.
    pub fn replace_rules(&self, rules: AlertRuleSet) {
        info!(rules = rules.rules.len(), methods = rules.methods.len(), "Alert rules replaced");
        self.catalog.replace(rules);
    }

    pub fn rule_count(&self) -> usize {
        self.catalog.rule_count()
    }

    /// Evaluate `raised` and wait until the fired alerts are notified and
    /// their escalation is scheduled.
    pub async fn evaluate(&self, raised: RaisedAlert) -> Result<Vec<RuleEvaluation>, AlertError> {
        let (evaluations, deliveries) = self.evaluate_rules(raised).await;
        join_deliveries(deliveries).await;
        Ok(evaluations)
    }

    /// Evaluate `raised` without waiting for delivery. Pending deliveries are
    /// awaited by [`flush_deliveries`](Self::flush_deliveries).
    pub async fn submit(&self, raised: RaisedAlert) -> Vec<RuleEvaluation> {
        let (evaluations, started) = self.evaluate_rules(raised).await;
        if !started.is_empty() {
            let mut deliveries = self.deliveries.lock();
            deliveries.retain(|d| !d.is_finished());
            deliveries.extend(started);
        }
        evaluations
    }

    /// Wait for every delivery started by [`submit`](Self::submit).
    pub async fn flush_deliveries(&self) {
        let pending = std::mem::take(&mut *self.deliveries.lock());
        join_deliveries(pending).await;
    }

    pub fn pending_deliveries(&self) -> usize {
        self.deliveries.lock().iter().filter(|d| !d.is_finished()).count()
    }

    async fn evaluate_rules(&self, raised: RaisedAlert) -> (Vec<RuleEvaluation>, Vec<JoinHandle<()>>) {
        let rules = self.catalog.matching(&raised);
        if rules.is_empty() {
            debug!(intent_type = %raised.intent_type, "No alert rule matched");
            return (Vec::new(), Vec::new());
        }

        let now = self.runtime.time_provider.now_timestamp();
        let subject = raised.subject().into_owned();
        let mut evaluations = Vec::with_capacity(rules.len());
        let mut deliveries = Vec::new();
        for rule in rules {
            let key = CounterKey {
                rule_id: rule.id.clone(),
                subject: subject.clone(),
            };
            let verdict = self
                .counters
                .lock()
                .entry(key.clone())
                .or_default()
                .record(&rule, now, self.window_secs);

            let evaluation = match verdict {
                Err(suppression) => {
                    debug!(rule_id = %rule.id, subject = %subject, ?suppression, "Alert suppressed");
                    RuleEvaluation::Suppressed {
                        rule_id: rule.id.clone(),
                        suppression,
                    }
                }
                Ok(claim) => match self.fire(&rule, &raised).await {
                    Ok((alert_id, delivery)) => {
                        deliveries.push(delivery);
                        RuleEvaluation::Fired {
                            rule_id: rule.id.clone(),
                            alert_id,
                        }
                    }
                    Err(e) => {
                        warn!(rule_id = %rule.id, subject = %subject, error = %e, "Alert not stored");
                        if let Some(window) = self.counters.lock().get_mut(&key) {
                            window.release(claim);
                        }
                        RuleEvaluation::Failed {
                            rule_id: rule.id.clone(),
                            error: e.to_string(),
                        }
                    }
                },
            };
            evaluations.push(evaluation);
        }
        (evaluations, deliveries)
    }

    /// Store the alert, then hand notification and escalation to a task.
    async fn fire(&self, rule: &AlertRule, raised: &RaisedAlert) -> Result<(String, JoinHandle<()>), AlertError> {
        let alert = Alert::new(
            self.runtime.id_generator.next_id(),
            rule,
            raised,
            self.runtime.now(),
        );
        let alert_id = alert.id.clone();
        self.store.insert(alert.clone()).await?;
        info!(
            alert_id = %alert_id,
            rule_id = %rule.id,
            level = %rule.alert_level,
            session_id = %raised.session_id,
            "Alert fired"
        );
        self.runtime.events.emit(FlowEvent::AlertFired {
            alert_id: alert_id.clone(),
            rule_id: rule.id.clone(),
            level: rule.alert_level.to_string(),
            timestamp: alert.created_at,
        });

        let job = Delivery {
            store: self.store.clone(),
            dispatcher: self.dispatcher.clone(),
            scheduler: self.scheduler.clone(),
            methods: self.catalog.methods_for(&rule.id),
            rule: rule.clone(),
            alert,
        };
        let span = info_span!("alert_delivery", alert_id = %alert_id);
        let handle = tokio::spawn(job.run().instrument(span));
        Ok((alert_id, handle))
    }

    /// Close an alert and stop its escalation chain.
    pub async fn resolve(
        &self,
        alert_id: &str,
        resolution: Resolution,
        handled_by: Option<&str>,
    ) -> Result<Alert, AlertError> {
        let now = self.runtime.now();
        let handled_by = handled_by.map(str::to_string);
        let alert = self
            .store
            .update(
                alert_id,
                alert_update(move |a| {
                    if a.status.is_resolved() {
                        return Err(AlertError::AlreadyResolved(a.id.clone()));
                    }
                    a.status = resolution.into();
                    a.handled_at = Some(now);
                    a.handled_by = handled_by;
                    Ok(())
                }),
            )
            .await?;
        self.scheduler.cancel(alert_id);

        info!(alert_id, status = alert.status.as_str(), "Alert resolved");
        self.runtime.events.emit(FlowEvent::AlertResolved {
            alert_id: alert_id.to_string(),
            status: alert.status.as_str().to_string(),
            timestamp: now,
        });
        Ok(alert)
    }

    pub async fn alert(&self, alert_id: &str) -> Result<Option<Alert>, AlertError> {
        self.store.get(alert_id).await
    }

    pub async fn alerts(&self, query: &AlertQuery) -> Result<Vec<Alert>, AlertError> {
        self.store.query(query).await
    }

    /// Drop counters with no hits in the window and no running cooldown.
    pub fn evict_expired(&self) -> usize {
        let now = self.runtime.time_provider.now_timestamp();
        let window = self.window_secs;
        let mut counters = self.counters.lock();
        let before = counters.len();
        counters.retain(|_, w| {
            w.prune(now, window);
            !w.is_expired(now)
        });
        before - counters.len()
    }

    pub fn counter_count(&self) -> usize {
        self.counters.lock().len()
    }
}

#[async_trait]
impl AlertSink for AlertRuleEngine {
    async fn raise(&self, alert: RaisedAlert) -> Result<Vec<RuleEvaluation>, AlertError> {
        Ok(self.submit(alert).await)
    }
}

/// Level-0 notification of a stored alert, then its escalation timer.
struct Delivery {
    store: Arc<dyn AlertStore>,
    dispatcher: Arc<NotificationDispatcher>,
    scheduler: EscalationScheduler,
    methods: Vec<NotificationMethod>,
    rule: AlertRule,
    alert: Alert,
}

impl Delivery {
    async fn run(self) {
        let Delivery {
            store,
            dispatcher,
            scheduler,
            methods,
            rule,
            alert,
        } = self;
        let outcome = dispatcher.dispatch(&alert, &rule, &methods, 0).await;
        let alert_id = alert.id.clone();
        let alert = match store
            .update(
                &alert_id,
                alert_update(move |a| {
                    a.notification_status = outcome.status;
                    a.notification_result = outcome.results;
                    if outcome.status == NotificationStatus::Sent && a.status == AlertStatus::Pending {
                        a.status = AlertStatus::Sent;
                    }
                    Ok(())
                }),
            )
            .await
        {
            Ok(updated) => updated,
            Err(e) => {
                warn!(error = %e, "Notification result not stored");
                alert
            }
        };

        if let Err(e) = scheduler.schedule(&alert, &rule) {
            warn!(error = %e, "Escalation not scheduled");
        }
    }
}

async fn join_deliveries(deliveries: Vec<JoinHandle<()>>) {
    for delivery in deliveries {
        if let Err(e) = delivery.await {
            warn!(error = %e, "Alert delivery task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::alert::store::{AlertUpdate, MemoryAlertStore};
    use crate::core::runtime_context::FakeTimeProvider;
    use crate::dsl::RetryConfig;
    use crate::services::fake::RecordingNotifier;

    fn engine(rules: Vec<AlertRule>) -> (AlertRuleEngine, Arc<FakeTimeProvider>, Arc<RecordingNotifier>) {
        let methods = rules
            .iter()
            .map(|r| NotificationMethod::new(format!("m-{}", r.id), r.id.clone(), "im"))
            .collect();
        let notifier = Arc::new(RecordingNotifier::new("im"));
        let dispatcher = Arc::new(
            NotificationDispatcher::new(RetryConfig::fixed(0, 0), Duration::from_secs(1))
                .with_notifier(notifier.clone()),
        );
        let (runtime, clock) = RuntimeContext::fake(1_000);
        let engine = AlertRuleEngine::new(
            AlertRuleSet { rules, methods },
            Arc::new(MemoryAlertStore::new()),
            dispatcher,
            runtime,
        );
        (engine, clock, notifier)
    }

    fn raised(intent: &str, session: &str) -> RaisedAlert {
        RaisedAlert::new(intent, session, 0).with_message("退款还没到")
    }

    #[tokio::test]
    async fn test_cooldown_law() {
        let (engine, clock, _) = engine(vec![AlertRule::new("r1", "投诉").with_threshold(1, 300)]);

        let first = engine.evaluate(raised("投诉", "s1")).await.unwrap();
        assert!(first[0].is_fired());

        clock.advance_secs(100);
        let second = engine.evaluate(raised("投诉", "s1")).await.unwrap();
        assert_eq!(
            second[0],
            RuleEvaluation::Suppressed {
                rule_id: "r1".into(),
                suppression: Suppression::Cooldown { remaining_secs: 200 },
            }
        );

        clock.advance_secs(201);
        let third = engine.evaluate(raised("投诉", "s1")).await.unwrap();
        assert!(third[0].is_fired());
        assert_eq!(engine.alerts(&AlertQuery::rule("r1")).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_threshold_counts_within_window() {
        let (engine, clock, _) = engine(vec![AlertRule::new("r1", "投诉").with_threshold(3, 0)]);
        let engine = engine.with_window_secs(60);

        for expected in [1, 2] {
            let eval = engine.evaluate(raised("投诉", "s1")).await.unwrap();
            assert_eq!(
                eval[0],
                RuleEvaluation::Suppressed {
                    rule_id: "r1".into(),
                    suppression: Suppression::BelowThreshold { count: expected, threshold: 3 },
                }
            );
            clock.advance_secs(10);
        }
        // Other subjects count separately.
        let other = engine.evaluate(raised("投诉", "s2")).await.unwrap();
        assert!(!other[0].is_fired());

        assert!(engine.evaluate(raised("投诉", "s1")).await.unwrap()[0].is_fired());

        // Hits older than the window do not count.
        for _ in 0..2 {
            engine.evaluate(raised("投诉", "s3")).await.unwrap();
        }
        clock.advance_secs(61);
        let late = engine.evaluate(raised("投诉", "s3")).await.unwrap();
        assert!(matches!(
            late[0],
            RuleEvaluation::Suppressed {
                suppression: Suppression::BelowThreshold { count: 1, .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_all_matching_rules_fire_with_batch() {
        let (engine, _, notifier) = engine(vec![
            AlertRule::new("r1", "投诉"),
            AlertRule::new("r2", "投诉").with_keywords(["退款"]),
            AlertRule::new("r3", "投诉").with_keywords(["报警"]),
            AlertRule::new("r4", "chat"),
        ]);
        let eval = engine
            .evaluate(raised("投诉", "s1").with_batch("batch-9"))
            .await
            .unwrap();
        let fired: Vec<&str> = eval.iter().filter(|e| e.is_fired()).map(|e| e.rule_id()).collect();
        assert_eq!(fired, vec!["r1", "r2"]);

        let alerts = engine.alerts(&AlertQuery::session("s1")).await.unwrap();
        assert_eq!(alerts.len(), 2);
        assert!(alerts.iter().all(|a| a.batch_id.as_deref() == Some("batch-9")));
        assert!(alerts.iter().all(|a| a.status == AlertStatus::Sent));
        assert_eq!(notifier.deliveries().len(), 2);
    }

    #[tokio::test]
    async fn test_no_methods_marks_failed() {
        let (runtime, _) = RuntimeContext::fake(0);
        let engine = AlertRuleEngine::new(
            AlertRuleSet {
                rules: vec![AlertRule::new("r1", "投诉")],
                methods: vec![],
            },
            Arc::new(MemoryAlertStore::new()),
            Arc::new(NotificationDispatcher::new(RetryConfig::default(), Duration::from_secs(1))),
            runtime,
        );
        let eval = engine.evaluate(raised("投诉", "s1")).await.unwrap();
        let alert = engine.alert(eval[0].alert_id().unwrap()).await.unwrap().unwrap();
        assert_eq!(alert.notification_status, NotificationStatus::Failed);
        assert_eq!(alert.status, AlertStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_cancels_escalation() {
        let (engine, _, _) = engine(vec![AlertRule::new("r1", "投诉").with_escalation(3, 60)]);
        let eval = engine.evaluate(raised("投诉", "s1")).await.unwrap();
        let alert_id = eval[0].alert_id().unwrap().to_string();
        assert!(engine.scheduler().is_scheduled(&alert_id));

        let alert = engine
            .resolve(&alert_id, Resolution::Handled, Some("agent-1"))
            .await
            .unwrap();
        assert_eq!(alert.status, AlertStatus::Handled);
        assert_eq!(alert.handled_by.as_deref(), Some("agent-1"));
        assert_eq!(engine.scheduler().pending_count(), 0);

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(engine.alert(&alert_id).await.unwrap().unwrap().escalation_level, 0);
        assert!(matches!(
            engine.resolve(&alert_id, Resolution::Ignored, None).await,
            Err(AlertError::AlreadyResolved(_))
        ));
    }

    /// Memory store whose first `fail_inserts` inserts fail.
    struct FlakyStore {
        inner: MemoryAlertStore,
        fail_inserts: AtomicU32,
    }

    #[async_trait]
    impl AlertStore for FlakyStore {
        async fn insert(&self, alert: Alert) -> Result<(), AlertError> {
            let fail = self
                .fail_inserts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if fail {
                return Err(AlertError::Storage("disk full".into()));
            }
            self.inner.insert(alert).await
        }

        async fn get(&self, id: &str) -> Result<Option<Alert>, AlertError> {
            self.inner.get(id).await
        }

        async fn update(&self, id: &str, update: AlertUpdate<'_>) -> Result<Alert, AlertError> {
            self.inner.update(id, update).await
        }

        async fn query(&self, query: &AlertQuery) -> Result<Vec<Alert>, AlertError> {
            self.inner.query(query).await
        }
    }

    #[tokio::test]
    async fn test_failed_insert_leaves_no_cooldown() {
        let (runtime, _) = RuntimeContext::fake(1_000);
        let rules = vec![
            AlertRule::new("r1", "投诉").with_threshold(1, 300),
            AlertRule::new("r2", "投诉").with_threshold(1, 300),
        ];
        let store = Arc::new(FlakyStore {
            inner: MemoryAlertStore::new(),
            fail_inserts: AtomicU32::new(1),
        });
        let engine = AlertRuleEngine::new(
            AlertRuleSet { rules, methods: vec![] },
            store,
            Arc::new(NotificationDispatcher::new(RetryConfig::default(), Duration::from_secs(1))),
            runtime,
        );

        let first = engine.evaluate(raised("投诉", "s1")).await.unwrap();
        assert!(matches!(
            &first[0],
            RuleEvaluation::Failed { rule_id, error } if rule_id == "r1" && error.contains("disk full")
        ));
        assert!(first[1].is_fired());

        // r1 never stored an alert, so it is not cooling down.
        let second = engine.evaluate(raised("投诉", "s1")).await.unwrap();
        assert!(second[0].is_fired());
        assert!(matches!(
            second[1],
            RuleEvaluation::Suppressed {
                suppression: Suppression::Cooldown { .. },
                ..
            }
        ));
        assert_eq!(engine.alerts(&AlertQuery::session("s1")).await.unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_stores_before_delivery() {
        let notifier = Arc::new(RecordingNotifier::new("im").with_delay(Duration::from_secs(5)));
        let dispatcher = Arc::new(
            NotificationDispatcher::new(RetryConfig::fixed(0, 0), Duration::from_secs(10))
                .with_notifier(notifier.clone()),
        );
        let (runtime, _) = RuntimeContext::fake(1_000);
        let engine = AlertRuleEngine::new(
            AlertRuleSet {
                rules: vec![AlertRule::new("r1", "投诉").with_escalation(2, 60)],
                methods: vec![NotificationMethod::new("m1", "r1", "im")],
            },
            Arc::new(MemoryAlertStore::new()),
            dispatcher,
            runtime,
        );

        let eval = engine.submit(raised("投诉", "s1")).await;
        let alert_id = eval[0].alert_id().unwrap().to_string();
        let stored = engine.alert(&alert_id).await.unwrap().unwrap();
        assert_eq!(stored.notification_status, NotificationStatus::Pending);
        assert_eq!(engine.pending_deliveries(), 1);

        engine.flush_deliveries().await;
        let delivered = engine.alert(&alert_id).await.unwrap().unwrap();
        assert_eq!(delivered.notification_status, NotificationStatus::Sent);
        assert_eq!(delivered.status, AlertStatus::Sent);
        assert!(engine.scheduler().is_scheduled(&alert_id));
        assert_eq!(notifier.deliveries().len(), 1);
        assert_eq!(engine.pending_deliveries(), 0);
    }

    #[tokio::test]
    async fn test_evict_expired_counters() {
        let (engine, clock, _) = engine(vec![AlertRule::new("r1", "投诉").with_threshold(2, 30)]);
        let engine = engine.with_window_secs(60);
        engine.evaluate(raised("投诉", "s1")).await.unwrap();
        engine.evaluate(raised("投诉", "s1")).await.unwrap();
        engine.evaluate(raised("投诉", "s2")).await.unwrap();
        assert_eq!(engine.counter_count(), 2);

        clock.advance_secs(10);
        assert_eq!(engine.evict_expired(), 0);

        clock.advance_secs(61);
        assert_eq!(engine.evict_expired(), 2);
        assert_eq!(engine.counter_count(), 0);
    }
}
