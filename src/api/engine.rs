//! [`ChatFlowEngine`]: the entry point wiring flows, runs, sessions and
//! alerts together.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::alert::engine::AlertRuleEngine;
use crate::alert::notify::{LogNotifier, NotificationDispatcher, Notifier};
use crate::alert::store::{AlertQuery, AlertStore, MemoryAlertStore};
use crate::alert::types::{Alert, AlertRuleSet, Resolution};
use crate::config::EngineConfig;
use crate::core::dedup::MessageDeduplicator;
use crate::core::event::InboundEvent;
use crate::core::runner::{ExecutionRun, FlowRunner, RunStatus};
use crate::core::runtime_context::RuntimeContext;
use crate::core::session::SessionSerializer;
use crate::core::tracker::{FileTrackerStore, MemoryTrackerStore, TrackerStore};
use crate::dsl::FlowDefinition;
use crate::error::{AlertError, WorkflowError};
use crate::graph::{FlowGraph, FlowGraphCache};
use crate::nodes::NodeExecutorRegistry;
use crate::services::Services;

/// What happened to one inbound event.
#[derive(Debug)]
pub enum EventOutcome {
    Processed(ExecutionRun),
    /// The `msgId` was already handled inside the dedup window.
    Duplicate { msg_id: String },
}

impl EventOutcome {
    pub fn run(&self) -> Option<&ExecutionRun> {
        match self {
            EventOutcome::Processed(run) => Some(run),
            EventOutcome::Duplicate { .. } => None,
        }
    }

    pub fn into_run(self) -> Option<ExecutionRun> {
        match self {
            EventOutcome::Processed(run) => Some(run),
            EventOutcome::Duplicate { .. } => None,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, EventOutcome::Duplicate { .. })
    }
}

/// Counts from one retention pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub runs: usize,
    pub dedup_entries: usize,
    pub alert_counters: usize,
}

struct EngineInner {
    config: EngineConfig,
    registry: Arc<NodeExecutorRegistry>,
    graphs: FlowGraphCache,
    /// flow id → active version
    active: RwLock<HashMap<String, String>>,
    default_flow: RwLock<Option<String>>,
    runner: FlowRunner,
    alerts: Arc<AlertRuleEngine>,
    tracker: Arc<dyn TrackerStore>,
    dedup: MessageDeduplicator,
    sessions: SessionSerializer,
    workers: Arc<Semaphore>,
    runtime: RuntimeContext,
}

/// 聊天流程引擎
///
/// Cheap to clone; clones share every store and queue.
#[derive(Clone)]
pub struct ChatFlowEngine {
    inner: Arc<EngineInner>,
}

impl ChatFlowEngine {
    pub fn builder() -> ChatFlowEngineBuilder {
        ChatFlowEngineBuilder::default()
    }

    /// Validate and activate a flow definition. The first installed flow is
    /// the default for [`handle_event`](Self::handle_event).
    pub fn install_flow(&self, flow: &FlowDefinition) -> Result<Arc<FlowGraph>, WorkflowError> {
        let graph = self.inner.graphs.get_or_build(flow, &self.inner.registry)?;
        self.inner
            .active
            .write()
            .insert(flow.id.clone(), flow.version.clone());
        let mut default_flow = self.inner.default_flow.write();
        if default_flow.is_none() {
            *default_flow = Some(flow.id.clone());
        }
        info!(flow_id = %flow.id, version = %flow.version, nodes = graph.node_count(), "Flow installed");
        Ok(graph)
    }

    pub fn set_default_flow(&self, flow_id: &str) -> Result<(), WorkflowError> {
        if !self.inner.active.read().contains_key(flow_id) {
            return Err(WorkflowError::ConfigError(format!("flow '{}' is not installed", flow_id)));
        }
        *self.inner.default_flow.write() = Some(flow_id.to_string());
        Ok(())
    }

    fn active_graph(&self, flow_id: &str) -> Result<Arc<FlowGraph>, WorkflowError> {
        let version = self
            .inner
            .active
            .read()
            .get(flow_id)
            .cloned()
            .ok_or_else(|| WorkflowError::ConfigError(format!("flow '{}' is not installed", flow_id)))?;
        self.inner
            .graphs
            .get(flow_id, &version)
            .ok_or_else(|| WorkflowError::InternalError(format!("graph for '{}' v{} missing", flow_id, version)))
    }

    /// Run `event` through the default flow.
    pub async fn handle_event(&self, event: InboundEvent) -> Result<EventOutcome, WorkflowError> {
        let flow_id = self
            .inner
            .default_flow
            .read()
            .clone()
            .ok_or_else(|| WorkflowError::ConfigError("no flow installed".to_string()))?;
        self.handle_event_for(&flow_id, event).await
    }

    /// Run `event` through `flow_id`: dedup, wait for the session, then for a
    /// worker slot.
    pub async fn handle_event_for(
        &self,
        flow_id: &str,
        event: InboundEvent,
    ) -> Result<EventOutcome, WorkflowError> {
        let graph = self.active_graph(flow_id)?;
        if !self.inner.dedup.check_and_record(&event.robot_id, &event.msg_id) {
            info!(msg_id = %event.msg_id, "Duplicate message dropped");
            return Ok(EventOutcome::Duplicate {
                msg_id: event.msg_id,
            });
        }

        let _session = self.inner.sessions.acquire(&event.session_key()).await;
        let _worker = self
            .inner
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| WorkflowError::InternalError(e.to_string()))?;

        let run = self.inner.runner.run(&graph, event).await?;
        Ok(EventOutcome::Processed(run))
    }

    /// Handle `event` on a background task.
    pub fn submit(&self, event: InboundEvent) -> JoinHandle<Result<EventOutcome, WorkflowError>> {
        let engine = self.clone();
        tokio::spawn(async move { engine.handle_event(event).await })
    }

    pub async fn resolve_alert(
        &self,
        alert_id: &str,
        resolution: Resolution,
        handled_by: Option<&str>,
    ) -> Result<Alert, AlertError> {
        self.inner.alerts.resolve(alert_id, resolution, handled_by).await
    }

    pub async fn alerts(&self, query: &AlertQuery) -> Result<Vec<Alert>, AlertError> {
        self.inner.alerts.alerts(query).await
    }

    pub fn replace_alert_rules(&self, rules: AlertRuleSet) {
        self.inner.alerts.replace_rules(rules);
    }

    pub fn alert_engine(&self) -> &Arc<AlertRuleEngine> {
        &self.inner.alerts
    }

    pub async fn runs_for_session(&self, session_id: &str) -> Result<Vec<ExecutionRun>, WorkflowError> {
        self.inner
            .tracker
            .list_by_session(session_id)
            .await
            .map_err(|e| WorkflowError::TrackerError(e.to_string()))
    }

    pub async fn run(&self, run_id: &str) -> Result<Option<ExecutionRun>, WorkflowError> {
        self.inner
            .tracker
            .load(run_id)
            .await
            .map_err(|e| WorkflowError::TrackerError(e.to_string()))
    }

    /// Resume runs left pending or running by a previous process. Runs whose
    /// flow version is not installed are skipped.
    pub async fn recover(&self) -> Result<Vec<ExecutionRun>, WorkflowError> {
        let tracker = &self.inner.tracker;
        let mut interrupted = tracker
            .list_by_status(RunStatus::Running)
            .await
            .map_err(|e| WorkflowError::TrackerError(e.to_string()))?;
        interrupted.extend(
            tracker
                .list_by_status(RunStatus::Pending)
                .await
                .map_err(|e| WorkflowError::TrackerError(e.to_string()))?,
        );

        let mut resumed = Vec::with_capacity(interrupted.len());
        for run in interrupted {
            let Some(graph) = self.inner.graphs.get(&run.flow_id, &run.flow_version) else {
                warn!(run_id = %run.id, flow_id = %run.flow_id, version = %run.flow_version, "Flow version not installed; run not resumed");
                continue;
            };
            let _session = self.inner.sessions.acquire(&run.session_id).await;
            resumed.push(self.inner.runner.resume(&graph, run).await?);
        }
        info!(resumed = resumed.len(), "Recovery finished");
        Ok(resumed)
    }

    /// Drop expired run records, dedup entries and idle alert counters.
    pub async fn purge_expired(&self) -> Result<PurgeReport, WorkflowError> {
        let retention = chrono::Duration::seconds(self.inner.config.retention_secs as i64);
        let cutoff = self.inner.runtime.now() - retention;
        let runs = self
            .inner
            .tracker
            .purge_completed_before(cutoff)
            .await
            .map_err(|e| WorkflowError::TrackerError(e.to_string()))?;
        let report = PurgeReport {
            runs,
            dedup_entries: self.inner.dedup.evict_expired(),
            alert_counters: self.inner.alerts.evict_expired(),
        };
        info!(?report, "Retention pass finished");
        Ok(report)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Sessions with a running or queued event.
    pub fn active_sessions(&self) -> usize {
        self.inner.sessions.active_sessions()
    }

    /// Stop escalation timers. In-flight runs finish normally.
    pub fn shutdown(&self) {
        self.inner.alerts.scheduler().shutdown();
    }
}

/// Builder for [`ChatFlowEngine`].
#[derive(Default)]
pub struct ChatFlowEngineBuilder {
    config: EngineConfig,
    services: Option<Services>,
    registry: Option<NodeExecutorRegistry>,
    tracker: Option<Arc<dyn TrackerStore>>,
    alert_store: Option<Arc<dyn AlertStore>>,
    rules: AlertRuleSet,
    notifiers: Vec<Arc<dyn Notifier>>,
    runtime: RuntimeContext,
    flows: Vec<FlowDefinition>,
}

impl ChatFlowEngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Collaborators for the built-in node handlers.
    pub fn services(mut self, services: Services) -> Self {
        self.services = Some(services);
        self
    }

    /// Replace the built-in registry entirely.
    pub fn registry(mut self, registry: NodeExecutorRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn tracker(mut self, tracker: Arc<dyn TrackerStore>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn alert_store(mut self, store: Arc<dyn AlertStore>) -> Self {
        self.alert_store = Some(store);
        self
    }

    pub fn alert_rules(mut self, rules: AlertRuleSet) -> Self {
        self.rules = rules;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn runtime(mut self, runtime: RuntimeContext) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn flow(mut self, flow: FlowDefinition) -> Self {
        self.flows.push(flow);
        self
    }

    pub fn build(self) -> Result<ChatFlowEngine, WorkflowError> {
        let config = self.config;
        let registry = match (self.registry, &self.services) {
            (Some(registry), _) => registry,
            (None, Some(services)) => NodeExecutorRegistry::with_builtins(services),
            (None, None) => {
                return Err(WorkflowError::ConfigError(
                    "either services or a node registry is required".to_string(),
                ))
            }
        };
        let registry = Arc::new(registry);

        let tracker: Arc<dyn TrackerStore> = match (self.tracker, &config.tracker_dir) {
            (Some(tracker), _) => tracker,
            (None, Some(dir)) => Arc::new(
                FileTrackerStore::new(dir).map_err(|e| WorkflowError::TrackerError(e.to_string()))?,
            ),
            (None, None) => Arc::new(MemoryTrackerStore::new()),
        };

        let mut dispatcher = NotificationDispatcher::new(
            config.notify_retry.clone(),
            Duration::from_millis(config.notify_timeout_ms),
        )
        .with_notifier(Arc::new(LogNotifier));
        for notifier in self.notifiers {
            dispatcher.register(notifier);
        }

        let runtime = self.runtime;
        let alert_store = self
            .alert_store
            .unwrap_or_else(|| Arc::new(MemoryAlertStore::new()));
        let alerts = Arc::new(
            AlertRuleEngine::new(self.rules, alert_store, Arc::new(dispatcher), runtime.clone())
                .with_window_secs(config.counter_window_secs),
        );

        let runner = FlowRunner::new(registry.clone(), tracker.clone(), runtime.clone())
            .with_alert_sink(alerts.clone())
            .with_max_steps(config.max_steps)
            .with_default_timeout_ms(config.default_flow_timeout_ms);

        let engine = ChatFlowEngine {
            inner: Arc::new(EngineInner {
                registry,
                graphs: FlowGraphCache::new(),
                active: RwLock::new(HashMap::new()),
                default_flow: RwLock::new(None),
                runner,
                alerts,
                tracker,
                dedup: MessageDeduplicator::new(config.dedup_window_secs, runtime.time_provider.clone()),
                sessions: SessionSerializer::new(),
                workers: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
                runtime,
                config,
            }),
        };
        for flow in &self.flows {
            engine.install_flow(flow)?;
        }
        Ok(engine)
    }
}
