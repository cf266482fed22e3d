//! Flow runner: walks one inbound event through a validated flow graph.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

use super::context::ExecutionContext;
use super::event::InboundEvent;
use super::event_bus::FlowEvent;
use super::runtime_context::RuntimeContext;
use super::tracker::TrackerStore;
use crate::alert::engine::AlertSink;
use crate::alert::types::RaisedAlert;
use crate::error::{ErrorCode, NodeError, WorkflowError};
use crate::graph::{FlowGraph, FlowNode};
use crate::nodes::{NodeContext, NodeExecutor, NodeExecutorRegistry, NodeOutcome, NodeType};

pub use crate::domain::execution::{ExecutionRun, RunStatus, StepRecord, StepStatus};

pub const DEFAULT_MAX_STEPS: usize = 100;

/// 流程执行器
pub struct FlowRunner {
    registry: Arc<NodeExecutorRegistry>,
    tracker: Arc<dyn TrackerStore>,
    alert_sink: Option<Arc<dyn AlertSink>>,
    runtime: RuntimeContext,
    max_steps: usize,
    default_timeout_ms: u64,
}

impl FlowRunner {
    pub fn new(
        registry: Arc<NodeExecutorRegistry>,
        tracker: Arc<dyn TrackerStore>,
        runtime: RuntimeContext,
    ) -> Self {
        Self {
            registry,
            tracker,
            alert_sink: None,
            runtime,
            max_steps: DEFAULT_MAX_STEPS,
            default_timeout_ms: 30_000,
        }
    }

    pub fn with_alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alert_sink = Some(sink);
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Flow timeout used when a flow declares `timeout: 0`.
    pub fn with_default_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }

    pub fn runtime(&self) -> &RuntimeContext {
        &self.runtime
    }

    /// Create a pending run for `event`: flow variables first, then the
    /// event fields, then run identifiers.
    pub fn prepare(&self, graph: &FlowGraph, event: InboundEvent) -> ExecutionRun {
        let run_id = self.runtime.id_generator.next_id();
        let mut context = ExecutionContext::from_map(graph.variables.clone());
        context.apply_patch(event.to_context_values());
        context.set("runId", run_id.clone().into());
        context.set("flowId", graph.flow_id.clone().into());
        // Alerts raised while handling one event share a batch.
        if !context.contains("batchId") {
            context.set("batchId", run_id.clone().into());
        }

        ExecutionRun::new(
            run_id,
            &graph.flow_id,
            &graph.version,
            event,
            context,
            &graph.start_id,
            self.runtime.now(),
        )
    }

    /// Run `event` through `graph` to a terminal status.
    ///
    /// Node failures end in `Ok` with a failed or timed-out run; `Err` is
    /// reserved for an inactive flow or a graph the runner cannot walk.
    pub async fn run(&self, graph: &FlowGraph, event: InboundEvent) -> Result<ExecutionRun, WorkflowError> {
        if !graph.is_active {
            return Err(WorkflowError::FlowInactive(graph.flow_id.clone()));
        }
        let run = self.prepare(graph, event);
        self.execute(graph, run).await
    }

    /// Continue a checkpointed run from its `current_node`.
    pub async fn resume(&self, graph: &FlowGraph, run: ExecutionRun) -> Result<ExecutionRun, WorkflowError> {
        if run.is_terminal() {
            return Ok(run);
        }
        info!(run_id = %run.id, node = ?run.current_node, "Resuming run");
        self.execute(graph, run).await
    }

    async fn execute(&self, graph: &FlowGraph, mut run: ExecutionRun) -> Result<ExecutionRun, WorkflowError> {
        let span = info_span!("flow_run", run_id = %run.id, flow_id = %run.flow_id, session_id = %run.session_id);
        async {
            run.status = RunStatus::Running;
            self.checkpoint(&run).await;
            self.runtime.events.emit(FlowEvent::RunStarted {
                run_id: run.id.clone(),
                flow_id: run.flow_id.clone(),
                session_id: run.session_id.clone(),
                timestamp: self.runtime.now(),
            });

            let timeout_ms = match graph.timeout_ms {
                0 => self.default_timeout_ms,
                ms => ms,
            };
            let started = Instant::now();
            let walked = tokio::time::timeout(Duration::from_millis(timeout_ms), self.walk(graph, &mut run)).await;

            let (status, failure) = match walked {
                Ok(Ok(status)) => (status, None),
                Ok(Err(e)) => {
                    run.error = Some(e.to_string());
                    (RunStatus::Failed, Some(e))
                }
                Err(_) => {
                    warn!(timeout_ms, node = ?run.current_node, "Flow timed out");
                    let error = WorkflowError::Timeout(timeout_ms);
                    self.record_cut_off(graph, &mut run, &error);
                    run.error = Some(error.to_string());
                    (RunStatus::TimedOut, None)
                }
            };

            run.finish(status, self.runtime.now());
            self.checkpoint(&run).await;
            let duration_ms = started.elapsed().as_millis() as u64;
            self.runtime.events.emit(FlowEvent::RunFinished {
                run_id: run.id.clone(),
                status: status.to_string(),
                duration_ms,
                timestamp: self.runtime.now(),
            });
            info!(status = %status, steps = run.steps.len(), duration_ms, "Flow run finished");

            match failure {
                Some(e) => Err(e),
                None => Ok(run),
            }
        }
        .instrument(span)
        .await
    }

    async fn walk(&self, graph: &FlowGraph, run: &mut ExecutionRun) -> Result<RunStatus, WorkflowError> {
        let mut steps = 0usize;
        loop {
            let Some(node_id) = run.current_node.clone() else {
                return Ok(RunStatus::Completed);
            };
            let node = graph
                .node(&node_id)
                .ok_or_else(|| WorkflowError::NodeNotFound(node_id.clone()))?;
            if node.node_type == NodeType::End {
                run.end_node = Some(node_id);
                return Ok(RunStatus::Completed);
            }

            steps += 1;
            if steps > self.max_steps {
                warn!(max_steps = self.max_steps, node_id = %node_id, "Step limit reached");
                run.error = Some(WorkflowError::MaxStepsExceeded(self.max_steps).to_string());
                return Ok(RunStatus::Failed);
            }

            let executor = self
                .registry
                .get(node.node_type)
                .ok_or_else(|| WorkflowError::ExecutorNotFound(node.node_type.to_string()))?
                .clone();

            let started_at = self.runtime.now();
            run.node_started_at = Some(started_at);
            let clock = Instant::now();
            let (result, attempts) = self
                .execute_with_retry(graph, node, executor.as_ref(), &run.id, &run.context)
                .await;
            let duration_ms = clock.elapsed().as_millis() as u64;

            let (next, raised_alert) = match result {
                Ok(outcome) => self.complete_step(graph, node, run, outcome, attempts, duration_ms, started_at)?,
                Err(e) => {
                    let Some(fallback) = self.fail_step(graph, node, run, e, attempts, duration_ms, started_at)
                    else {
                        let timed_out = run.last_step().is_some_and(|s| s.status == StepStatus::TimedOut);
                        return Ok(if timed_out { RunStatus::TimedOut } else { RunStatus::Failed });
                    };
                    (fallback, None)
                }
            };

            run.current_node = Some(next);
            if let Some(alert) = raised_alert {
                self.forward_alert(alert).await;
            }
            self.checkpoint(run).await;
        }
    }

    /// Apply a successful outcome and pick the successor. Returns the
    /// successor and the alert the node raised, if any.
    #[allow(clippy::too_many_arguments)]
    fn complete_step(
        &self,
        graph: &FlowGraph,
        node: &FlowNode,
        run: &mut ExecutionRun,
        outcome: NodeOutcome,
        attempts: u32,
        duration_ms: u64,
        started_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<(String, Option<RaisedAlert>), WorkflowError> {
        let NodeOutcome {
            context_patch,
            next_hint,
            next_target,
            raised_alert,
        } = outcome;
        let patch_keys = run.context.apply_patch(context_patch);

        let next = if node.node_type == NodeType::Decision {
            let target = next_target.ok_or_else(|| {
                WorkflowError::InternalError(format!("decision node '{}' chose no target", node.id))
            })?;
            let label = next_hint.clone().unwrap_or_else(|| target.clone());
            debug!(node_id = %node.id, branch = %label, target = %target, "Branch selected");
            self.runtime.events.emit(FlowEvent::BranchSelected {
                run_id: run.id.clone(),
                node_id: node.id.clone(),
                label: label.clone(),
                target: target.clone(),
                timestamp: self.runtime.now(),
            });
            run.decision = Some(label);
            target
        } else {
            graph
                .next_after(&node.id)
                .map(str::to_string)
                .ok_or_else(|| WorkflowError::InternalError(format!("node '{}' has no successor", node.id)))?
        };

        self.runtime.events.emit(FlowEvent::NodeFinished {
            run_id: run.id.clone(),
            node_id: node.id.clone(),
            duration_ms,
            patch_keys: patch_keys.clone(),
            timestamp: self.runtime.now(),
        });
        run.push_step(StepRecord {
            node_id: node.id.clone(),
            node_type: node.node_type.to_string(),
            status: StepStatus::Success,
            duration_ms,
            attempts,
            patch_keys,
            branch: next_hint,
            error: None,
            error_code: None,
            started_at,
        });
        Ok((next, raised_alert))
    }

    /// Record a failed step. Returns the fallback successor, if any.
    #[allow(clippy::too_many_arguments)]
    fn fail_step(
        &self,
        graph: &FlowGraph,
        node: &FlowNode,
        run: &mut ExecutionRun,
        error: NodeError,
        attempts: u32,
        duration_ms: u64,
        started_at: chrono::DateTime<chrono::Utc>,
    ) -> Option<String> {
        warn!(node_id = %node.id, attempts, error = %error, "Node failed");
        self.runtime.events.emit(FlowEvent::NodeFailed {
            run_id: run.id.clone(),
            node_id: node.id.clone(),
            error: error.to_string(),
            timestamp: self.runtime.now(),
        });

        let decision_default = graph
            .decision(&node.id)
            .filter(|_| node.node_type == NodeType::Decision)
            .map(|d| d.default_selection());
        let (fallback, branch) = match (&node.fallback_target, decision_default) {
            (Some(target), _) => (Some(target.clone()), None),
            (None, Some(selection)) => (Some(selection.target), Some(selection.label)),
            (None, None) => (None, None),
        };

        run.error = Some(format!("{}: {}", node.id, error));
        run.push_step(StepRecord {
            node_id: node.id.clone(),
            node_type: node.node_type.to_string(),
            status: if error.is_timeout() {
                StepStatus::TimedOut
            } else {
                StepStatus::Failed
            },
            duration_ms,
            attempts,
            patch_keys: Vec::new(),
            branch: branch.clone(),
            error: Some(error.to_string()),
            error_code: Some(error.error_code()),
            started_at,
        });

        if let Some(target) = &fallback {
            info!(node_id = %node.id, fallback = %target, "Continuing on fallback path");
            if branch.is_some() {
                run.decision = branch;
            }
        }
        fallback
    }

    /// Execute one node under its timeout, retrying per its retry policy.
    /// Returns the last result and the number of attempts made.
    async fn execute_with_retry(
        &self,
        graph: &FlowGraph,
        node: &FlowNode,
        executor: &dyn NodeExecutor,
        run_id: &str,
        context: &ExecutionContext,
    ) -> (Result<NodeOutcome, NodeError>, u32) {
        let retry = graph.effective_retry(node);
        let timeout = graph.effective_timeout(node);
        let max_retries = retry.max_retries;

        let mut attempt = 0u32;
        loop {
            let ctx = NodeContext {
                run_id,
                node_id: &node.id,
                node_type: node.node_type,
                config: &node.config,
                decision: graph.decision(&node.id),
                context,
                runtime: &self.runtime,
                attempt,
            };
            let result = match tokio::time::timeout(timeout, executor.execute(&ctx)).await {
                Ok(r) => r,
                Err(_) => Err(NodeError::Timeout(timeout.as_millis() as u64)),
            };

            let error = match result {
                Ok(outcome) => return (Ok(outcome), attempt + 1),
                Err(e) => e,
            };
            let should_retry =
                attempt < max_retries && (!retry.retry_on_retryable_only || error.is_retryable());
            if !should_retry {
                return (Err(error), attempt + 1);
            }

            let interval = retry.interval_for(attempt);
            debug!(node_id = %node.id, attempt, error = %error, interval_ms = interval.as_millis() as u64, "Retrying node");
            self.runtime.events.emit(FlowEvent::NodeRetry {
                run_id: run_id.to_string(),
                node_id: node.id.clone(),
                attempt: attempt + 1,
                error: error.to_string(),
                timestamp: self.runtime.now(),
            });
            if !interval.is_zero() {
                tokio::time::sleep(interval).await;
            }
            attempt += 1;
        }
    }

    /// Hand `alert` to the sink on its own task, so a flow timeout cannot
    /// drop it half-evaluated.
    async fn forward_alert(&self, alert: RaisedAlert) {
        let Some(sink) = self.alert_sink.clone() else {
            debug!(intent_type = %alert.intent_type, "No alert sink; raised alert dropped");
            return;
        };
        let evaluated = tokio::spawn(async move { sink.raise(alert).await }.in_current_span());
        match evaluated.await {
            Ok(Ok(evaluations)) => {
                let fired = evaluations.iter().filter(|e| e.is_fired()).count();
                debug!(rules = evaluations.len(), fired, "Raised alert evaluated");
            }
            Ok(Err(e)) => warn!(error = %e, "Alert sink failed"),
            Err(e) => warn!(error = %e, "Alert sink task failed"),
        }
    }

    /// Log the node a flow timeout interrupted.
    fn record_cut_off(&self, graph: &FlowGraph, run: &mut ExecutionRun, error: &WorkflowError) {
        let (Some(node_id), Some(started_at)) = (run.current_node.clone(), run.node_started_at) else {
            return;
        };
        let now = self.runtime.now();
        let node_type = graph
            .node(&node_id)
            .map(|n| n.node_type.to_string())
            .unwrap_or_default();
        self.runtime.events.emit(FlowEvent::NodeFailed {
            run_id: run.id.clone(),
            node_id: node_id.clone(),
            error: error.to_string(),
            timestamp: now,
        });
        run.push_step(StepRecord {
            node_id,
            node_type,
            status: StepStatus::TimedOut,
            duration_ms: (now - started_at).num_milliseconds().max(0) as u64,
            attempts: 1,
            patch_keys: Vec::new(),
            branch: None,
            error: Some(error.to_string()),
            error_code: Some(ErrorCode::Timeout),
            started_at,
        });
    }

    async fn checkpoint(&self, run: &ExecutionRun) {
        if let Err(e) = self.tracker.save(run).await {
            warn!(run_id = %run.id, error = %e, "Checkpoint failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Value};

    use super::*;
    use crate::alert::types::RuleEvaluation;
    use crate::core::event_bus::create_event_channel;
    use crate::core::tracker::MemoryTrackerStore;
    use crate::dsl::FlowDefinition;
    use crate::error::AlertError;
    use crate::graph::build_flow_graph;
    use crate::services::fake::{FakeAiService, FakeKnowledgeBase, RecordingGateway};
    use crate::services::Services;

    struct FailingExecutor {
        node_type: NodeType,
        failures: AtomicU32,
        delay: Option<Duration>,
    }

    impl FailingExecutor {
        fn new(node_type: NodeType, failures: u32) -> Self {
            Self {
                node_type,
                failures: AtomicU32::new(failures),
                delay: None,
            }
        }

        fn slow(node_type: NodeType, delay: Duration) -> Self {
            Self {
                node_type,
                failures: AtomicU32::new(0),
                delay: Some(delay),
            }
        }
    }

    #[async_trait]
    impl NodeExecutor for FailingExecutor {
        fn node_type(&self) -> NodeType {
            self.node_type
        }

        async fn execute(&self, _ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let failed = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(NodeError::ExecutionError("induced failure".into()));
            }
            Ok(NodeOutcome::patch(
                [("reply".to_string(), json!("ok"))].into_iter().collect(),
            ))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        raised: Mutex<Vec<RaisedAlert>>,
        fail: bool,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        async fn raise(&self, alert: RaisedAlert) -> Result<Vec<RuleEvaluation>, AlertError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.raised.lock().push(alert);
            if self.fail {
                return Err(AlertError::Storage("sink down".into()));
            }
            Ok(Vec::new())
        }
    }

    /// start → receive → reply → send → end
    fn linear_flow() -> Value {
        json!({
            "id": "linear",
            "name": "Linear",
            "nodes": [
                {"id": "start", "type": "start"},
                {"id": "receive", "type": "message_receive"},
                {"id": "reply", "type": "ai_reply"},
                {"id": "send", "type": "send_command"},
                {"id": "end", "type": "end"}
            ],
            "edges": [
                {"id": "e1", "source": "start", "target": "receive"},
                {"id": "e2", "source": "receive", "target": "reply"},
                {"id": "e3", "source": "reply", "target": "send"},
                {"id": "e4", "source": "send", "target": "end"}
            ]
        })
    }

    fn event(text: &str) -> InboundEvent {
        InboundEvent {
            spoken: text.into(),
            received_name: "alice".into(),
            room_type: 2,
            msg_id: "m1".into(),
            robot_id: "bot".into(),
            ..Default::default()
        }
    }

    struct Harness {
        runner: FlowRunner,
        tracker: Arc<MemoryTrackerStore>,
        gateway: Arc<RecordingGateway>,
    }

    fn harness(ai: FakeAiService, overrides: Vec<Arc<dyn NodeExecutor>>) -> (Harness, NodeExecutorRegistry) {
        let gateway = Arc::new(RecordingGateway::new());
        let services = Services::new(Arc::new(ai), Arc::new(FakeKnowledgeBase::new()), gateway.clone());
        let mut registry = NodeExecutorRegistry::with_builtins(&services);
        for executor in overrides {
            registry.register(executor);
        }
        let tracker = Arc::new(MemoryTrackerStore::new());
        let (runtime, _) = RuntimeContext::fake(1_700_000_000);
        let runner = FlowRunner::new(Arc::new(registry.clone()), tracker.clone(), runtime);
        (
            Harness {
                runner,
                tracker,
                gateway,
            },
            registry,
        )
    }

    fn graph(flow: Value, registry: &NodeExecutorRegistry) -> FlowGraph {
        let flow: FlowDefinition = serde_json::from_value(flow).unwrap();
        build_flow_graph(&flow, registry).unwrap()
    }

    #[tokio::test]
    async fn test_linear_flow_completes() {
        let (h, registry) = harness(FakeAiService::new(), vec![]);
        let g = graph(linear_flow(), &registry);
        let run = h.runner.run(&g, event("你好")).await.unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.executed_nodes(), vec!["start", "receive", "reply", "send"]);
        assert_eq!(run.end_node.as_deref(), Some("end"));
        assert!(run.error.is_none());
        assert_eq!(h.gateway.sent().len(), 1);

        let saved = h.tracker.load(&run.id).await.unwrap().unwrap();
        assert_eq!(saved.status, RunStatus::Completed);
        assert_eq!(saved.steps.len(), 4);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let (h, registry) = harness(FakeAiService::new().failing_generate(2), vec![]);
        let mut flow = linear_flow();
        flow["retryConfig"] = json!({"maxRetries": 2, "retryInterval": 0});
        let g = graph(flow, &registry);

        let (tx, mut rx) = create_event_channel();
        let runner = FlowRunner {
            runtime: h.runner.runtime.clone().with_event_tx(tx),
            ..h.runner
        };
        let run = runner.run(&g, event("你好")).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.step("reply").unwrap().attempts, 3);

        let mut retries = 0;
        while let Ok(ev) = rx.try_recv() {
            if matches!(ev, FlowEvent::NodeRetry { .. }) {
                retries += 1;
            }
        }
        assert_eq!(retries, 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_run() {
        let (h, registry) = harness(FakeAiService::new().failing_generate(5), vec![]);
        let mut flow = linear_flow();
        flow["retryConfig"] = json!({"maxRetries": 1, "retryInterval": 0});
        let g = graph(flow, &registry);

        let run = h.runner.run(&g, event("你好")).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.executed_nodes(), vec!["start", "receive", "reply"]);
        let step = run.last_step().unwrap();
        assert_eq!(step.status, StepStatus::Failed);
        assert_eq!(step.attempts, 2);
        assert!(run.error.as_deref().unwrap().starts_with("reply:"));
        assert!(h.gateway.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_timeout_yields_timed_out() {
        let slow = Arc::new(FailingExecutor::slow(NodeType::AiReply, Duration::from_secs(5)));
        let (h, registry) = harness(FakeAiService::new(), vec![slow]);
        let mut flow = linear_flow();
        flow["nodes"][2]["data"] = json!({"timeout": 100, "retryConfig": {"maxRetries": 1, "retryInterval": 0}});
        let g = graph(flow, &registry);

        let run = h.runner.run(&g, event("你好")).await.unwrap();
        assert_eq!(run.status, RunStatus::TimedOut);
        let step = run.last_step().unwrap();
        assert_eq!(step.status, StepStatus::TimedOut);
        assert_eq!(step.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flow_timeout_bounds_run() {
        let slow = Arc::new(FailingExecutor::slow(NodeType::AiReply, Duration::from_millis(800)));
        let (h, registry) = harness(FakeAiService::new(), vec![slow]);
        let mut flow = linear_flow();
        flow["timeout"] = json!(500);
        flow["nodes"][2]["data"] = json!({"timeout": 5000});
        let g = graph(flow, &registry);

        let run = h.runner.run(&g, event("你好")).await.unwrap();
        assert_eq!(run.status, RunStatus::TimedOut);
        assert!(run.error.as_deref().unwrap().contains("500"));

        // The interrupted node is in the step log.
        assert_eq!(run.executed_nodes(), vec!["start", "receive", "reply"]);
        let cut = run.last_step().unwrap();
        assert_eq!(cut.status, StepStatus::TimedOut);
        assert_eq!(cut.node_type, "ai_reply");
        assert_eq!(cut.error_code, Some(ErrorCode::Timeout));
        assert!(run.current_node.is_none());
        assert!(run.node_started_at.is_none());

        let saved = h.tracker.load(&run.id).await.unwrap().unwrap();
        assert_eq!(saved.last_step().unwrap().node_id, "reply");
        assert_eq!(saved.last_step().unwrap().status, StepStatus::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flow_timeout_does_not_drop_raised_alert() {
        let (h, registry) = harness(FakeAiService::new(), vec![]);
        let mut flow = decision_flow();
        flow["timeout"] = json!(500);
        let g = graph(flow, &registry);
        let sink = Arc::new(RecordingSink {
            delay: Some(Duration::from_secs(2)),
            ..Default::default()
        });
        let runner = h.runner.with_alert_sink(sink.clone());

        let run = runner.run(&g, event("转人工")).await.unwrap();
        assert_eq!(run.status, RunStatus::TimedOut);
        assert_eq!(run.executed_nodes(), vec!["start", "route", "staff"]);
        assert!(sink.raised.lock().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(sink.raised.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_fallback_target_continues() {
        let failing = Arc::new(FailingExecutor::new(NodeType::AiReply, 10));
        let (h, registry) = harness(FakeAiService::new(), vec![failing]);
        let mut flow = linear_flow();
        flow["nodes"]
            .as_array_mut()
            .unwrap()
            .push(json!({"id": "handoff", "type": "staff_intervention"}));
        flow["edges"]
            .as_array_mut()
            .unwrap()
            .push(json!({"id": "e5", "source": "handoff", "target": "send"}));
        flow["nodes"][2]["data"] = json!({"fallbackTarget": "handoff"});
        let g = graph(flow, &registry);

        let run = h.runner.run(&g, event("你好")).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.executed_nodes(), vec!["start", "receive", "reply", "handoff", "send"]);
        assert_eq!(run.step("reply").unwrap().status, StepStatus::Failed);
        assert!(run.error.is_some());
        assert_eq!(run.context.get_bool("handoff"), Some(true));
    }

    fn decision_flow() -> Value {
        json!({
            "id": "route",
            "name": "Route",
            "nodes": [
                {"id": "start", "type": "start"},
                {"id": "route", "type": "decision", "data": {"config": {
                    "conditions": [{"condition": "spoken contains '人工'", "targetNodeId": "staff", "label": "human"}],
                    "defaultTarget": "reply"
                }}},
                {"id": "reply", "type": "ai_reply"},
                {"id": "staff", "type": "staff_intervention"},
                {"id": "end", "type": "end"}
            ],
            "edges": [
                {"id": "e1", "source": "start", "target": "route"},
                {"id": "e2", "source": "route", "target": "staff"},
                {"id": "e3", "source": "route", "target": "reply"},
                {"id": "e4", "source": "reply", "target": "end"},
                {"id": "e5", "source": "staff", "target": "end"}
            ]
        })
    }

    #[tokio::test]
    async fn test_decision_branch_and_alert_forwarding() {
        let (h, registry) = harness(FakeAiService::new(), vec![]);
        let g = graph(decision_flow(), &registry);
        let sink = Arc::new(RecordingSink::default());
        let runner = h.runner.with_alert_sink(sink.clone());

        let run = runner.run(&g, event("转人工")).await.unwrap();
        assert_eq!(run.executed_nodes(), vec!["start", "route", "staff"]);
        assert_eq!(run.decision.as_deref(), Some("human"));
        assert_eq!(run.step("route").unwrap().branch.as_deref(), Some("human"));
        assert_eq!(sink.raised.lock().len(), 1);

        let run = runner.run(&g, event("你好")).await.unwrap();
        assert_eq!(run.executed_nodes(), vec!["start", "route", "reply"]);
        assert_eq!(run.decision.as_deref(), Some("default"));
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_fail_run() {
        let (h, registry) = harness(FakeAiService::new(), vec![]);
        let g = graph(decision_flow(), &registry);
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let run = h.runner.with_alert_sink(sink.clone()).run(&g, event("人工")).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(sink.raised.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_decision_takes_default() {
        let broken = Arc::new(FailingExecutor::new(NodeType::Decision, 10));
        let (h, registry) = harness(FakeAiService::new(), vec![broken]);
        let g = graph(decision_flow(), &registry);

        let run = h.runner.run(&g, event("人工")).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.executed_nodes(), vec!["start", "route", "reply"]);
        assert_eq!(run.step("route").unwrap().status, StepStatus::Failed);
        assert_eq!(run.decision.as_deref(), Some("default"));
        assert!(run.error.is_some());
    }

    #[tokio::test]
    async fn test_cycle_bounded_by_max_steps() {
        let (h, registry) = harness(FakeAiService::new(), vec![]);
        let flow = json!({
            "id": "loop",
            "name": "Loop",
            "nodes": [
                {"id": "start", "type": "start"},
                {"id": "work", "type": "ai_reply"},
                {"id": "again", "type": "decision", "data": {"config": {
                    "conditions": [{"condition": "true", "targetNodeId": "work"}],
                    "defaultTarget": "end"
                }}},
                {"id": "end", "type": "end"}
            ],
            "edges": [
                {"id": "e1", "source": "start", "target": "work"},
                {"id": "e2", "source": "work", "target": "again"},
                {"id": "e3", "source": "again", "target": "work"},
                {"id": "e4", "source": "again", "target": "end"}
            ]
        });
        let g = graph(flow, &registry);
        let run = h.runner.with_max_steps(9).run(&g, event("hi")).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.steps.len(), 9);
        assert!(run.error.as_deref().unwrap().contains("Max steps"));
    }

    #[tokio::test]
    async fn test_inactive_flow_rejected_and_resume() {
        let (h, registry) = harness(FakeAiService::new(), vec![]);
        let mut flow = linear_flow();
        flow["isActive"] = json!(false);
        let inactive = graph(flow, &registry);
        assert!(matches!(
            h.runner.run(&inactive, event("你好")).await,
            Err(WorkflowError::FlowInactive(_))
        ));

        // A run checkpointed before `send` picks up there.
        let g = graph(linear_flow(), &registry);
        let mut run = h.runner.prepare(&g, event("你好"));
        run.status = RunStatus::Running;
        run.context.set("reply", json!("稍等"));
        run.current_node = Some("send".into());
        let resumed = h.runner.resume(&g, run).await.unwrap();
        assert_eq!(resumed.status, RunStatus::Completed);
        assert_eq!(resumed.executed_nodes(), vec!["send"]);
        assert_eq!(h.gateway.sent()[0].message_body, "稍等");
    }
}
