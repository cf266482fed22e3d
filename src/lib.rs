//! # xchatflow: chat-support flow and alert escalation engines
//!
//! `xchatflow` runs inbound chat messages through configurable flows of
//! typed nodes (receive, Q&A match, intent, emotion, risk, decision, AI
//! reply, human hand-off, send) and turns risky conversations into alerts
//! that are counted and escalated on a timer until someone resolves them.
//!
//! - **Flows**: JSON/YAML definitions, validated once into an immutable
//!   [`FlowGraph`] with precompiled decision predicates.
//! - **Runs**: per-node timeout and retry, fallback targets, a persisted
//!   step log, and resume after restart.
//! - **Sessions**: events of one conversation never interleave; duplicate
//!   `msgId`s inside the dedup window are dropped.
//! - **Alerts**: threshold/cooldown rules, prioritised notification
//!   fan-out, cancellable escalation timers.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use xchatflow::{load_flow, ChatFlowEngine, InboundEvent};
//! use xchatflow::services::fake;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = ChatFlowEngine::builder()
//!         .services(fake::services())
//!         .flow(load_flow("flows/customer_support.json")?)
//!         .build()?;
//!     let event: InboundEvent = serde_json::from_value(serde_json::json!({
//!         "spoken": "你好", "roomType": 1, "atMe": true, "msgId": "m-1"
//!     }))?;
//!     let outcome = engine.handle_event(event).await?;
//!     println!("{:?}", outcome.run().map(|r| r.status));
//!     Ok(())
//! }
//! ```

pub mod alert;
pub mod api;
pub mod config;
pub mod core;
pub mod domain;
pub mod dsl;
pub mod error;
pub mod evaluator;
pub mod graph;
pub mod nodes;
pub mod services;
pub mod template;

pub use crate::alert::{
    Alert, AlertLevel, AlertQuery, AlertRule, AlertRuleEngine, AlertRuleSet, AlertStatus,
    AlertStore, MemoryAlertStore, NotificationMethod, Notifier, RaisedAlert, Resolution,
};
pub use crate::api::{ChatFlowEngine, ChatFlowEngineBuilder, EventOutcome, PurgeReport};
pub use crate::config::EngineConfig;
pub use crate::core::{
    FakeIdGenerator, FakeTimeProvider, FlowEvent, FlowRunner, IdGenerator, InboundEvent,
    RealIdGenerator, RealTimeProvider, RuntimeContext, TimeProvider, TrackerStore,
};
pub use crate::domain::execution::{ExecutionRun, RunStatus, StepRecord, StepStatus};
pub use crate::dsl::{
    load_flow, parse_flow, validate_flow, Diagnostic, DiagnosticLevel, FlowDefinition, FlowFormat,
    ValidationReport,
};
pub use crate::error::{AlertError, NodeError, WorkflowError};
pub use crate::graph::{build_flow_graph, FlowGraph};
pub use crate::nodes::{NodeExecutor, NodeExecutorRegistry, NodeType};
pub use crate::services::Services;
