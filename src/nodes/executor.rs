use async_trait::async_trait;
use serde_json::{Map, Value};

use super::NodeType;
use crate::alert::types::RaisedAlert;
use crate::core::context::ExecutionContext;
use crate::core::runtime_context::RuntimeContext;
use crate::error::NodeError;
use crate::evaluator::CompiledDecision;

/// 节点执行上下文 - 传递给 NodeExecutor 的参数
pub struct NodeContext<'a> {
    pub run_id: &'a str,
    pub node_id: &'a str,
    pub node_type: NodeType,

    /// 节点配置（对应定义中的 data.config）
    pub config: &'a Value,

    /// Precompiled branches; only set for decision nodes.
    pub decision: Option<&'a CompiledDecision>,

    pub context: &'a ExecutionContext,
    pub runtime: &'a RuntimeContext,

    /// Zero-based attempt number.
    pub attempt: u32,
}

/// What a handler hands back to the runner.
#[derive(Debug, Clone, Default)]
pub struct NodeOutcome {
    pub context_patch: Map<String, Value>,
    /// Branch label, for tracing.
    pub next_hint: Option<String>,
    /// Chosen successor; only decision nodes set it.
    pub next_target: Option<String>,
    pub raised_alert: Option<RaisedAlert>,
}

impl NodeOutcome {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn patch(context_patch: Map<String, Value>) -> Self {
        Self {
            context_patch,
            ..Self::default()
        }
    }

    pub fn with_alert(mut self, alert: RaisedAlert) -> Self {
        self.raised_alert = Some(alert);
        self
    }
}

/// 节点执行器 trait
///
/// Handlers never write the context directly: they return a patch that the
/// runner applies. Equal config and context give an equal patch, except for
/// whatever the injected collaborators return.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    fn node_type(&self) -> NodeType;

    /// Check the node config at flow load time.
    fn validate(&self, _config: &Value) -> Result<(), NodeError> {
        Ok(())
    }

    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError>;
}
