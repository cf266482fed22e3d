use std::collections::HashMap;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::dsl::schema::RetryConfig;
use crate::evaluator::CompiledDecision;
use crate::nodes::NodeType;

/// 图节点
#[derive(Debug, Clone)]
pub struct FlowNode {
    /// 节点 ID
    pub id: String,

    pub node_type: NodeType,

    /// 显示名称，缺省为节点 ID
    pub label: String,

    /// 节点配置（对应定义中的 data.config）
    pub config: Value,

    /// 节点级超时（毫秒）
    pub timeout_ms: Option<u64>,

    pub retry: Option<RetryConfig>,

    pub fallback_target: Option<String>,
}

/// 流程图 - 校验通过后的不可变结构
#[derive(Debug)]
pub struct FlowGraph {
    pub flow_id: String,
    pub version: String,
    pub name: String,
    pub is_active: bool,

    pub nodes: HashMap<String, FlowNode>,

    /// 节点在定义中的顺序
    pub order: Vec<String>,

    pub start_id: String,

    /// 非 decision 节点的唯一后继
    pub successors: HashMap<String, String>,

    /// decision 节点的预编译条件
    pub decisions: HashMap<String, CompiledDecision>,

    pub variables: Map<String, Value>,

    /// 流程级超时（毫秒）
    pub timeout_ms: u64,

    pub retry: RetryConfig,
}

impl FlowGraph {
    pub fn node(&self, id: &str) -> Option<&FlowNode> {
        self.nodes.get(id)
    }

    pub fn decision(&self, id: &str) -> Option<&CompiledDecision> {
        self.decisions.get(id)
    }

    /// Single outgoing edge target of an ordinary node.
    pub fn next_after(&self, id: &str) -> Option<&str> {
        self.successors.get(id).map(String::as_str)
    }

    /// Node override, else the flow default.
    pub fn effective_timeout(&self, node: &FlowNode) -> Duration {
        Duration::from_millis(node.timeout_ms.unwrap_or(self.timeout_ms))
    }

    pub fn effective_retry<'a>(&'a self, node: &'a FlowNode) -> &'a RetryConfig {
        node.retry.as_ref().unwrap_or(&self.retry)
    }

    pub fn flow_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}
