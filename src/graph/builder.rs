use std::collections::HashMap;

use tracing::warn;

use crate::dsl::schema::{DecisionConfig, FlowDefinition};
use crate::dsl::validation::{validate_flow, ValidationReport};
use crate::error::WorkflowError;
use crate::evaluator::CompiledDecision;
use crate::nodes::{NodeExecutorRegistry, NodeType};

use super::types::{FlowGraph, FlowNode};

/// 从流程定义构建流程图
///
/// Validates first; any error-level diagnostic aborts with
/// [`WorkflowError::InvalidFlowDefinition`]. Warnings are logged.
pub fn build_flow_graph(
    flow: &FlowDefinition,
    registry: &NodeExecutorRegistry,
) -> Result<FlowGraph, WorkflowError> {
    let report = validate_flow(flow, registry);
    if !report.is_valid {
        return Err(invalid(flow, report));
    }
    for diag in report.warnings() {
        warn!(flow_id = %flow.id, code = %diag.code, node_id = ?diag.node_id, "{}", diag.message);
    }

    let mut nodes = HashMap::new();
    let mut order = Vec::with_capacity(flow.nodes.len());
    let mut successors = HashMap::new();
    let mut decisions = HashMap::new();
    let mut start_id = String::new();

    // 1. 添加所有节点
    for schema in &flow.nodes {
        let node_type = NodeType::from_tag(&schema.node_type)
            .ok_or_else(|| WorkflowError::ExecutorNotFound(schema.node_type.clone()))?;
        if node_type == NodeType::Start {
            start_id = schema.id.clone();
        }
        let node = FlowNode {
            id: schema.id.clone(),
            node_type,
            label: if schema.data.label.is_empty() {
                schema.id.clone()
            } else {
                schema.data.label.clone()
            },
            config: schema.data.config.clone(),
            timeout_ms: schema.data.timeout,
            retry: schema.data.retry_config.clone(),
            fallback_target: schema.data.fallback_target.clone(),
        };
        order.push(node.id.clone());
        nodes.insert(node.id.clone(), node);
    }

    // 2. 后继与分支
    for schema in &flow.nodes {
        match nodes.get(&schema.id).map(|n| n.node_type) {
            Some(NodeType::Decision) => {
                let config = DecisionConfig::resolve(schema, flow)
                    .map_err(|e| WorkflowError::InternalError(e.to_string()))?;
                let default_target = config.default_target.clone().unwrap_or_default();
                let compiled = CompiledDecision::compile(&config.conditions, default_target)
                    .map_err(|(i, e)| {
                        WorkflowError::InternalError(format!(
                            "decision {} condition {}: {}",
                            schema.id, i, e
                        ))
                    })?;
                decisions.insert(schema.id.clone(), compiled);
            }
            Some(NodeType::End) | None => {}
            Some(_) => {
                if let Some(edge) = flow.outgoing(&schema.id).next() {
                    successors.insert(schema.id.clone(), edge.target.clone());
                }
            }
        }
    }

    Ok(FlowGraph {
        flow_id: flow.id.clone(),
        version: flow.version.clone(),
        name: flow.name.clone(),
        is_active: flow.is_active,
        nodes,
        order,
        start_id,
        successors,
        decisions,
        variables: flow.variables.clone(),
        timeout_ms: flow.timeout,
        retry: flow.retry_config.clone(),
    })
}

fn invalid(flow: &FlowDefinition, report: ValidationReport) -> WorkflowError {
    WorkflowError::InvalidFlowDefinition {
        flow_id: flow.id.clone(),
        summary: report.summary(),
        report: Box::new(report),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::fake;
    use serde_json::json;
    use std::time::Duration;

    fn registry() -> NodeExecutorRegistry {
        NodeExecutorRegistry::with_builtins(&fake::services())
    }

    fn flow() -> FlowDefinition {
        serde_json::from_value(json!({
            "id": "f1",
            "version": "7",
            "timeout": 2000,
            "retryConfig": {"maxRetries": 1, "retryInterval": 10},
            "nodes": [
                {"id": "start", "type": "start"},
                {"id": "route", "type": "decision", "data": {"config": {
                    "conditions": [{"condition": "vip == true", "targetNodeId": "ai", "label": "vip"}],
                    "defaultTarget": "end"
                }}},
                {"id": "ai", "type": "ai_reply", "data": {"label": "AI", "timeout": 300, "fallbackTarget": "end"}},
                {"id": "end", "type": "end"}
            ],
            "edges": [
                {"id": "e1", "source": "start", "target": "route"},
                {"id": "e2", "source": "route", "target": "ai"},
                {"id": "e3", "source": "route", "target": "end"},
                {"id": "e4", "source": "ai", "target": "end"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_build_graph() {
        let graph = build_flow_graph(&flow(), &registry()).unwrap();
        assert_eq!(graph.start_id, "start");
        assert_eq!(graph.version, "7");
        assert_eq!(graph.next_after("start"), Some("route"));
        assert_eq!(graph.next_after("ai"), Some("end"));
        assert_eq!(graph.next_after("end"), None);
        assert_eq!(graph.decision("route").unwrap().branches[0].label, "vip");
        assert_eq!(graph.node("start").unwrap().label, "start");
        assert_eq!(graph.order, vec!["start", "route", "ai", "end"]);
    }

    #[test]
    fn test_effective_policies() {
        let graph = build_flow_graph(&flow(), &registry()).unwrap();
        let ai = graph.node("ai").unwrap();
        let route = graph.node("route").unwrap();
        assert_eq!(graph.effective_timeout(ai), Duration::from_millis(300));
        assert_eq!(graph.effective_timeout(route), Duration::from_millis(2000));
        assert_eq!(graph.effective_retry(route).max_retries, 1);
    }

    #[test]
    fn test_invalid_definition_carries_report() {
        let mut flow = flow();
        flow.edges[3].target = "ghost".into();
        let err = build_flow_graph(&flow, &registry()).unwrap_err();
        let report = err.validation_report().unwrap();
        assert!(report.has_code("E007"));
        assert!(err.to_string().contains("f1"));
    }
}
