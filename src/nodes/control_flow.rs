use async_trait::async_trait;

use crate::error::NodeError;
use crate::nodes::{NodeContext, NodeExecutor, NodeOutcome, NodeType};

/// 开始节点执行器
///
/// Event fields and flow variables are seeded before the run starts, so
/// there is nothing left to do here.
pub struct StartNodeExecutor;

#[async_trait]
impl NodeExecutor for StartNodeExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Start
    }

    async fn execute(&self, _ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        Ok(NodeOutcome::empty())
    }
}

/// 条件分支节点执行器
pub struct DecisionNodeExecutor;

#[async_trait]
impl NodeExecutor for DecisionNodeExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Decision
    }

    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let decision = ctx.decision.ok_or_else(|| {
            NodeError::ExecutionError(format!("decision {} has no compiled branches", ctx.node_id))
        })?;
        let selection = decision.select(ctx.context.values());
        Ok(NodeOutcome {
            next_hint: Some(selection.label),
            next_target: Some(selection.target),
            ..NodeOutcome::default()
        })
    }
}

/// 结束节点执行器
pub struct EndNodeExecutor;

#[async_trait]
impl NodeExecutor for EndNodeExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::End
    }

    async fn execute(&self, _ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        Ok(NodeOutcome::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::schema::DecisionCondition;
    use crate::evaluator::CompiledDecision;
    use crate::nodes::utils::testing::{run, run_with_decision};
    use serde_json::json;

    #[tokio::test]
    async fn test_start_node() {
        let outcome = run(&StartNodeExecutor, json!({}), json!({"spoken": "hi"})).await.unwrap();
        assert!(outcome.context_patch.is_empty());
        assert!(outcome.next_target.is_none());
    }

    #[tokio::test]
    async fn test_decision_selects_branch() {
        let decision = CompiledDecision::compile(
            &[DecisionCondition {
                condition: "intent == '投诉'".into(),
                target_node_id: "staff".into(),
                label: Some("complaint".into()),
            }],
            "ai",
        )
        .unwrap();

        let outcome = run_with_decision(
            &DecisionNodeExecutor,
            json!({}),
            json!({"intent": "投诉"}),
            Some(&decision),
        )
        .await
        .unwrap();
        assert_eq!(outcome.next_target.as_deref(), Some("staff"));
        assert_eq!(outcome.next_hint.as_deref(), Some("complaint"));
        assert!(outcome.context_patch.is_empty());

        let outcome = run_with_decision(
            &DecisionNodeExecutor,
            json!({}),
            json!({"intent": "chat"}),
            Some(&decision),
        )
        .await
        .unwrap();
        assert_eq!(outcome.next_target.as_deref(), Some("ai"));
        assert_eq!(outcome.next_hint.as_deref(), Some("default"));
    }

    #[tokio::test]
    async fn test_decision_without_branches_fails() {
        let err = run(&DecisionNodeExecutor, json!({}), json!({})).await.unwrap_err();
        assert!(matches!(err, NodeError::ExecutionError(_)));
    }
}
