use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::utils::{message_text, parse_config, patch};
use crate::alert::types::RaisedAlert;
use crate::error::NodeError;
use crate::nodes::{NodeContext, NodeExecutor, NodeOutcome, NodeType};
use crate::services::{AiService, GenerateRequest};

const DEFAULT_HANDOFF_NOTICE: &str = "已为您转接人工客服，请稍候。";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AiReplyConfig {
    prompt: String,
    /// Used instead of failing when the service returns an empty reply.
    fallback_reply: Option<String>,
}

impl Default for AiReplyConfig {
    fn default() -> Self {
        Self {
            prompt: "{{content}}".to_string(),
            fallback_reply: None,
        }
    }
}

/// AI 回复节点
pub struct AiReplyExecutor {
    ai: Arc<dyn AiService>,
}

impl AiReplyExecutor {
    pub fn new(ai: Arc<dyn AiService>) -> Self {
        Self { ai }
    }
}

#[async_trait]
impl NodeExecutor for AiReplyExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::AiReply
    }

    fn validate(&self, config: &Value) -> Result<(), NodeError> {
        let config: AiReplyConfig = parse_config(config)?;
        if config.prompt.trim().is_empty() {
            return Err(NodeError::ConfigError("prompt is empty".to_string()));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let config: AiReplyConfig = parse_config(ctx.config)?;
        // Fail early on a missing message rather than sending an empty prompt.
        message_text(ctx.context)?;

        let request = GenerateRequest {
            prompt: ctx.context.render(&config.prompt),
            session_id: ctx.context.get_text("sessionId").map(str::to_string),
            context: ctx.context.values().clone(),
        };
        let generated = self
            .ai
            .generate(request)
            .await
            .map_err(|e| e.into_node_error("ai"))?;

        let reply = match generated.trim() {
            "" => config
                .fallback_reply
                .filter(|r| !r.trim().is_empty())
                .ok_or_else(|| NodeError::ExecutionError("AI service returned an empty reply".to_string()))?,
            text => text.to_string(),
        };
        Ok(NodeOutcome::patch(patch([
            ("reply", json!(reply)),
            ("replySource", json!("ai")),
        ])))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StaffInterventionConfig {
    notice: String,
    reason: Option<String>,
    raise_alert: bool,
    /// Intent type of the raised alert; templated, defaults to the intent.
    intent_type: String,
}

impl Default for StaffInterventionConfig {
    fn default() -> Self {
        Self {
            notice: DEFAULT_HANDOFF_NOTICE.to_string(),
            reason: None,
            raise_alert: true,
            intent_type: "{{intent}}".to_string(),
        }
    }
}

/// 人工介入节点 - marks the session for handoff and tells the user
pub struct StaffInterventionExecutor;

#[async_trait]
impl NodeExecutor for StaffInterventionExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::StaffIntervention
    }

    fn validate(&self, config: &Value) -> Result<(), NodeError> {
        parse_config::<StaffInterventionConfig>(config).map(|_| ())
    }

    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let config: StaffInterventionConfig = parse_config(ctx.config)?;
        let reason = match &config.reason {
            Some(r) => ctx.context.render(r),
            None => ctx
                .context
                .get_text("intent")
                .unwrap_or("manual")
                .to_string(),
        };

        let mut outcome = NodeOutcome::patch(patch([
            ("handoff", json!(true)),
            ("needHuman", json!(true)),
            ("handoffReason", json!(reason)),
            ("reply", json!(ctx.context.render(&config.notice))),
            ("replySource", json!("staff")),
        ]));

        if config.raise_alert {
            let mut intent_type = ctx.context.render(&config.intent_type);
            if intent_type.trim().is_empty() {
                intent_type = "staff_intervention".to_string();
            }
            let content = message_text(ctx.context).unwrap_or_default();
            outcome = outcome.with_alert(RaisedAlert::from_context(
                &intent_type,
                content,
                ctx.context,
                ctx.runtime.time_provider.now_timestamp(),
                Some(ctx.node_id),
            ));
        }
        Ok(outcome)
    }
}
