use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};

use super::utils::{parse_config, patch};
use crate::core::context::ExecutionContext;
use crate::error::NodeError;
use crate::nodes::{NodeContext, NodeExecutor, NodeOutcome, NodeType};
use crate::services::{MessageGateway, OutboundMessage};

const GROUP_ROOM_TYPES: &[i64] = &[1, 3];

fn mention_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@[^\s\u{2005}@]+[\s\u{2005}]*").expect("mention pattern is valid"))
}

fn is_group(context: &ExecutionContext) -> bool {
    context.get_bool("isGroup").unwrap_or_else(|| {
        context
            .get("roomType")
            .and_then(Value::as_i64)
            .is_some_and(|t| GROUP_ROOM_TYPES.contains(&t))
    })
}

/// Group name for group chats, else the sender.
fn conversation_name(context: &ExecutionContext) -> String {
    let group = context.get_text("groupName");
    let sender = context.get_text("receivedName");
    match (is_group(context), group) {
        (true, Some(g)) => g.to_string(),
        _ => sender.unwrap_or_default().to_string(),
    }
}

// ================================
// message_receive
// ================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct MessageReceiveConfig {
    /// In groups, only answer when the bot is mentioned.
    require_at_in_group: bool,
}

impl Default for MessageReceiveConfig {
    fn default() -> Self {
        Self {
            require_at_in_group: true,
        }
    }
}

/// 消息接收节点 - normalises the inbound text and decides whether to answer
pub struct MessageReceiveExecutor;

#[async_trait]
impl NodeExecutor for MessageReceiveExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::MessageReceive
    }

    fn validate(&self, config: &Value) -> Result<(), NodeError> {
        parse_config::<MessageReceiveConfig>(config).map(|_| ())
    }

    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let config: MessageReceiveConfig = parse_config(ctx.config)?;
        let spoken = ctx
            .context
            .get_str("spoken")
            .ok_or_else(|| NodeError::VariableNotFound("spoken".to_string()))?;

        let group = is_group(ctx.context);
        let content = if group {
            mention_re().replace_all(spoken, "").trim().to_string()
        } else {
            spoken.trim().to_string()
        };
        let at_me = ctx.context.get_bool("atMe").unwrap_or(false);
        let should_reply =
            !content.is_empty() && (!group || at_me || !config.require_at_in_group);

        Ok(NodeOutcome::patch(patch([
            ("content", json!(content)),
            ("isGroup", json!(group)),
            ("shouldReply", json!(should_reply)),
            ("conversationName", json!(conversation_name(ctx.context))),
        ])))
    }
}

// ================================
// session_create
// ================================

/// 会话节点 - keeps an existing session id or derives one from the event
pub struct SessionCreateExecutor;

#[async_trait]
impl NodeExecutor for SessionCreateExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::SessionCreate
    }

    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        if let Some(existing) = ctx.context.get_text("sessionId") {
            return Ok(NodeOutcome::patch(patch([
                ("sessionId", json!(existing)),
                ("sessionCreated", json!(false)),
            ])));
        }
        let robot = ctx.context.get_str("robotId").unwrap_or_default();
        let session_id = format!("{}:{}", robot, conversation_name(ctx.context));
        Ok(NodeOutcome::patch(patch([
            ("sessionId", json!(session_id)),
            ("sessionCreated", json!(true)),
        ])))
    }
}

// ================================
// send_command
// ================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SendCommandConfig {
    /// Template for the recipient; the conversation partner when unset.
    target: Option<String>,
    message: String,
    /// Mention the sender when answering in a group.
    at_sender: bool,
    /// Skip delivery when message_receive decided not to answer.
    respect_should_reply: bool,
}

impl Default for SendCommandConfig {
    fn default() -> Self {
        Self {
            target: None,
            message: "{{reply}}".to_string(),
            at_sender: true,
            respect_should_reply: true,
        }
    }
}

/// 发送节点 - delivers the reply through the messaging gateway
pub struct SendCommandExecutor {
    gateway: Arc<dyn MessageGateway>,
}

impl SendCommandExecutor {
    pub fn new(gateway: Arc<dyn MessageGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl NodeExecutor for SendCommandExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::SendCommand
    }

    fn validate(&self, config: &Value) -> Result<(), NodeError> {
        let config: SendCommandConfig = parse_config(config)?;
        if config.message.trim().is_empty() {
            return Err(NodeError::ConfigError("message template is empty".to_string()));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let config: SendCommandConfig = parse_config(ctx.config)?;

        if config.respect_should_reply && ctx.context.get_bool("shouldReply") == Some(false) {
            return Ok(NodeOutcome::patch(patch([("sent", json!(false))])));
        }

        let body = ctx.context.render(&config.message);
        if body.trim().is_empty() {
            return Err(NodeError::ExecutionError(format!(
                "message body rendered empty from '{}'",
                config.message
            )));
        }
        let target = match &config.target {
            Some(t) => ctx.context.render(t),
            None => conversation_name(ctx.context),
        };
        if target.is_empty() {
            return Err(NodeError::VariableNotFound("send target".to_string()));
        }
        let at_list = match ctx.context.get_text("receivedName") {
            Some(sender) if config.at_sender && is_group(ctx.context) => vec![sender.to_string()],
            _ => Vec::new(),
        };

        let receipt = self
            .gateway
            .send(OutboundMessage {
                target,
                message_body: body.clone(),
                at_list,
                robot_id: ctx.context.get_text("robotId").map(str::to_string),
            })
            .await
            .map_err(|e| e.into_node_error("gateway"))?;

        Ok(NodeOutcome::patch(patch([
            ("sent", json!(receipt.accepted)),
            ("sentMessage", json!(body)),
            ("deliveryId", json!(receipt.delivery_id)),
        ])))
    }
}
