use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::utils::{parse_config, patch};
use crate::alert::types::RaisedAlert;
use crate::error::NodeError;
use crate::nodes::{NodeContext, NodeExecutor, NodeOutcome, NodeType};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AlertSaveConfig {
    intent_type: String,
    message: String,
    /// Context key holding the id of the alert this one re-raises.
    parent_alert_key: Option<String>,
}

impl Default for AlertSaveConfig {
    fn default() -> Self {
        Self {
            intent_type: "{{intent}}".to_string(),
            message: "{{content}}".to_string(),
            parent_alert_key: None,
        }
    }
}

/// 告警保存节点 - hands a raised alert to the rule engine
pub struct AlertSaveExecutor;

#[async_trait]
impl NodeExecutor for AlertSaveExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::AlertSave
    }

    fn validate(&self, config: &Value) -> Result<(), NodeError> {
        let config: AlertSaveConfig = parse_config(config)?;
        if config.intent_type.trim().is_empty() {
            return Err(NodeError::ConfigError("intentType is empty".to_string()));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let config: AlertSaveConfig = parse_config(ctx.config)?;
        let intent_type = ctx.context.render(&config.intent_type);
        if intent_type.trim().is_empty() {
            return Err(NodeError::TemplateError(format!(
                "intentType '{}' rendered empty",
                config.intent_type
            )));
        }
        let message = ctx.context.render(&config.message);

        let mut alert = RaisedAlert::from_context(
            &intent_type,
            &message,
            ctx.context,
            ctx.runtime.time_provider.now_timestamp(),
            Some(ctx.node_id),
        );
        if let Some(key) = &config.parent_alert_key {
            alert.parent_alert_id = ctx.context.get_text(key).map(str::to_string);
        }

        Ok(NodeOutcome::patch(patch([
            ("alertRaised", json!(true)),
            ("alertIntent", json!(intent_type)),
        ]))
        .with_alert(alert))
    }
}
