use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::core::context::ExecutionContext;
use crate::error::NodeError;

/// Deserialize a node config; a missing config means all defaults.
pub fn parse_config<T: DeserializeOwned + Default>(config: &Value) -> Result<T, NodeError> {
    if config.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(config.clone()).map_err(|e| NodeError::ConfigError(e.to_string()))
}

/// Build a context patch from key/value pairs.
pub fn patch<I, K>(pairs: I) -> Map<String, Value>
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// The user's text: `content` once message_receive ran, else the raw event.
pub fn message_text(context: &ExecutionContext) -> Result<&str, NodeError> {
    context
        .get_text("content")
        .or_else(|| context.get_text("spoken"))
        .ok_or_else(|| NodeError::VariableNotFound("content".to_string()))
}
