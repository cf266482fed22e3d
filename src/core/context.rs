use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::template::{self, lookup_path};

/// 运行上下文 - 每次执行独享的键值存储
///
/// Handlers read from it and return patches; only the runner applies them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionContext {
    values: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// Dotted-path read, e.g. `event.spoken`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.values, path)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    /// Non-empty string at `path`.
    pub fn get_text(&self, path: &str) -> Option<&str> {
        self.get_str(path).filter(|s| !s.trim().is_empty())
    }

    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.get(path).and_then(Value::as_bool)
    }

    pub fn get_f64(&self, path: &str) -> Option<f64> {
        self.get(path).and_then(Value::as_f64)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Merge a patch at the top level; returns the keys written, in patch order.
    pub fn apply_patch(&mut self, patch: Map<String, Value>) -> Vec<String> {
        let mut keys = Vec::with_capacity(patch.len());
        for (k, v) in patch {
            keys.push(k.clone());
            self.values.insert(k, v);
        }
        keys
    }

    /// Substitute `{{field}}` placeholders from this context.
    pub fn render(&self, text: &str) -> String {
        template::render(text, &self.values)
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn snapshot(&self) -> Value {
        Value::Object(self.values.clone())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
