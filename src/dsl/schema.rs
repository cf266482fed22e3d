use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ================================
// Flow Definition
// ================================

/// Default flow-level timeout when a definition does not set one.
pub const DEFAULT_FLOW_TIMEOUT_MS: u64 = 30_000;

/// A stored flow: typed nodes joined by edges.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FlowDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub nodes: Vec<NodeSchema>,
    #[serde(default)]
    pub edges: Vec<EdgeSchema>,
    /// Seeded into every run's context before the event fields.
    #[serde(default)]
    pub variables: Map<String, Value>,
    /// Flow-level timeout in milliseconds. Also the default per-node timeout.
    #[serde(default = "default_flow_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub retry_config: RetryConfig,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_flow_timeout() -> u64 {
    DEFAULT_FLOW_TIMEOUT_MS
}
fn default_version() -> String {
    "1".to_string()
}
fn default_true() -> bool {
    true
}

impl FlowDefinition {
    pub fn node(&self, id: &str) -> Option<&NodeSchema> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a EdgeSchema> + 'a {
        self.edges.iter().filter(move |e| e.source == id)
    }

    pub fn incoming<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a EdgeSchema> + 'a {
        self.edges.iter().filter(move |e| e.target == id)
    }
}

/// Node definition. `data.config` holds the handler-specific settings.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct NodeSchema {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub data: NodeData,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeData {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub config: Value,
    /// Node-level timeout override in milliseconds.
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub retry_config: Option<RetryConfig>,
    /// Node to continue with when this node fails for good.
    #[serde(default)]
    pub fallback_target: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EdgeSchema {
    #[serde(default)]
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub label: Option<String>,
    /// Only meaningful on edges leaving a decision node.
    #[serde(default)]
    pub condition: Option<String>,
}

// ================================
// Retry
// ================================

/// Retry policy. `max_retries` counts attempts after the first one.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    #[serde(default)]
    pub max_retries: u32,
    /// Base wait between attempts, milliseconds.
    #[serde(default)]
    pub retry_interval: u64,
    #[serde(default = "default_backoff_strategy")]
    pub backoff_strategy: BackoffStrategy,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_max_retry_interval")]
    pub max_retry_interval: u64,
    #[serde(default = "default_retry_on_retryable_only")]
    pub retry_on_retryable_only: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Fixed,
    Exponential,
    ExponentialWithJitter,
}

fn default_backoff_strategy() -> BackoffStrategy {
    BackoffStrategy::Fixed
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_max_retry_interval() -> u64 {
    60_000
}
fn default_retry_on_retryable_only() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_interval: 0,
            backoff_strategy: default_backoff_strategy(),
            backoff_multiplier: default_backoff_multiplier(),
            max_retry_interval: default_max_retry_interval(),
            retry_on_retryable_only: default_retry_on_retryable_only(),
        }
    }
}

impl RetryConfig {
    pub fn fixed(max_retries: u32, retry_interval_ms: u64) -> Self {
        Self {
            max_retries,
            retry_interval: retry_interval_ms,
            ..Self::default()
        }
    }

    /// Wait before the retry following the zero-based `attempt`.
    pub fn interval_for(&self, attempt: u32) -> Duration {
        let base = self.retry_interval;
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let interval = match self.backoff_strategy {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Exponential => {
                (base as f64 * self.backoff_multiplier.powi(exponent)) as u64
            }
            BackoffStrategy::ExponentialWithJitter => {
                let multiplied = base as f64 * self.backoff_multiplier.powi(exponent);
                let jitter = rand::random::<f64>() * multiplied * 0.1;
                (multiplied + jitter) as u64
            }
        };
        Duration::from_millis(interval.min(self.max_retry_interval))
    }
}

// ================================
// Decision
// ================================

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DecisionCondition {
    pub condition: String,
    pub target_node_id: String,
    #[serde(default)]
    pub label: Option<String>,
}

/// `config` of a decision node.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct DecisionConfig {
    #[serde(default)]
    pub conditions: Vec<DecisionCondition>,
    #[serde(default)]
    pub default_target: Option<String>,
}

impl DecisionConfig {
    /// Read the decision config of `node`. Conditions missing from the
    /// config are taken from conditional outgoing edges in edge order, and
    /// an unconditioned outgoing edge stands in for a missing default.
    pub fn resolve(node: &NodeSchema, flow: &FlowDefinition) -> Result<Self, serde_json::Error> {
        let mut config: DecisionConfig = if node.data.config.is_null() {
            DecisionConfig::default()
        } else {
            serde_json::from_value(node.data.config.clone())?
        };

        if config.conditions.is_empty() {
            config.conditions = flow
                .outgoing(&node.id)
                .filter_map(|edge| {
                    edge.condition.as_ref().map(|cond| DecisionCondition {
                        condition: cond.clone(),
                        target_node_id: edge.target.clone(),
                        label: edge.label.clone(),
                    })
                })
                .collect();
        }

        if config.default_target.as_deref().map_or(true, str::is_empty) {
            config.default_target = flow
                .outgoing(&node.id)
                .find(|e| e.condition.is_none())
                .map(|e| e.target.clone());
        }

        Ok(config)
    }
}
