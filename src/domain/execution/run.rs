use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::status::{RunStatus, StepStatus};
use crate::core::context::ExecutionContext;
use crate::core::event::InboundEvent;
use crate::error::ErrorCode;

/// One entry of the step log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub node_id: String,
    pub node_type: String,
    pub status: StepStatus,
    pub duration_ms: u64,
    pub attempts: u32,
    #[serde(default)]
    pub patch_keys: Vec<String>,
    /// Branch label chosen by a decision node.
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_code: Option<ErrorCode>,
    pub started_at: DateTime<Utc>,
}

/// 执行记录 - one inbound event walking one flow
///
/// Serialized form is the persisted tracker record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRun {
    #[serde(rename = "processingId")]
    pub id: String,
    pub flow_id: String,
    #[serde(default)]
    pub flow_version: String,
    pub session_id: String,
    #[serde(default)]
    pub msg_id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub steps: Vec<StepRecord>,
    /// Last branch label taken by a decision node.
    #[serde(default)]
    pub decision: Option<String>,
    /// Wall time of the run in milliseconds, set when it finishes.
    #[serde(default)]
    pub processing_time: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Next node to execute; `None` once finished.
    #[serde(default)]
    pub current_node: Option<String>,
    /// Set while `current_node` is executing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_node: Option<String>,
    #[serde(default)]
    pub context: ExecutionContext,
    #[serde(default)]
    pub event: InboundEvent,
}

impl ExecutionRun {
    pub fn new(
        id: String,
        flow_id: &str,
        flow_version: &str,
        event: InboundEvent,
        context: ExecutionContext,
        start_node: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            flow_id: flow_id.to_string(),
            flow_version: flow_version.to_string(),
            session_id: event.session_key(),
            msg_id: event.msg_id.clone(),
            status: RunStatus::Pending,
            steps: Vec::new(),
            decision: None,
            processing_time: None,
            error: None,
            start_time: now,
            completed_at: None,
            current_node: Some(start_node.to_string()),
            node_started_at: None,
            end_node: None,
            context,
            event,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Node ids in execution order.
    pub fn executed_nodes(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.node_id.as_str()).collect()
    }

    pub fn last_step(&self) -> Option<&StepRecord> {
        self.steps.last()
    }

    pub fn step(&self, node_id: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.node_id == node_id)
    }

    /// Append a step; the in-flight node, if any, is done.
    pub fn push_step(&mut self, step: StepRecord) {
        self.node_started_at = None;
        self.steps.push(step);
    }

    pub fn finish(&mut self, status: RunStatus, now: DateTime<Utc>) {
        self.status = status;
        self.current_node = None;
        self.node_started_at = None;
        self.completed_at = Some(now);
        let elapsed = (now - self.start_time).num_milliseconds().max(0);
        self.processing_time = Some(elapsed as u64);
    }
}
