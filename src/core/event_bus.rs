use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

/// 引擎事件 - 通过事件通道推送给观察者
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowEvent {
    /// 流程开始执行
    RunStarted {
        run_id: String,
        flow_id: String,
        session_id: String,
        timestamp: DateTime<Utc>,
    },

    /// 节点执行完成
    NodeFinished {
        run_id: String,
        node_id: String,
        duration_ms: u64,
        patch_keys: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// 节点重试
    NodeRetry {
        run_id: String,
        node_id: String,
        attempt: u32,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// 节点执行失败
    NodeFailed {
        run_id: String,
        node_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// 分支选中
    BranchSelected {
        run_id: String,
        node_id: String,
        label: String,
        target: String,
        timestamp: DateTime<Utc>,
    },

    /// 流程结束（任意终态）
    RunFinished {
        run_id: String,
        status: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    AlertFired {
        alert_id: String,
        rule_id: String,
        level: String,
        timestamp: DateTime<Utc>,
    },

    AlertEscalated {
        alert_id: String,
        escalation_level: u32,
        timestamp: DateTime<Utc>,
    },

    AlertResolved {
        alert_id: String,
        status: String,
        timestamp: DateTime<Utc>,
    },
}

/// 事件发送器
pub type EventSender = mpsc::UnboundedSender<FlowEvent>;

/// 事件接收器
pub type EventReceiver = mpsc::UnboundedReceiver<FlowEvent>;

/// 创建事件通道
pub fn create_event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Optional event sink. Emitting never fails; a dropped receiver just
/// disables delivery.
#[derive(Clone, Default)]
pub struct EventEmitter {
    tx: Option<EventSender>,
}

impl EventEmitter {
    pub fn new(tx: EventSender) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn is_active(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    pub fn emit(&self, event: FlowEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
