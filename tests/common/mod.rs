#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};
use xchatflow::dsl::RetryConfig;
use xchatflow::services::fake::{FakeAiService, FakeKnowledgeBase, RecordingGateway, RecordingNotifier};
use xchatflow::services::{Classification, ClassifyTask, Services};
use xchatflow::{
    AlertRuleSet, ChatFlowEngine, ChatFlowEngineBuilder, EngineConfig, FakeTimeProvider,
    FlowDefinition, InboundEvent, RuntimeContext,
};

pub const NOW: i64 = 1_700_000_000;

pub fn repo_path(rel: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(rel)
}

pub fn support_flow() -> FlowDefinition {
    xchatflow::load_flow(repo_path("flows/customer_support.json")).unwrap()
}

pub fn support_rules() -> AlertRuleSet {
    AlertRuleSet::from_file(repo_path("flows/alert_rules.yaml")).unwrap()
}

/// Complaints classify as `投诉` + angry; everything else is chat.
pub fn complaint_aware_ai() -> FakeAiService {
    FakeAiService::new().with_rule(
        "投诉",
        ClassifyTask::Intent,
        Classification::intent("投诉", 0.95).with_emotion("angry"),
    )
}

pub fn group_event(msg_id: &str, sender: &str, text: &str) -> InboundEvent {
    serde_json::from_value(json!({
        "spoken": text,
        "rawSpoken": text,
        "receivedName": sender,
        "groupName": "售后群",
        "roomType": 1,
        "atMe": true,
        "msgId": msg_id,
        "robotId": "bot-1",
        "timestamp": NOW * 1000,
    }))
    .unwrap()
}

pub fn private_event(msg_id: &str, sender: &str, text: &str) -> InboundEvent {
    InboundEvent {
        spoken: text.to_string(),
        received_name: sender.to_string(),
        room_type: 2,
        msg_id: msg_id.to_string(),
        robot_id: "bot-1".to_string(),
        ..Default::default()
    }
}

/// Fakes shared with the engine under test.
pub struct Fakes {
    pub gateway: Arc<RecordingGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<FakeTimeProvider>,
}

pub fn services(ai: FakeAiService, knowledge: FakeKnowledgeBase, gateway: Arc<RecordingGateway>) -> Services {
    Services::new(Arc::new(ai), Arc::new(knowledge), gateway)
}

pub fn quick_config() -> EngineConfig {
    EngineConfig {
        notify_retry: RetryConfig::fixed(0, 0),
        notify_timeout_ms: 1_000,
        ..EngineConfig::default()
    }
}

/// Builder preloaded with fakes; `fakes.notifier` handles method type `im`.
pub fn builder(ai: FakeAiService, knowledge: FakeKnowledgeBase) -> (ChatFlowEngineBuilder, Fakes) {
    let gateway = Arc::new(RecordingGateway::new());
    let notifier = Arc::new(RecordingNotifier::new("im"));
    let (runtime, clock) = RuntimeContext::fake(NOW);
    let builder = ChatFlowEngine::builder()
        .config(quick_config())
        .services(services(ai, knowledge, gateway.clone()))
        .notifier(notifier.clone())
        .runtime(runtime);
    (
        builder,
        Fakes {
            gateway,
            notifier,
            clock,
        },
    )
}

/// Support flow with complaint routing and the shipped alert rules.
pub fn support_engine() -> (ChatFlowEngine, Fakes) {
    let (builder, fakes) = builder(
        complaint_aware_ai(),
        FakeKnowledgeBase::new().with_entry("营业时间", "9:00-18:00", 0.92),
    );
    let engine = builder
        .flow(support_flow())
        .alert_rules(support_rules())
        .build()
        .unwrap();
    (engine, fakes)
}

pub fn flow_from(value: Value) -> FlowDefinition {
    serde_json::from_value(value).unwrap()
}
