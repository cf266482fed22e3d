mod common;

use serde_json::{json, Map, Value};
use xchatflow::services::fake::{self, FakeAiService, FakeKnowledgeBase, DEFAULT_FAKE_REPLY};
use xchatflow::{
    validate_flow, AlertQuery, NodeExecutorRegistry, RunStatus, StepStatus, WorkflowError,
};

use common::*;

#[tokio::test]
async fn test_greeting_is_answered_by_ai_reply() {
    let (engine, fakes) = support_engine();
    let run = engine
        .handle_event(group_event("m-1", "alice", "你好"))
        .await
        .unwrap()
        .into_run()
        .unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(
        run.executed_nodes(),
        vec!["start", "receive", "session", "qa", "intent", "route", "ai", "send"]
    );
    assert_eq!(run.last_step().unwrap().node_type, "send_command");
    assert_eq!(run.end_node.as_deref(), Some("end"));
    assert_eq!(run.decision.as_deref(), Some("default"));
    assert_eq!(run.context.get_text("reply"), Some(DEFAULT_FAKE_REPLY));
    assert!(run.error.is_none());

    let sent = fakes.gateway.sent();
    assert_eq!(sent.len(), 1);
    assert!(!sent[0].message_body.is_empty());
    assert_eq!(sent[0].target, "售后群");
    assert_eq!(sent[0].at_list, vec!["alice"]);
}

#[tokio::test]
async fn test_angry_complaint_routes_to_staff_and_alerts() {
    let (engine, fakes) = support_engine();
    let run = engine
        .handle_event(group_event("m-2", "bob", "我要投诉你们的售后"))
        .await
        .unwrap()
        .into_run()
        .unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    let path = run.executed_nodes();
    assert!(path.contains(&"staff"));
    assert!(!path.contains(&"ai"));
    assert_eq!(run.decision.as_deref(), Some("complaint"));
    assert_eq!(run.context.get_bool("handoff"), Some(true));
    assert_eq!(run.context.get_text("replySource"), Some("staff"));
    assert_eq!(fakes.gateway.sent().len(), 1);

    let alerts = engine.alerts(&AlertQuery::rule("complaint")).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].intent_type, "投诉");
    assert_eq!(alerts[0].group_id.as_deref(), Some("售后群"));
    assert_eq!(alerts[0].batch_id.as_deref(), Some(run.id.as_str()));
    engine.shutdown();
}

#[tokio::test]
async fn test_knowledge_hit_skips_ai() {
    let (engine, _fakes) = support_engine();
    let run = engine
        .handle_event(private_event("m-3", "carol", "请问营业时间是几点"))
        .await
        .unwrap()
        .into_run()
        .unwrap();

    assert_eq!(run.decision.as_deref(), Some("qa"));
    assert_eq!(run.executed_nodes().last(), Some(&"send"));
    assert!(!run.executed_nodes().contains(&"ai"));
    assert_eq!(run.context.get_text("reply"), Some("9:00-18:00"));
    assert_eq!(run.context.get_text("replySource"), Some("qa"));
}

#[tokio::test]
async fn test_group_message_without_mention_is_not_sent() {
    let (engine, fakes) = support_engine();
    let mut event = group_event("m-4", "dave", "大家好");
    event.at_me = false;
    let run = engine.handle_event(event).await.unwrap().into_run().unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.context.get_bool("shouldReply"), Some(false));
    assert_eq!(run.context.get_bool("sent"), Some(false));
    assert!(fakes.gateway.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_ai_outage_falls_back_to_staff() {
    let (builder, fakes) = builder(FakeAiService::new().failing_generate(10), FakeKnowledgeBase::new());
    let engine = builder.flow(support_flow()).build().unwrap();
    let run = engine
        .handle_event(private_event("m-5", "erin", "在吗"))
        .await
        .unwrap()
        .into_run()
        .unwrap();

    let ai = run.step("ai").unwrap();
    assert_eq!(ai.status, StepStatus::Failed);
    assert_eq!(ai.attempts, 3);
    assert!(run.executed_nodes().ends_with(&["ai", "staff", "send"]));
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.error.as_deref().unwrap().starts_with("ai:"));
    assert_eq!(fakes.gateway.sent().len(), 1);
}

#[tokio::test]
async fn test_runs_are_tracked_per_session() {
    let (engine, _fakes) = support_engine();
    engine.handle_event(private_event("m-6", "frank", "你好")).await.unwrap();
    engine.handle_event(private_event("m-7", "frank", "还在吗")).await.unwrap();
    engine.handle_event(private_event("m-8", "grace", "你好")).await.unwrap();

    let runs = engine.runs_for_session("bot-1:frank").await.unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| r.status == RunStatus::Completed));
    let loaded = engine.run(&runs[0].id).await.unwrap().unwrap();
    assert_eq!(loaded.msg_id, runs[0].msg_id);
}

#[test]
fn test_shipped_flow_validates() {
    let registry = NodeExecutorRegistry::with_builtins(&fake::services());
    let report = validate_flow(&support_flow(), &registry);
    assert!(report.is_valid, "{:?}", report.diagnostics);
}

#[test]
fn test_dangling_edge_is_rejected_at_install() {
    let (builder, _fakes) = builder(FakeAiService::new(), FakeKnowledgeBase::new());
    let engine = builder.build().unwrap();

    let mut flow = support_flow();
    flow.edges[10].target = "nowhere".to_string();
    let registry = NodeExecutorRegistry::with_builtins(&fake::services());
    let report = validate_flow(&flow, &registry);
    assert!(!report.is_valid);
    assert!(report.has_code("E007"));

    let err = engine.install_flow(&flow).unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidFlowDefinition { .. }), "{}", err);
}

#[tokio::test]
async fn test_handle_event_without_flow() {
    let (builder, _fakes) = builder(FakeAiService::new(), FakeKnowledgeBase::new());
    let engine = builder.build().unwrap();
    let err = engine.handle_event(private_event("m-9", "x", "hi")).await.unwrap_err();
    assert!(matches!(err, WorkflowError::ConfigError(_)));
}

fn values(v: Value) -> Map<String, Value> {
    v.as_object().cloned().unwrap()
}

#[test]
fn test_route_decision_table() {
    let registry = NodeExecutorRegistry::with_builtins(&fake::services());
    let graph = xchatflow::build_flow_graph(&support_flow(), &registry).unwrap();
    let route = graph.decision("route").unwrap();

    let table = [
        (json!({"qaMatched": true, "intent": "投诉", "emotion": "angry"}), "send", "qa"),
        (json!({"qaMatched": false, "intent": "投诉", "emotion": "angry"}), "staff", "complaint"),
        (json!({"intent": "投诉", "emotion": "calm", "needHuman": true}), "staff", "human"),
        (json!({"intent": "投诉", "emotion": "calm"}), "ai", "default"),
        (json!({"intent": "chat"}), "ai", "default"),
        (json!({}), "ai", "default"),
    ];
    for (ctx, target, label) in table {
        let selection = route.select(&values(ctx.clone()));
        assert_eq!(selection.target, target, "{}", ctx);
        assert_eq!(selection.label, label, "{}", ctx);
    }
}
