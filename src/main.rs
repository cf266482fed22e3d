use std::sync::Arc;

use anyhow::Context;
use serde_json::json;
use xchatflow::core::create_event_channel;
use xchatflow::services::fake::{FakeAiService, FakeKnowledgeBase, RecordingGateway};
use xchatflow::services::{Classification, ClassifyTask, Services};
use xchatflow::{
    load_flow, AlertQuery, AlertRuleSet, ChatFlowEngine, EngineConfig, EventOutcome, FlowEvent,
    InboundEvent, RuntimeContext,
};

const DEFAULT_FLOW: &str = "flows/customer_support.json";
const DEFAULT_RULES: &str = "flows/alert_rules.yaml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    println!("=== xchatflow demo ===\n");

    let mut args = std::env::args().skip(1);
    let flow_path = args.next().unwrap_or_else(|| DEFAULT_FLOW.to_string());
    let rules_path = args.next().unwrap_or_else(|| DEFAULT_RULES.to_string());

    let flow = load_flow(&flow_path).with_context(|| format!("loading {}", flow_path))?;
    println!("[OK] Flow '{}' loaded ({} nodes, {} edges)", flow.id, flow.nodes.len(), flow.edges.len());
    let rules = AlertRuleSet::from_file(&rules_path).with_context(|| format!("loading {}", rules_path))?;
    println!("[OK] {} alert rules, {} notification methods", rules.rules.len(), rules.methods.len());

    let config = EngineConfig::default().with_env_overrides()?;

    let ai = FakeAiService::new().with_rule(
        "投诉",
        ClassifyTask::Intent,
        Classification::intent("投诉", 0.95).with_emotion("angry"),
    );
    let knowledge = FakeKnowledgeBase::new().with_entry("营业时间", "我们的营业时间是 9:00-18:00。", 0.92);
    let gateway = Arc::new(RecordingGateway::new());
    let services = Services::new(Arc::new(ai), Arc::new(knowledge), gateway.clone());

    let (tx, mut rx) = create_event_channel();
    let observer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let FlowEvent::AlertFired { alert_id, rule_id, .. } = event {
                println!("    ! alert {} fired by rule {}", alert_id, rule_id);
            }
        }
    });

    let engine = ChatFlowEngine::builder()
        .config(config)
        .services(services)
        .alert_rules(rules)
        .runtime(RuntimeContext::default().with_event_tx(tx))
        .flow(flow)
        .build()?;

    let messages = [
        ("m-1", "alice", "你好"),
        ("m-2", "bob", "请问营业时间是几点？"),
        ("m-3", "carol", "我要投诉你们的服务！"),
        ("m-1", "alice", "你好"),
    ];
    for (msg_id, sender, text) in messages {
        let event: InboundEvent = serde_json::from_value(json!({
            "spoken": text,
            "receivedName": sender,
            "groupName": "客服群",
            "roomType": 1,
            "atMe": true,
            "msgId": msg_id,
            "robotId": "bot-1",
        }))?;
        println!("\n> {}: {}", sender, text);
        match engine.handle_event(event).await? {
            EventOutcome::Processed(run) => {
                let path = run.executed_nodes();
                println!("  status:   {:?}", run.status);
                println!("  path:     {}", path.join(" -> "));
                println!("  decision: {}", run.decision.as_deref().unwrap_or("-"));
                println!("  reply:    {}", run.context.get_text("reply").unwrap_or("-"));
            }
            EventOutcome::Duplicate { msg_id } => println!("  duplicate {} skipped", msg_id),
        }
    }

    engine.alert_engine().flush_deliveries().await;
    let alerts = engine.alerts(&AlertQuery::default()).await?;
    println!("\n[OK] {} messages delivered, {} alerts open", gateway.sent().len(), alerts.len());
    for alert in &alerts {
        println!("  - {} [{}] {} ({})", alert.id, alert.alert_level, alert.alert_message, alert.status.as_str());
    }

    engine.shutdown();
    drop(engine);
    observer.abort();
    Ok(())
}
