use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::utils::{message_text, parse_config, patch};
use crate::alert::types::RaisedAlert;
use crate::error::NodeError;
use crate::nodes::{NodeContext, NodeExecutor, NodeOutcome, NodeType};
use crate::services::{AiService, ClassifyRequest, ClassifyTask, KnowledgeBase};

fn classify_request(
    task: ClassifyTask,
    ctx: &NodeContext<'_>,
    labels: &[String],
    prompt: Option<&str>,
) -> Result<ClassifyRequest, NodeError> {
    Ok(ClassifyRequest {
        task,
        text: message_text(ctx.context)?.to_string(),
        session_id: ctx.context.get_text("sessionId").map(str::to_string),
        labels: labels.to_vec(),
        prompt: prompt.map(|p| ctx.context.render(p)),
    })
}

// ================================
// qa_match
// ================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct QaMatchConfig {
    threshold: f64,
}

impl Default for QaMatchConfig {
    fn default() -> Self {
        Self { threshold: 0.8 }
    }
}

/// 知识库匹配节点
pub struct QaMatchExecutor {
    knowledge: Arc<dyn KnowledgeBase>,
}

impl QaMatchExecutor {
    pub fn new(knowledge: Arc<dyn KnowledgeBase>) -> Self {
        Self { knowledge }
    }
}

#[async_trait]
impl NodeExecutor for QaMatchExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::QaMatch
    }

    fn validate(&self, config: &Value) -> Result<(), NodeError> {
        let config: QaMatchConfig = parse_config(config)?;
        if !(0.0..=1.0).contains(&config.threshold) {
            return Err(NodeError::ConfigError(format!(
                "threshold must be within 0..=1, got {}",
                config.threshold
            )));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let config: QaMatchConfig = parse_config(ctx.config)?;
        let question = message_text(ctx.context)?;
        let hit = self
            .knowledge
            .lookup(question)
            .await
            .map_err(|e| e.into_node_error("knowledge"))?;

        let outcome = match hit {
            Some(m) if m.score >= config.threshold => NodeOutcome::patch(patch([
                ("qaMatched", json!(true)),
                ("qaScore", json!(m.score)),
                ("qaQuestion", json!(m.question)),
                ("qaAnswer", json!(m.answer)),
                ("reply", json!(m.answer)),
                ("replySource", json!("qa")),
            ])),
            other => NodeOutcome::patch(patch([
                ("qaMatched", json!(false)),
                ("qaScore", json!(other.map(|m| m.score).unwrap_or(0.0))),
            ])),
        };
        Ok(outcome)
    }
}

// ================================
// intent
// ================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ClassifyConfig {
    labels: Vec<String>,
    prompt: Option<String>,
}

/// 意图识别节点
pub struct IntentExecutor {
    ai: Arc<dyn AiService>,
}

impl IntentExecutor {
    pub fn new(ai: Arc<dyn AiService>) -> Self {
        Self { ai }
    }
}

#[async_trait]
impl NodeExecutor for IntentExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Intent
    }

    fn validate(&self, config: &Value) -> Result<(), NodeError> {
        parse_config::<ClassifyConfig>(config).map(|_| ())
    }

    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let config: ClassifyConfig = parse_config(ctx.config)?;
        let request =
            classify_request(ClassifyTask::Intent, ctx, &config.labels, config.prompt.as_deref())?;
        let result = self
            .ai
            .classify(request)
            .await
            .map_err(|e| e.into_node_error("ai"))?;

        let mut p = patch([
            ("intent", json!(result.intent)),
            ("intentConfidence", json!(result.confidence)),
            ("needReply", json!(result.need_reply)),
            ("needHuman", json!(result.need_human)),
        ]);
        // Single-call classifiers may already know the mood and risk.
        if let Some(emotion) = result.emotion {
            p.insert("emotion".to_string(), json!(emotion));
        }
        if let Some(level) = result.risk_level {
            p.insert("riskLevel".to_string(), json!(level));
        }
        Ok(NodeOutcome::patch(p))
    }
}

// ================================
// emotion_analyze
// ================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct EmotionConfig {
    negative: Vec<String>,
    prompt: Option<String>,
}

impl Default for EmotionConfig {
    fn default() -> Self {
        Self {
            negative: vec!["angry".into(), "sad".into(), "anxious".into()],
            prompt: None,
        }
    }
}

/// 情绪分析节点
pub struct EmotionAnalyzeExecutor {
    ai: Arc<dyn AiService>,
}

impl EmotionAnalyzeExecutor {
    pub fn new(ai: Arc<dyn AiService>) -> Self {
        Self { ai }
    }
}

#[async_trait]
impl NodeExecutor for EmotionAnalyzeExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::EmotionAnalyze
    }

    fn validate(&self, config: &Value) -> Result<(), NodeError> {
        parse_config::<EmotionConfig>(config).map(|_| ())
    }

    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let config: EmotionConfig = parse_config(ctx.config)?;
        let request = classify_request(ClassifyTask::Emotion, ctx, &[], config.prompt.as_deref())?;
        let result = self
            .ai
            .classify(request)
            .await
            .map_err(|e| e.into_node_error("ai"))?;

        let emotion = result.emotion.unwrap_or_else(|| "neutral".to_string());
        let negative = config.negative.iter().any(|n| n == &emotion);
        Ok(NodeOutcome::patch(patch([
            ("emotion", json!(emotion)),
            ("emotionScore", json!(result.confidence)),
            ("emotionNegative", json!(negative)),
        ])))
    }
}

// ================================
// risk_detect
// ================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RiskDetectConfig {
    keywords: Vec<String>,
    /// Classifier levels that count as a risk.
    alert_levels: Vec<String>,
    /// Intent type of the raised alert.
    intent_type: String,
    raise_alert: bool,
    use_classifier: bool,
}

impl Default for RiskDetectConfig {
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            alert_levels: vec!["high".into(), "critical".into()],
            intent_type: "risk".to_string(),
            raise_alert: true,
            use_classifier: true,
        }
    }
}

/// 风险识别节点 - keyword scan plus classifier; raises an alert on risk
pub struct RiskDetectExecutor {
    ai: Arc<dyn AiService>,
}

impl RiskDetectExecutor {
    pub fn new(ai: Arc<dyn AiService>) -> Self {
        Self { ai }
    }
}

#[async_trait]
impl NodeExecutor for RiskDetectExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::RiskDetect
    }

    fn validate(&self, config: &Value) -> Result<(), NodeError> {
        let config: RiskDetectConfig = parse_config(config)?;
        if config.intent_type.trim().is_empty() {
            return Err(NodeError::ConfigError("intentType is empty".to_string()));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let config: RiskDetectConfig = parse_config(ctx.config)?;
        let text = message_text(ctx.context)?;
        let lowered = text.to_lowercase();
        let matched: Vec<&String> = config
            .keywords
            .iter()
            .filter(|k| !k.is_empty() && lowered.contains(&k.to_lowercase()))
            .collect();

        let (mut level, need_human) = if config.use_classifier {
            let result = self
                .ai
                .classify(classify_request(ClassifyTask::Risk, ctx, &[], None)?)
                .await
                .map_err(|e| e.into_node_error("ai"))?;
            (result.risk_level.unwrap_or_else(|| "low".to_string()), result.need_human)
        } else {
            ("low".to_string(), false)
        };
        if !matched.is_empty() && !config.alert_levels.contains(&level) {
            level = "high".to_string();
        }
        let detected = !matched.is_empty() || need_human || config.alert_levels.contains(&level);

        let mut outcome = NodeOutcome::patch(patch([
            ("riskDetected", json!(detected)),
            ("riskLevel", json!(level)),
            ("riskKeywords", json!(matched)),
        ]));
        if detected && config.raise_alert {
            outcome = outcome.with_alert(RaisedAlert::from_context(
                &config.intent_type,
                text,
                ctx.context,
                ctx.runtime.time_provider.now_timestamp(),
                Some(ctx.node_id),
            ));
        }
        Ok(outcome)
    }
}
