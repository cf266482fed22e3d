use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifyTask {
    Intent,
    Emotion,
    Risk,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifyRequest {
    pub task: ClassifyTask,
    pub text: String,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Candidate labels from the node config; empty lets the service decide.
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub intent: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub need_reply: bool,
    #[serde(default)]
    pub need_human: bool,
    #[serde(default)]
    pub emotion: Option<String>,
    #[serde(default)]
    pub risk_level: Option<String>,
}

impl Classification {
    pub fn intent(intent: impl Into<String>, confidence: f64) -> Self {
        Self {
            intent: intent.into(),
            confidence,
            need_reply: true,
            need_human: false,
            emotion: None,
            risk_level: None,
        }
    }

    pub fn with_emotion(mut self, emotion: impl Into<String>) -> Self {
        self.emotion = Some(emotion.into());
        self
    }

    pub fn with_risk(mut self, level: impl Into<String>) -> Self {
        self.risk_level = Some(level.into());
        self
    }

    pub fn needing_human(mut self) -> Self {
        self.need_human = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub context: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaMatch {
    pub question: String,
    pub answer: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub target: String,
    pub message_body: String,
    #[serde(default)]
    pub at_list: Vec<String>,
    #[serde(default)]
    pub robot_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceipt {
    pub delivery_id: String,
    pub accepted: bool,
}
