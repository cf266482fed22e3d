use serde::{Deserialize, Serialize};

/// Closed set of node types. Tags in flow definitions are snake_case.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Start,
    MessageReceive,
    SessionCreate,
    QaMatch,
    Intent,
    EmotionAnalyze,
    RiskDetect,
    Decision,
    AiReply,
    SendCommand,
    StaffIntervention,
    AlertSave,
    End,
}

impl NodeType {
    pub const ALL: [NodeType; 13] = [
        NodeType::Start,
        NodeType::MessageReceive,
        NodeType::SessionCreate,
        NodeType::QaMatch,
        NodeType::Intent,
        NodeType::EmotionAnalyze,
        NodeType::RiskDetect,
        NodeType::Decision,
        NodeType::AiReply,
        NodeType::SendCommand,
        NodeType::StaffIntervention,
        NodeType::AlertSave,
        NodeType::End,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Start => "start",
            NodeType::MessageReceive => "message_receive",
            NodeType::SessionCreate => "session_create",
            NodeType::QaMatch => "qa_match",
            NodeType::Intent => "intent",
            NodeType::EmotionAnalyze => "emotion_analyze",
            NodeType::RiskDetect => "risk_detect",
            NodeType::Decision => "decision",
            NodeType::AiReply => "ai_reply",
            NodeType::SendCommand => "send_command",
            NodeType::StaffIntervention => "staff_intervention",
            NodeType::AlertSave => "alert_save",
            NodeType::End => "end",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == tag)
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_round_trip_through_serde() {
        for t in NodeType::ALL {
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
            assert_eq!(NodeType::from_tag(t.as_str()), Some(t));
        }
        assert_eq!(NodeType::from_tag("llm"), None);
    }
}
