use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Room types that denote a group conversation.
const GROUP_ROOM_TYPES: &[i64] = &[1, 3];

/// Inbound chat event as delivered by the messaging gateway callback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InboundEvent {
    pub spoken: String,
    pub raw_spoken: String,
    pub received_name: String,
    pub group_name: String,
    pub room_type: i64,
    pub at_me: bool,
    pub text_type: i64,
    pub msg_id: String,
    /// Milliseconds since the epoch, as sent by the gateway.
    pub timestamp: i64,
    pub robot_id: String,
}

impl InboundEvent {
    pub fn is_group(&self) -> bool {
        GROUP_ROOM_TYPES.contains(&self.room_type)
    }

    /// Conversation partner: the group for group chats, else the sender.
    pub fn conversation_name(&self) -> &str {
        if self.is_group() && !self.group_name.is_empty() {
            &self.group_name
        } else {
            &self.received_name
        }
    }

    /// Key used to serialise runs of the same conversation.
    pub fn session_key(&self) -> String {
        format!("{}:{}", self.robot_id, self.conversation_name())
    }

    /// Event fields as top-level context entries.
    pub fn to_context_values(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_partial_event() {
        let event: InboundEvent = serde_json::from_value(json!({
            "spoken": "你好",
            "roomType": 1,
            "atMe": true,
            "groupName": "售后群",
            "receivedName": "张三",
            "robotId": "bot1",
            "msgId": "m1"
        }))
        .unwrap();
        assert!(event.is_group());
        assert_eq!(event.session_key(), "bot1:售后群");
        assert_eq!(event.text_type, 0);
    }

    #[test]
    fn test_private_chat_session_key() {
        let event = InboundEvent {
            received_name: "李四".into(),
            group_name: "ignored".into(),
            room_type: 2,
            robot_id: "bot1".into(),
            ..Default::default()
        };
        assert!(!event.is_group());
        assert_eq!(event.session_key(), "bot1:李四");
    }

    #[test]
    fn test_context_values_use_wire_names() {
        let event = InboundEvent {
            spoken: "hi".into(),
            at_me: true,
            ..Default::default()
        };
        let values = event.to_context_values();
        assert_eq!(values["spoken"], "hi");
        assert_eq!(values["atMe"], true);
        assert!(values.contains_key("rawSpoken"));
    }
}
