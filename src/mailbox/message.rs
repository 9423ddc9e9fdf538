//! 信箱消息格式

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::EventPriority;

/// 消息类型（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    FixCiFailure,
    FixReviewComments,
    StatusRequest,
    StatusResponse,
    Shutdown,
    Ack,
    Error,
    Custom,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::FixCiFailure => "fix_ci_failure",
            MessageType::FixReviewComments => "fix_review_comments",
            MessageType::StatusRequest => "status_request",
            MessageType::StatusResponse => "status_response",
            MessageType::Shutdown => "shutdown",
            MessageType::Ack => "ack",
            MessageType::Error => "error",
            MessageType::Custom => "custom",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 消息优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagePriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl From<EventPriority> for MessagePriority {
    fn from(p: EventPriority) -> Self {
        match p {
            EventPriority::Urgent => MessagePriority::Urgent,
            EventPriority::Action => MessagePriority::High,
            EventPriority::Warning => MessagePriority::Normal,
            EventPriority::Info => MessagePriority::Low,
        }
    }
}

/// 信箱消息；id / timestamp 为空时由 send 补全
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default)]
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub priority: MessagePriority,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub requires_ack: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acked_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl Message {
    pub fn new(from: impl Into<String>, to: impl Into<String>, message_type: MessageType) -> Self {
        Self {
            id: String::new(),
            from: from.into(),
            to: to.into(),
            timestamp: None,
            message_type,
            priority: MessagePriority::Normal,
            payload: Value::Null,
            requires_ack: false,
            acked_at: None,
            reply_to: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn requiring_ack(mut self) -> Self {
        self.requires_ack = true;
        self
    }

    pub fn in_reply_to(mut self, id: impl Into<String>) -> Self {
        self.reply_to = Some(id.into());
        self
    }

    pub fn is_unread(&self) -> bool {
        self.acked_at.is_none()
    }

    /// 生成新的消息 ID
    pub fn generate_id() -> String {
        format!("msg_{}", uuid::Uuid::new_v4().simple())
    }

    /// 文件名：`{去掉冒号的时间戳}-{id}-{type}.json`
    pub fn file_name(&self) -> String {
        let ts = self
            .timestamp
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
            .to_rfc3339_opts(SecondsFormat::Millis, true)
            .replace(':', "");
        format!("{}-{}-{}.json", ts, self.id, self.message_type.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_file_name_is_deterministic() {
        let mut msg = Message::new("orchestrator", "app-1", MessageType::FixCiFailure).with_id("msg_1");
        msg.timestamp = Some(Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap());
        assert_eq!(msg.file_name(), "2026-03-04T050607.000Z-msg_1-fix_ci_failure.json");
        assert_eq!(msg.file_name(), msg.clone().file_name());
    }

    #[test]
    fn test_message_wire_format() {
        let msg = Message::new("a", "b", MessageType::Ack)
            .with_id("msg_2")
            .in_reply_to("msg_1")
            .requiring_ack();
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "ack");
        assert_eq!(value["replyTo"], "msg_1");
        assert_eq!(value["requiresAck"], true);
        assert!(value.get("ackedAt").is_none());
    }

    #[test]
    fn test_priority_from_event_priority() {
        assert_eq!(MessagePriority::from(EventPriority::Urgent), MessagePriority::Urgent);
        assert_eq!(MessagePriority::from(EventPriority::Info), MessagePriority::Low);
    }
}
