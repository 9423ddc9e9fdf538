//! 编排事件定义

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 事件类型字符串常量（反应配置同样以这些字符串为键）
pub mod event_types {
    pub const SESSION_WORKING: &str = "session.working";
    pub const SESSION_IDLE: &str = "session.idle";
    pub const SESSION_NEEDS_INPUT: &str = "session.needs_input";
    pub const SESSION_STUCK: &str = "session.stuck";
    pub const SESSION_KILLED: &str = "session.killed";
    pub const PR_CREATED: &str = "pr.created";
    pub const PR_MERGED: &str = "pr.merged";
    pub const CI_FAILING: &str = "ci.failing";
    pub const REVIEW_PENDING: &str = "review.pending";
    pub const REVIEW_APPROVED: &str = "review.approved";
    pub const REVIEW_CHANGES_REQUESTED: &str = "review.changes_requested";
    pub const MERGE_READY: &str = "merge.ready";
    pub const MERGE_CONFLICTS: &str = "merge.conflicts";
    pub const BRANCH_ADVANCED: &str = "branch.advanced";
    pub const REACTION_TRIGGERED: &str = "reaction.triggered";
    pub const REACTION_ESCALATED: &str = "reaction.escalated";
    pub const REACTION_DELIVERY_FAILED: &str = "reaction.delivery_failed";
    pub const SUMMARY_ALL_COMPLETE: &str = "summary.all_complete";
}

/// 事件优先级（Urgent 最高）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    #[default]
    Info,
    Warning,
    Action,
    Urgent,
}

impl EventPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventPriority::Info => "info",
            EventPriority::Warning => "warning",
            EventPriority::Action => "action",
            EventPriority::Urgent => "urgent",
        }
    }
}

impl fmt::Display for EventPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 按事件类型推断优先级
pub fn infer_priority(event_type: &str) -> EventPriority {
    if event_type.contains("stuck")
        || event_type.contains("needs_input")
        || event_type.contains("killed")
        || event_type.contains("escalated")
    {
        EventPriority::Urgent
    } else if event_type.contains("approved")
        || event_type.contains("ready")
        || event_type.contains("merged")
        || event_type.contains("complete")
    {
        EventPriority::Action
    } else if event_type.contains("fail")
        || event_type.contains("changes_requested")
        || event_type.contains("conflicts")
    {
        EventPriority::Warning
    } else {
        EventPriority::Info
    }
}

/// 不可变的编排事件；落盘为一行 JSON（camelCase 字段，时间为 ISO-8601）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub priority: EventPriority,
    pub session_id: String,
    pub project_id: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl OrchestratorEvent {
    pub fn new(
        event_type: impl Into<String>,
        session_id: impl Into<String>,
        project_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let event_type = event_type.into();
        Self {
            id: format!("evt_{}", uuid::Uuid::new_v4().simple()),
            priority: infer_priority(&event_type),
            event_type,
            session_id: session_id.into(),
            project_id: project_id.into(),
            timestamp: Utc::now(),
            message: message.into(),
            data: Map::new(),
        }
    }

    /// 项目级事件（不针对单个会话，sessionId 为空串）
    pub fn for_project(
        event_type: impl Into<String>,
        project_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(event_type, "", project_id, message)
    }

    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_data(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}
