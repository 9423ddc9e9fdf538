//! 把反应决定变成信箱消息：类型、载荷与给 Agent 的指令文本

use serde_json::{json, Value};

use crate::core::classifier::Observation;
use crate::core::reaction::Reaction;
use crate::events::event_types;
use crate::mailbox::{Message, MessagePriority, MessageType};
use crate::plugins::CiStatus;
use crate::session::Session;

/// 反应消息的发送方
pub const ORCHESTRATOR: &str = "orchestrator";

/// 事件类型 → 消息类型
pub fn message_type_for(event_type: &str) -> MessageType {
    match event_type {
        event_types::CI_FAILING => MessageType::FixCiFailure,
        event_types::REVIEW_CHANGES_REQUESTED => MessageType::FixReviewComments,
        _ => MessageType::Custom,
    }
}

/// 规则未配置 message 时的默认指令
pub fn default_instruction(event_type: &str, observation: &Observation) -> String {
    let pr_ref = observation
        .pr
        .as_ref()
        .map(|pr| format!("PR #{} ({})", pr.number, pr.url))
        .unwrap_or_else(|| "your pull request".to_string());

    match event_type {
        event_types::CI_FAILING => {
            let failed: Vec<&str> = observation
                .failed_checks
                .iter()
                .map(|c| c.name.as_str())
                .collect();
            if failed.is_empty() {
                format!("CI is failing on {pr_ref}. Investigate the failure and push a fix.")
            } else {
                format!(
                    "CI is failing on {pr_ref}. Failed checks: {}. Investigate and push a fix.",
                    failed.join(", ")
                )
            }
        }
        event_types::REVIEW_CHANGES_REQUESTED => format!(
            "Reviewers requested changes on {pr_ref} ({} unresolved comment(s)). Address the feedback and push.",
            observation.comments.len()
        ),
        event_types::MERGE_CONFLICTS => {
            format!("{pr_ref} has merge conflicts. Rebase onto the base branch and resolve them.")
        }
        event_types::BRANCH_ADVANCED => {
            "The default branch has advanced. Rebase your branch onto it and re-run the tests.".to_string()
        }
        event_types::SESSION_STUCK => {
            "You appear to be idle. Report your status or continue with the task.".to_string()
        }
        other => format!("Event {other} needs your attention."),
    }
}

/// 消息载荷：指令文本 + 与事件相关的细节
pub fn build_payload(
    reaction: &Reaction,
    session: &Session,
    observation: &Observation,
    extra: Option<&Value>,
) -> Value {
    let instruction = reaction
        .message
        .clone()
        .unwrap_or_else(|| default_instruction(&reaction.event_type, observation));

    let mut payload = json!({
        "event": reaction.event_type,
        "attempt": reaction.attempt,
        "instruction": instruction,
        "sessionId": session.id,
        "projectId": session.project_id,
    });

    if let Some(pr) = &observation.pr {
        payload["pr"] = json!({ "number": pr.number, "url": pr.url, "branch": pr.branch });
    }

    match reaction.event_type.as_str() {
        event_types::CI_FAILING => {
            let checks: Vec<Value> = observation
                .failed_checks
                .iter()
                .filter(|c| c.status == CiStatus::Failing)
                .map(|c| json!({ "name": c.name, "url": c.url }))
                .collect();
            payload["failedChecks"] = Value::Array(checks);
        }
        event_types::REVIEW_CHANGES_REQUESTED => {
            let comments: Vec<Value> = observation
                .comments
                .iter()
                .map(|c| {
                    json!({
                        "author": c.author,
                        "body": c.body,
                        "path": c.path,
                        "line": c.line,
                        "url": c.url,
                    })
                })
                .collect();
            payload["comments"] = Value::Array(comments);
        }
        _ => {}
    }

    if let Some(extra) = extra {
        payload["data"] = extra.clone();
    }
    payload
}

/// 组装发往会话的消息
pub fn build_message(
    reaction: &Reaction,
    session: &Session,
    observation: &Observation,
    extra: Option<&Value>,
) -> Message {
    Message::new(ORCHESTRATOR, session.id.clone(), message_type_for(&reaction.event_type))
        .with_priority(MessagePriority::from(reaction.priority))
        .with_payload(build_payload(reaction, session, observation, extra))
}

/// 投递后发到会话终端的提醒
pub fn nudge_text(message: &Message) -> String {
    format!(
        "You have a new {} message ({}) in your inbox. Read it and act on it.",
        message.message_type, message.id
    )
}
