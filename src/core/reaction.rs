//! 反应引擎：根据项目规则决定对事件做什么（投递给 Agent / 通知人类 / 不动作）
//!
//! 引擎本身无状态、不会失败；重试计数由调用方以显式状态对象传入。
//! 升级（改为紧急通知）对同一次状况只发生一次，直到计数被清零。

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::config::{parse_duration, EscalateAfter, ReactionKind, ReactionRule};
use crate::events::{infer_priority, EventPriority};
use crate::session::SessionId;

/// 本次触发的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Firing {
    /// 状态刚转换进入触发状态（或一次性事件）
    Transition,
    /// 触发状态在后续 tick 持续存在；只有带 cooldown 或升级条件的规则会响应
    Persisting,
}

/// 某会话某事件类型的反应计数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReactionCounter {
    pub attempts: u32,
    pub first_attempt_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub escalated: bool,
    /// 投递失败次数（信箱写入失败）
    pub delivery_failures: u32,
}

/// 单个会话的计数表：事件类型 → 计数
pub type SessionCounters = HashMap<String, ReactionCounter>;

/// 引擎的决定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reaction {
    pub event_type: String,
    pub kind: ReactionKind,
    pub priority: EventPriority,
    pub message: Option<String>,
    /// 第几次尝试（从 1 开始）
    pub attempt: u32,
    pub escalated: bool,
}

/// 反应引擎
#[derive(Debug, Default, Clone, Copy)]
pub struct ReactionEngine;

fn should_escalate(rule: &ReactionRule, counter: &ReactionCounter, now: DateTime<Utc>) -> bool {
    if let Some(retries) = rule.retries {
        if counter.attempts > retries {
            return true;
        }
    }
    match &rule.escalate_after {
        Some(EscalateAfter::Attempts(n)) => counter.attempts > *n,
        Some(EscalateAfter::Duration(s)) => {
            let (Some(limit), Some(first)) = (parse_duration(s), counter.first_attempt_at) else {
                return false;
            };
            (now - first).to_std().map(|elapsed| elapsed >= limit).unwrap_or(false)
        }
        None => false,
    }
}

/// 状态持续时的重发间隔（秒）；None 表示只在转换时触发。
/// 有 retries / escalate_after 而未设 cooldown 的规则每个 tick 都计一次尝试。
fn refire_cooldown(rule: &ReactionRule) -> Option<u64> {
    match rule.cooldown_secs {
        Some(cooldown) => Some(cooldown),
        None if rule.retries.is_some() || rule.escalate_after.is_some() => Some(0),
        None => None,
    }
}

impl ReactionEngine {
    pub fn new() -> Self {
        Self
    }

    /// 决定对 `event_type` 的反应；没有规则或 `auto = false` 时返回 None
    pub fn decide(
        &self,
        rules: &HashMap<String, ReactionRule>,
        event_type: &str,
        counters: &mut SessionCounters,
        firing: Firing,
        now: DateTime<Utc>,
    ) -> Option<Reaction> {
        let rule = rules.get(event_type)?;
        if !rule.auto {
            return None;
        }

        let counter = counters.entry(event_type.to_string()).or_default();
        if counter.escalated {
            return None;
        }

        if firing == Firing::Persisting {
            let cooldown = refire_cooldown(rule)?;
            if let Some(last) = counter.last_attempt_at {
                let since = (now - last).num_seconds();
                if since < cooldown as i64 {
                    return None;
                }
            }
        }

        counter.attempts += 1;
        counter.first_attempt_at.get_or_insert(now);
        counter.last_attempt_at = Some(now);

        if should_escalate(rule, counter, now) {
            counter.escalated = true;
            return Some(Reaction {
                event_type: event_type.to_string(),
                kind: ReactionKind::Notify,
                priority: EventPriority::Urgent,
                message: rule.message.clone(),
                attempt: counter.attempts,
                escalated: true,
            });
        }

        Some(Reaction {
            event_type: event_type.to_string(),
            kind: rule.action,
            priority: rule.priority.unwrap_or_else(|| infer_priority(event_type)),
            message: rule.message.clone(),
            attempt: counter.attempts,
            escalated: false,
        })
    }
}

/// 所有会话的计数，由主控循环独占；并发处理时按会话取出、处理完再放回
#[derive(Debug, Default)]
pub struct ReactionCounters {
    sessions: HashMap<SessionId, SessionCounters>,
}

impl ReactionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取出某会话的计数（交给该会话的处理单元独占）
    pub fn take(&mut self, session_id: &str) -> SessionCounters {
        self.sessions.remove(session_id).unwrap_or_default()
    }

    pub fn restore(&mut self, session_id: &str, counters: SessionCounters) {
        if !counters.is_empty() {
            self.sessions.insert(session_id.to_string(), counters);
        }
    }

    pub fn remove(&mut self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    pub fn get(&self, session_id: &str, event_type: &str) -> Option<&ReactionCounter> {
        self.sessions.get(session_id)?.get(event_type)
    }

    /// 直接在存储上做决定（串行路径使用）
    pub fn decide_for(
        &mut self,
        engine: &ReactionEngine,
        session_id: &str,
        rules: &HashMap<String, ReactionRule>,
        event_type: &str,
        firing: Firing,
        now: DateTime<Utc>,
    ) -> Option<Reaction> {
        let counters = self.sessions.entry(session_id.to_string()).or_default();
        engine.decide(rules, event_type, counters, firing, now)
    }
}

/// 状况解除：清零这些事件类型的计数
pub fn reset_counters(counters: &mut SessionCounters, event_types: &[String]) {
    for event_type in event_types {
        counters.remove(event_type);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn rules(event: &str, rule: ReactionRule) -> HashMap<String, ReactionRule> {
        HashMap::from([(event.to_string(), rule)])
    }

    #[test]
    fn test_no_rule_or_manual_rule_means_no_action() {
        let engine = ReactionEngine::new();
        let mut counters = SessionCounters::new();
        let now = Utc::now();

        assert!(engine
            .decide(&HashMap::new(), "ci.failing", &mut counters, Firing::Transition, now)
            .is_none());

        let manual = rules("ci.failing", ReactionRule { auto: false, ..ReactionRule::send_to_agent() });
        assert!(engine
            .decide(&manual, "ci.failing", &mut counters, Firing::Transition, now)
            .is_none());
        assert!(counters.is_empty());
    }

    #[test]
    fn test_escalates_after_retries_exactly_once() {
        let engine = ReactionEngine::new();
        let rules = rules("ci.failing", ReactionRule::send_to_agent().with_retries(2));
        let mut counters = SessionCounters::new();
        let now = Utc::now();

        let first = engine
            .decide(&rules, "ci.failing", &mut counters, Firing::Transition, now)
            .unwrap();
        assert_eq!(first.kind, ReactionKind::SendToAgent);
        assert_eq!(first.priority, EventPriority::Warning);
        assert_eq!(first.attempt, 1);

        let second = engine
            .decide(&rules, "ci.failing", &mut counters, Firing::Persisting, now)
            .unwrap();
        assert_eq!(second.kind, ReactionKind::SendToAgent);

        let third = engine
            .decide(&rules, "ci.failing", &mut counters, Firing::Persisting, now)
            .unwrap();
        assert_eq!(third.kind, ReactionKind::Notify);
        assert_eq!(third.priority, EventPriority::Urgent);
        assert!(third.escalated);
        assert_eq!(third.attempt, 3);

        for _ in 0..5 {
            assert!(engine
                .decide(&rules, "ci.failing", &mut counters, Firing::Persisting, now)
                .is_none());
        }

        reset_counters(&mut counters, &["ci.failing".to_string()]);
        let fresh = engine
            .decide(&rules, "ci.failing", &mut counters, Firing::Transition, now)
            .unwrap();
        assert_eq!(fresh.kind, ReactionKind::SendToAgent);
        assert_eq!(fresh.attempt, 1);
    }

    #[test]
    fn test_persisting_without_cooldown_or_escalation_does_not_refire() {
        let engine = ReactionEngine::new();
        let rules = rules("pr.created", ReactionRule::notify());
        let mut counters = SessionCounters::new();
        let now = Utc::now();

        assert!(engine
            .decide(&rules, "pr.created", &mut counters, Firing::Transition, now)
            .is_some());
        assert!(engine
            .decide(&rules, "pr.created", &mut counters, Firing::Persisting, now)
            .is_none());
        assert_eq!(counters["pr.created"].attempts, 1);
    }

    #[test]
    fn test_retries_without_cooldown_count_every_persisting_tick() {
        let engine = ReactionEngine::new();
        let rules = rules("ci.failing", ReactionRule::send_to_agent().with_retries(2));
        let mut counters = SessionCounters::new();
        let now = Utc::now();

        let kinds: Vec<_> = [Firing::Transition, Firing::Persisting, Firing::Persisting]
            .into_iter()
            .map(|firing| engine.decide(&rules, "ci.failing", &mut counters, firing, now).unwrap())
            .map(|r| (r.kind, r.escalated))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (ReactionKind::SendToAgent, false),
                (ReactionKind::SendToAgent, false),
                (ReactionKind::Notify, true),
            ]
        );
        assert!(engine
            .decide(&rules, "ci.failing", &mut counters, Firing::Persisting, now)
            .is_none());
    }

    #[test]
    fn test_cooldown_spaces_out_refires() {
        let engine = ReactionEngine::new();
        let rules = rules("review.changes_requested", ReactionRule::send_to_agent().with_cooldown(300));
        let mut counters = SessionCounters::new();
        let start = Utc::now();
        let event = "review.changes_requested";

        assert!(engine.decide(&rules, event, &mut counters, Firing::Transition, start).is_some());
        assert!(engine
            .decide(&rules, event, &mut counters, Firing::Persisting, start + ChronoDuration::seconds(60))
            .is_none());
        let again = engine
            .decide(&rules, event, &mut counters, Firing::Persisting, start + ChronoDuration::seconds(301))
            .unwrap();
        assert_eq!(again.attempt, 2);
    }

    #[test]
    fn test_escalate_after_duration() {
        let engine = ReactionEngine::new();
        let rules = rules(
            "session.needs_input",
            ReactionRule::send_to_agent()
                .with_cooldown(0)
                .with_escalate_after(EscalateAfter::Duration("30m".into())),
        );
        let mut counters = SessionCounters::new();
        let start = Utc::now();
        let event = "session.needs_input";

        let first = engine.decide(&rules, event, &mut counters, Firing::Transition, start).unwrap();
        assert!(!first.escalated);
        let later = engine
            .decide(&rules, event, &mut counters, Firing::Persisting, start + ChronoDuration::minutes(10))
            .unwrap();
        assert!(!later.escalated);
        let late = engine
            .decide(&rules, event, &mut counters, Firing::Persisting, start + ChronoDuration::minutes(31))
            .unwrap();
        assert!(late.escalated);
        assert_eq!(late.kind, ReactionKind::Notify);
    }

    #[test]
    fn test_escalate_after_attempt_count() {
        let engine = ReactionEngine::new();
        let rules = rules(
            "ci.failing",
            ReactionRule::send_to_agent()
                .with_cooldown(0)
                .with_escalate_after(EscalateAfter::Attempts(1)),
        );
        let mut counters = SessionCounters::new();
        let now = Utc::now();

        assert!(!engine.decide(&rules, "ci.failing", &mut counters, Firing::Transition, now).unwrap().escalated);
        assert!(engine.decide(&rules, "ci.failing", &mut counters, Firing::Persisting, now).unwrap().escalated);
    }

    #[test]
    fn test_counters_are_partitioned_per_session() {
        let engine = ReactionEngine::new();
        let rules = rules("ci.failing", ReactionRule::send_to_agent().with_retries(0));
        let mut store = ReactionCounters::new();
        let now = Utc::now();

        let a = store
            .decide_for(&engine, "app-1", &rules, "ci.failing", Firing::Transition, now)
            .unwrap();
        assert!(a.escalated);
        let b = store
            .decide_for(&engine, "app-2", &rules, "ci.failing", Firing::Transition, now)
            .unwrap();
        assert!(b.escalated);

        let taken = store.take("app-1");
        assert_eq!(taken["ci.failing"].attempts, 1);
        assert!(store.get("app-1", "ci.failing").is_none());
        store.restore("app-1", taken);
        assert!(store.get("app-1", "ci.failing").unwrap().escalated);

        store.remove("app-2");
        assert!(store.get("app-2", "ci.failing").is_none());
    }
}
