//! 状态 → 反应事件类型映射表
//!
//! 映射是数据而不是代码：默认表可被 `[[lifecycle.triggers]]` 整体替换。

use crate::config::{TriggerConfig, TriggerGuard};
use crate::events::event_types;
use crate::plugins::Mergeability;
use crate::session::SessionStatus;

/// 映射表
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerTable {
    triggers: Vec<TriggerConfig>,
}

fn trigger(status: SessionStatus, event: &str) -> TriggerConfig {
    TriggerConfig {
        status,
        event: event.to_string(),
        guard: TriggerGuard::Always,
        clears_on: Vec::new(),
    }
}

impl Default for TriggerTable {
    fn default() -> Self {
        use SessionStatus::*;

        let mut ci = trigger(CiFailed, event_types::CI_FAILING);
        ci.clears_on = vec![ReviewPending, ChangesRequested, Approved, Merged];

        let mut changes = trigger(ChangesRequested, event_types::REVIEW_CHANGES_REQUESTED);
        changes.clears_on = vec![Approved, Merged];

        let mut ready = trigger(Approved, event_types::MERGE_READY);
        ready.guard = TriggerGuard::Mergeable;
        let mut conflicts = trigger(Approved, event_types::MERGE_CONFLICTS);
        conflicts.guard = TriggerGuard::Conflicting;

        let mut needs_input = trigger(NeedsInput, event_types::SESSION_NEEDS_INPUT);
        needs_input.clears_on = vec![Working];

        Self::new(vec![
            trigger(Working, event_types::SESSION_WORKING),
            trigger(PrOpen, event_types::PR_CREATED),
            trigger(ReviewPending, event_types::REVIEW_PENDING),
            ci,
            changes,
            trigger(Approved, event_types::REVIEW_APPROVED),
            ready,
            conflicts,
            trigger(Merged, event_types::PR_MERGED),
            needs_input,
            trigger(Killed, event_types::SESSION_KILLED),
        ])
    }
}

impl TriggerTable {
    pub fn new(triggers: Vec<TriggerConfig>) -> Self {
        Self { triggers }
    }

    /// 配置为空时使用默认表
    pub fn from_config(triggers: &[TriggerConfig]) -> Self {
        if triggers.is_empty() {
            Self::default()
        } else {
            Self::new(triggers.to_vec())
        }
    }

    /// 进入 `status` 时要交给反应引擎的事件类型（按表顺序，已应用守卫）
    pub fn events_for(&self, status: SessionStatus, mergeability: Option<&Mergeability>) -> Vec<String> {
        self.triggers
            .iter()
            .filter(|t| t.status == status)
            .filter(|t| match t.guard {
                TriggerGuard::Always => true,
                TriggerGuard::Mergeable => mergeability
                    .map(|m| m.mergeable && !m.has_conflicts)
                    .unwrap_or(false),
                TriggerGuard::Conflicting => mergeability.map(|m| m.has_conflicts).unwrap_or(false),
            })
            .map(|t| t.event.clone())
            .collect()
    }

    /// 状态转换事件的类型：该状态的第一条映射，否则 `session.<status>`
    pub fn transition_event_type(&self, status: SessionStatus) -> String {
        self.triggers
            .iter()
            .find(|t| t.status == status)
            .map(|t| t.event.clone())
            .unwrap_or_else(|| format!("session.{}", status.as_str()))
    }

    /// 进入 `status` 时应清零反应计数的事件类型
    pub fn cleared_by(&self, status: SessionStatus) -> Vec<String> {
        let mut events: Vec<String> = self
            .triggers
            .iter()
            .filter(|t| t.clears_on.contains(&status))
            .map(|t| t.event.clone())
            .collect();
        events.dedup();
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_maps_ci_failed() {
        let table = TriggerTable::default();
        assert_eq!(
            table.events_for(SessionStatus::CiFailed, None),
            vec![event_types::CI_FAILING.to_string()]
        );
        assert_eq!(
            table.transition_event_type(SessionStatus::CiFailed),
            event_types::CI_FAILING
        );
        assert_eq!(table.transition_event_type(SessionStatus::Idle), "session.idle");
        assert!(table.events_for(SessionStatus::Idle, None).is_empty());
    }

    #[test]
    fn test_approved_guards_on_mergeability() {
        let table = TriggerTable::default();
        assert_eq!(
            table.events_for(SessionStatus::Approved, Some(&Mergeability::clean())),
            vec![
                event_types::REVIEW_APPROVED.to_string(),
                event_types::MERGE_READY.to_string()
            ]
        );
        assert_eq!(
            table.events_for(SessionStatus::Approved, Some(&Mergeability::conflicting())),
            vec![
                event_types::REVIEW_APPROVED.to_string(),
                event_types::MERGE_CONFLICTS.to_string()
            ]
        );
        assert_eq!(
            table.events_for(SessionStatus::Approved, None),
            vec![event_types::REVIEW_APPROVED.to_string()]
        );
    }

    #[test]
    fn test_cleared_by() {
        let table = TriggerTable::default();
        assert_eq!(
            table.cleared_by(SessionStatus::Approved),
            vec![
                event_types::CI_FAILING.to_string(),
                event_types::REVIEW_CHANGES_REQUESTED.to_string()
            ]
        );
        assert_eq!(
            table.cleared_by(SessionStatus::Working),
            vec![event_types::SESSION_NEEDS_INPUT.to_string()]
        );
        assert!(table.cleared_by(SessionStatus::CiFailed).is_empty());
    }

    #[test]
    fn test_custom_table_replaces_default() {
        let table = TriggerTable::from_config(&[trigger(SessionStatus::Idle, "custom.idle")]);
        assert_eq!(table.events_for(SessionStatus::Idle, None), vec!["custom.idle".to_string()]);
        assert!(table.events_for(SessionStatus::CiFailed, None).is_empty());
    }
}
