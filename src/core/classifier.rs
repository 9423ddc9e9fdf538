//! 状态分类：外部信号 → 会话状态的纯函数
//!
//! 无 I/O、无副作用；每一种信号组合都恰好映射到一个 `SessionStatus`。

use crate::plugins::{CiCheck, CiStatus, Mergeability, PrState, ReviewComment, ReviewDecision};
use crate::session::{ActivityState, PrInfo, SessionStatus};

/// PR 相关信号
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PrSignals {
    pub state: Option<PrState>,
    pub ci: CiStatus,
    pub review: ReviewDecision,
    pub pending_comments: usize,
    pub mergeability: Mergeability,
}

/// 一次分类的全部输入
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Signals {
    pub process_alive: bool,
    pub activity: ActivityState,
    pub pr: Option<PrSignals>,
}

impl Signals {
    pub fn no_pr(process_alive: bool, activity: ActivityState) -> Self {
        Self {
            process_alive,
            activity,
            pr: None,
        }
    }

    pub fn with_pr(state: PrState, ci: CiStatus, review: ReviewDecision) -> Self {
        Self {
            process_alive: true,
            activity: ActivityState::Active,
            pr: Some(PrSignals {
                state: Some(state),
                ci,
                review,
                ..PrSignals::default()
            }),
        }
    }
}

/// 拉取到的完整观测：分类用的信号 + 构造 Agent 指令用的细节
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Observation {
    pub signals: Signals,
    pub pr: Option<PrInfo>,
    pub failed_checks: Vec<CiCheck>,
    pub comments: Vec<ReviewComment>,
}

/// 分类。优先级从高到低：
///
/// 1. 无 PR 且进程已退出 → killed
/// 2. PR 已合并 → merged；PR 被关闭 → killed
/// 3. PR 打开：CI 失败 → ci_failed；要求修改 → changes_requested；
///    已批准且 CI 通过（或没有 CI）→ approved；review 待定 → review_pending；
///    有未处理评论 → changes_requested；CI 通过但尚无 review → review_pending；
///    其余 → pr_open
/// 4. 无 PR 且进程存活：按活跃度 → needs_input / idle / working
pub fn classify(signals: &Signals) -> SessionStatus {
    let Some(pr) = &signals.pr else {
        if !signals.process_alive || signals.activity == ActivityState::Exited {
            return SessionStatus::Killed;
        }
        return match signals.activity {
            ActivityState::WaitingInput | ActivityState::Blocked => SessionStatus::NeedsInput,
            ActivityState::Idle | ActivityState::Ready => SessionStatus::Idle,
            _ => SessionStatus::Working,
        };
    };

    match pr.state {
        Some(PrState::Merged) => return SessionStatus::Merged,
        Some(PrState::Closed) => return SessionStatus::Killed,
        Some(PrState::Open) | None => {}
    }

    if pr.ci == CiStatus::Failing {
        return SessionStatus::CiFailed;
    }
    match pr.review {
        ReviewDecision::ChangesRequested => return SessionStatus::ChangesRequested,
        ReviewDecision::Approved if matches!(pr.ci, CiStatus::Passing | CiStatus::None) => {
            return SessionStatus::Approved
        }
        ReviewDecision::Pending => return SessionStatus::ReviewPending,
        _ => {}
    }
    if pr.pending_comments > 0 {
        return SessionStatus::ChangesRequested;
    }
    if pr.ci == CiStatus::Passing {
        return SessionStatus::ReviewPending;
    }
    SessionStatus::PrOpen
}
