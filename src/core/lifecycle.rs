//! 生命周期管理器：主控循环
//!
//! 每个 tick：检查各项目默认分支 → 对每个非终态会话并发执行「拉取信号 → 分类 → 比对 → 记录 → 反应」
//! → 汇总全部完成的项目。整个 tick 持有循环状态锁，相邻 tick 不会重叠；
//! 会话之间相互独立，任何一个会话的连接器错误、超时或投递失败都不影响其他会话。

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;

use crate::config::{LifecycleSection, ProjectConfig, ReactionKind, ReactionRule};
use crate::core::branch_tracker::{BranchAdvance, BranchTarget, BranchTracker};
use crate::core::classifier::{classify, Observation, PrSignals, Signals};
use crate::core::dispatch::{build_message, nudge_text};
use crate::core::reaction::{
    reset_counters, Firing, Reaction, ReactionCounters, ReactionEngine, SessionCounters,
};
use crate::core::shutdown::{MailboxPurgeCleanup, ShutdownCoordinator, ShutdownManager};
use crate::core::triggers::TriggerTable;
use crate::events::{event_types, EventLog, OrchestratorEvent};
use crate::mailbox::Mailbox;
use crate::plugins::{CiStatus, PluginError, ProjectPlugins};
use crate::session::{ActivityState, Session, SessionId, SessionStatus};
use crate::storage::MetadataStore;

/// 一个项目的运行期上下文（启动时确定，之后只读）
#[derive(Clone)]
pub struct ProjectContext {
    pub id: String,
    pub config: ProjectConfig,
    pub plugins: ProjectPlugins,
    /// 全局规则与项目覆盖合并后的结果
    pub rules: HashMap<String, ReactionRule>,
}

/// 一次 tick 的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub sessions_checked: usize,
    pub transitions: usize,
    pub reactions: usize,
    pub escalations: usize,
    pub delivery_failures: usize,
    pub timeouts: usize,
    pub errors: usize,
    pub branch_advances: usize,
}

/// 只由主控循环修改的状态
#[derive(Default)]
struct LoopState {
    sessions: BTreeMap<SessionId, Session>,
    counters: ReactionCounters,
    branches: BranchTracker,
    stuck_reported: HashSet<SessionId>,
    all_complete_reported: HashSet<String>,
}

/// 单个会话一次 tick 的工作单元（独占自己的计数）
struct SessionUnit {
    session: Session,
    counters: SessionCounters,
    stuck_reported: bool,
    branch_advance: Option<BranchAdvance>,
}

/// 工作单元的产出，tick 末尾写回循环状态
struct UnitOutcome {
    session: Session,
    counters: SessionCounters,
    stuck_reported: bool,
    transitioned: bool,
    reactions: usize,
    escalations: usize,
    delivery_failures: usize,
    timed_out: bool,
    errored: bool,
}

impl UnitOutcome {
    fn from_unit(unit: SessionUnit) -> Self {
        Self {
            session: unit.session,
            counters: unit.counters,
            stuck_reported: unit.stuck_reported,
            transitioned: false,
            reactions: 0,
            escalations: 0,
            delivery_failures: 0,
            timed_out: false,
            errored: false,
        }
    }
}

/// 生命周期管理器
pub struct LifecycleManager {
    settings: LifecycleSection,
    projects: BTreeMap<String, ProjectContext>,
    triggers: TriggerTable,
    engine: ReactionEngine,
    event_log: Arc<dyn EventLog>,
    store: Arc<dyn MetadataStore>,
    mailbox: Mailbox,
    state: Mutex<LoopState>,
}

impl LifecycleManager {
    pub fn new(
        settings: LifecycleSection,
        projects: Vec<ProjectContext>,
        event_log: Arc<dyn EventLog>,
        store: Arc<dyn MetadataStore>,
        mailbox: Mailbox,
    ) -> Self {
        let triggers = TriggerTable::from_config(&settings.triggers);
        Self {
            settings,
            projects: projects.into_iter().map(|p| (p.id.clone(), p)).collect(),
            triggers,
            engine: ReactionEngine::new(),
            event_log,
            store,
            mailbox,
            state: Mutex::new(LoopState::default()),
        }
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn event_log(&self) -> &Arc<dyn EventLog> {
        &self.event_log
    }

    pub fn project_ids(&self) -> Vec<String> {
        self.projects.keys().cloned().collect()
    }

    /// 从元数据存储加载会话；返回加载数量。无法解析的条目跳过
    pub async fn load_sessions(&self) -> usize {
        let ids = match self.store.list().await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!("Failed to list session metadata: {}", e);
                return 0;
            }
        };

        let mut state = self.state.lock().await;
        let mut loaded = 0;
        for id in ids {
            match self.store.read(&id).await {
                Ok(Some(map)) => match Session::from_metadata(&id, &map) {
                    Some(session) => {
                        state.sessions.insert(id, session);
                        loaded += 1;
                    }
                    None => tracing::warn!(session = %id, "Skipping session metadata without project"),
                },
                Ok(None) => {}
                Err(e) => tracing::warn!(session = %id, "Failed to read session metadata: {}", e),
            }
        }
        tracing::info!("Loaded {} sessions from metadata store", loaded);
        loaded
    }

    /// 开始跟踪一个会话并持久化
    pub async fn track(&self, session: Session) -> Result<(), crate::core::error::StorageError> {
        self.store.write(&session.id, &session.to_metadata()).await?;
        tracing::info!(session = %session.id, project = %session.project_id, "Tracking session");
        self.state.lock().await.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    /// 停止跟踪并归档元数据
    pub async fn untrack(&self, session_id: &str) -> Result<Option<Session>, crate::core::error::StorageError> {
        let removed = {
            let mut state = self.state.lock().await;
            state.counters.remove(session_id);
            state.stuck_reported.remove(session_id);
            state.sessions.remove(session_id)
        };
        if removed.is_some() {
            self.store.delete(session_id).await?;
            tracing::info!(session = session_id, "Untracked session");
        }
        Ok(removed)
    }

    /// 当前跟踪的会话快照（按 ID 排序）
    pub async fn sessions(&self) -> Vec<Session> {
        self.state.lock().await.sessions.values().cloned().collect()
    }

    pub async fn session(&self, session_id: &str) -> Option<Session> {
        self.state.lock().await.sessions.get(session_id).cloned()
    }

    /// 按 tick 间隔运行，直到收到关闭信号；进行中的 tick 会先完成
    pub async fn run(&self, shutdown: &ShutdownManager) {
        let mut interval = tokio::time::interval(self.settings.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let token = shutdown.token();

        tracing::info!(
            "Lifecycle loop started: {} projects, poll interval {}s",
            self.projects.len(),
            self.settings.poll_interval().as_secs()
        );

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    let report = self.tick().await;
                    tracing::debug!(?report, "Tick finished");
                }
            }
        }

        tracing::info!("Lifecycle loop stopped");
    }

    /// 服务入口：加载会话 → 循环到关闭 → 清理过期的已处理消息
    pub async fn serve(&self, shutdown: Arc<ShutdownManager>, processed_max_age: Duration) {
        let mut reasons = shutdown.subscribe();
        self.load_sessions().await;
        self.run(&shutdown).await;

        if let Ok(reason) = reasons.try_recv() {
            tracing::info!(?reason, "Shutting down");
        }

        let mut mailboxes = vec![self.mailbox.clone()];
        mailboxes.extend(
            self.sessions()
                .await
                .into_iter()
                .map(|session| self.mailbox.for_owner(session.id)),
        );
        let mut coordinator = ShutdownCoordinator::new();
        coordinator.register(MailboxPurgeCleanup::new(mailboxes, processed_max_age));
        coordinator.run_cleanup().await;
    }

    /// 执行一次完整的 tick
    pub async fn tick(&self) -> TickReport {
        let mut state = self.state.lock().await;
        let mut report = TickReport::default();
        tracing::debug!(sessions = state.sessions.len(), "Tick started");

        // 分类前先看分支推进，推进信息随工作单元下发；各项目并发拉取，各自受超时约束
        let targets: Vec<BranchTarget<'_>> = self
            .projects
            .iter()
            .map(|(project_id, project)| BranchTarget {
                project_id,
                repo: &project.config.repo,
                branch: &project.config.default_branch,
                scm: project.plugins.scm.as_ref(),
            })
            .collect();
        let checked = state
            .branches
            .check_all(&targets, self.settings.session_timeout())
            .await;

        let mut advances: HashMap<String, BranchAdvance> = HashMap::new();
        for (project_id, advance) in checked {
            if !advance.advanced {
                continue;
            }
            let Some(project) = self.projects.get(&project_id) else {
                continue;
            };
            report.branch_advances += 1;
            tracing::info!(
                project = %project_id,
                old = ?advance.old_sha,
                new = ?advance.new_sha,
                "Default branch advanced"
            );
            let event = OrchestratorEvent::for_project(
                event_types::BRANCH_ADVANCED,
                project_id.clone(),
                format!("{} advanced on {}", project.config.default_branch, project.config.repo),
            )
            .with_data("oldSha", advance.old_sha.clone())
            .with_data("newSha", advance.new_sha.clone());
            self.record(&event).await;
            advances.insert(project_id, advance);
        }

        let ids: Vec<SessionId> = state
            .sessions
            .iter()
            .filter(|(_, s)| !s.status.is_terminal())
            .filter(|(_, s)| {
                let known = self.projects.contains_key(&s.project_id);
                if !known {
                    tracing::warn!(session = %s.id, project = %s.project_id, "Session belongs to unknown project");
                }
                known
            })
            .map(|(id, _)| id.clone())
            .collect();

        let mut units = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(session) = state.sessions.get(&id).cloned() else {
                continue;
            };
            units.push(SessionUnit {
                counters: state.counters.take(&id),
                stuck_reported: state.stuck_reported.contains(&id),
                branch_advance: advances.get(&session.project_id).cloned(),
                session,
            });
        }
        report.sessions_checked = units.len();

        let outcomes: Vec<UnitOutcome> = futures_util::stream::iter(units)
            .map(|unit| self.process_session(unit))
            .buffer_unordered(self.settings.max_concurrent_sessions.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            let id = outcome.session.id.clone();
            report.transitions += usize::from(outcome.transitioned);
            report.reactions += outcome.reactions;
            report.escalations += outcome.escalations;
            report.delivery_failures += outcome.delivery_failures;
            report.timeouts += usize::from(outcome.timed_out);
            report.errors += usize::from(outcome.errored);

            state.counters.restore(&id, outcome.counters);
            if outcome.stuck_reported {
                state.stuck_reported.insert(id.clone());
            } else {
                state.stuck_reported.remove(&id);
            }
            state.sessions.insert(id, outcome.session);
        }

        self.check_all_complete(&mut state, &mut report).await;

        tracing::debug!(
            checked = report.sessions_checked,
            transitions = report.transitions,
            reactions = report.reactions,
            "Tick complete"
        );
        report
    }

    /// 单个会话的完整处理；永不失败
    async fn process_session(&self, unit: SessionUnit) -> UnitOutcome {
        let branch_advance = unit.branch_advance.clone();
        let mut out = UnitOutcome::from_unit(unit);
        let Some(project) = self.projects.get(&out.session.project_id) else {
            return out;
        };

        let timeout = self.settings.session_timeout();
        let observation = match tokio::time::timeout(timeout, self.observe(&out.session, project)).await {
            Ok(Ok(observation)) => observation,
            Ok(Err(e)) => {
                tracing::warn!(session = %out.session.id, "Connector error, no new information this tick: {}", e);
                out.errored = true;
                return out;
            }
            Err(_) => {
                tracing::warn!(
                    session = %out.session.id,
                    "Signal fetch timed out after {}s, retrying next tick",
                    timeout.as_secs()
                );
                out.timed_out = true;
                return out;
            }
        };

        let now = Utc::now();
        let mut dirty = false;

        let activity = observation.signals.activity;
        if activity != out.session.activity {
            out.session.activity = activity;
            dirty = true;
        }
        if activity == ActivityState::Active {
            out.session.last_activity_at = now;
            dirty = true;
        }
        if observation.pr.is_some() && observation.pr != out.session.pr {
            out.session.pr = observation.pr.clone();
            dirty = true;
        }

        let old_status = out.session.status;
        let new_status = classify(&observation.signals);
        let mergeability = observation.signals.pr.as_ref().map(|p| &p.mergeability);
        let triggered = self.triggers.events_for(new_status, mergeability);

        if new_status != old_status {
            out.transitioned = true;
            out.session.status = new_status;
            out.session.last_activity_at = now;
            out.stuck_reported = false;
            dirty = true;

            tracing::info!(session = %out.session.id, from = %old_status, to = %new_status, "Status transition");
            let event = OrchestratorEvent::new(
                self.triggers.transition_event_type(new_status),
                out.session.id.clone(),
                out.session.project_id.clone(),
                format!("{}: {} -> {}", out.session.id, old_status, new_status),
            )
            .with_data("oldStatus", old_status.as_str())
            .with_data("newStatus", new_status.as_str());
            self.record(&event).await;
        }

        // 状态先落盘，再反应
        if dirty {
            self.persist(&out.session).await;
        }

        if out.transitioned {
            let mut cleared = self.triggers.cleared_by(new_status);
            cleared.push(event_types::SESSION_STUCK.to_string());
            reset_counters(&mut out.counters, &cleared);
        }
        let firing = if out.transitioned {
            Firing::Transition
        } else {
            Firing::Persisting
        };
        for event_type in &triggered {
            self.react(project, &observation, &mut out, event_type, firing, None)
                .await;
        }

        if new_status == SessionStatus::Idle && !out.stuck_reported {
            let idle_for = now - out.session.last_activity_at;
            let threshold = self.settings.stuck_threshold();
            if idle_for.to_std().map(|d| d >= threshold).unwrap_or(threshold.is_zero()) {
                out.stuck_reported = true;
                let event = OrchestratorEvent::new(
                    event_types::SESSION_STUCK,
                    out.session.id.clone(),
                    out.session.project_id.clone(),
                    format!("{} idle for {}s", out.session.id, idle_for.num_seconds()),
                )
                .with_data("idleSecs", idle_for.num_seconds());
                self.record(&event).await;
                self.react(project, &observation, &mut out, event_types::SESSION_STUCK, Firing::Transition, None)
                    .await;
            }
        }

        if let Some(advance) = branch_advance {
            if !out.session.status.is_terminal() {
                // 每次推进都是新的一次状况
                reset_counters(&mut out.counters, &[event_types::BRANCH_ADVANCED.to_string()]);
                let extra = json!({ "oldSha": advance.old_sha, "newSha": advance.new_sha });
                self.react(
                    project,
                    &observation,
                    &mut out,
                    event_types::BRANCH_ADVANCED,
                    Firing::Transition,
                    Some(&extra),
                )
                .await;
            }
        }

        out
    }

    /// 拉取一个会话的全部外部信号；任何 SCM 调用失败都视为本 tick 无新信息
    async fn observe(&self, session: &Session, project: &ProjectContext) -> Result<Observation, PluginError> {
        let (process_alive, activity) = self.probe_runtime(session, project).await;
        let scm = &project.plugins.scm;

        let pr = match scm.detect_pr(session, &project.config).await? {
            Some(pr) => Some(pr),
            None => session.pr.clone(),
        };
        let Some(pr) = pr else {
            return Ok(Observation {
                signals: Signals::no_pr(process_alive, activity),
                ..Observation::default()
            });
        };

        let (state, ci, review, comments, mergeability) = tokio::try_join!(
            scm.get_pr_state(&pr),
            scm.get_ci_summary(&pr),
            scm.get_review_decision(&pr),
            scm.get_pending_comments(&pr),
            scm.get_mergeability(&pr),
        )?;

        let failed_checks = if ci == CiStatus::Failing {
            match scm.get_ci_checks(&pr).await {
                Ok(checks) => checks
                    .into_iter()
                    .filter(|c| c.status == CiStatus::Failing)
                    .collect(),
                Err(e) => {
                    tracing::debug!(session = %session.id, "Failed to fetch CI checks: {}", e);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        Ok(Observation {
            signals: Signals {
                process_alive,
                activity,
                pr: Some(PrSignals {
                    state: Some(state),
                    ci,
                    review,
                    pending_comments: comments.len(),
                    mergeability,
                }),
            },
            pr: Some(pr),
            failed_checks,
            comments,
        })
    }

    /// 存活与活跃度；没有运行时或句柄时视为存活，探测失败沿用上次的活跃度
    async fn probe_runtime(&self, session: &Session, project: &ProjectContext) -> (bool, ActivityState) {
        let Some(runtime) = &project.plugins.runtime else {
            return (true, session.activity);
        };

        let alive = match &session.runtime_handle {
            Some(handle) => match runtime.is_alive(handle).await {
                Ok(alive) => alive,
                Err(e) => {
                    tracing::warn!(session = %session.id, "Liveness probe failed: {}", e);
                    true
                }
            },
            None => true,
        };

        let activity = match runtime.detect_activity(session).await {
            Ok(activity) => activity,
            Err(e) => {
                tracing::debug!(session = %session.id, "Activity probe failed: {}", e);
                session.activity
            }
        };
        (alive, activity)
    }

    /// 询问反应引擎并执行决定
    async fn react(
        &self,
        project: &ProjectContext,
        observation: &Observation,
        out: &mut UnitOutcome,
        event_type: &str,
        firing: Firing,
        extra: Option<&Value>,
    ) {
        let Some(reaction) =
            self.engine
                .decide(&project.rules, event_type, &mut out.counters, firing, Utc::now())
        else {
            return;
        };

        out.reactions += 1;
        let decision_type = if reaction.escalated {
            out.escalations += 1;
            tracing::warn!(
                session = %out.session.id,
                event = event_type,
                attempt = reaction.attempt,
                "Reaction escalated to human"
            );
            event_types::REACTION_ESCALATED
        } else {
            tracing::info!(
                session = %out.session.id,
                event = event_type,
                attempt = reaction.attempt,
                action = ?reaction.kind,
                "Reaction triggered"
            );
            event_types::REACTION_TRIGGERED
        };
        let decision = OrchestratorEvent::new(
            decision_type,
            out.session.id.clone(),
            out.session.project_id.clone(),
            format!("{} for {} (attempt {})", event_type, out.session.id, reaction.attempt),
        )
        .with_priority(reaction.priority)
        .with_data("event", event_type)
        .with_data("action", action_name(reaction.kind))
        .with_data("attempt", reaction.attempt);
        self.record(&decision).await;

        match reaction.kind {
            ReactionKind::SendToAgent => {
                self.deliver(project, observation, out, &reaction, extra).await
            }
            ReactionKind::Notify => self.notify(project, &out.session, &reaction).await,
        }
    }

    /// 投递到会话信箱，然后尽力提醒会话查看信箱
    async fn deliver(
        &self,
        project: &ProjectContext,
        observation: &Observation,
        out: &mut UnitOutcome,
        reaction: &Reaction,
        extra: Option<&Value>,
    ) {
        let message = build_message(reaction, &out.session, observation, extra);
        let timeout = self.settings.session_timeout();
        let result = match tokio::time::timeout(timeout, self.mailbox.send(&out.session.id, message)).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err(format!("mailbox write timed out after {}s", timeout.as_secs())),
        };
        let sent = match result {
            Ok(sent) => sent,
            Err(e) => {
                tracing::warn!(session = %out.session.id, event = %reaction.event_type, "Reaction delivery failed: {}", e);
                out.delivery_failures += 1;
                if let Some(counter) = out.counters.get_mut(&reaction.event_type) {
                    counter.delivery_failures += 1;
                }
                let event = OrchestratorEvent::new(
                    event_types::REACTION_DELIVERY_FAILED,
                    out.session.id.clone(),
                    out.session.project_id.clone(),
                    format!("Could not deliver {} to {}: {}", reaction.event_type, out.session.id, e),
                )
                .with_data("event", reaction.event_type.as_str());
                self.record(&event).await;
                return;
            }
        };

        let (Some(runtime), Some(handle)) = (&project.plugins.runtime, &out.session.runtime_handle) else {
            return;
        };
        let text = nudge_text(&sent);
        match tokio::time::timeout(self.settings.session_timeout(), runtime.send_message(handle, &text)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(session = %out.session.id, "Runtime nudge failed, message stays in inbox: {}", e)
            }
            Err(_) => tracing::warn!(session = %out.session.id, "Runtime nudge timed out"),
        }
    }

    async fn notify(&self, project: &ProjectContext, session: &Session, reaction: &Reaction) {
        let text = match (&reaction.message, reaction.escalated) {
            (Some(message), false) => message.clone(),
            (_, true) => format!(
                "Escalated: {} on session {} persisted after {} attempt(s)",
                reaction.event_type, session.id, reaction.attempt
            ),
            (None, false) => format!("{} on session {}", reaction.event_type, session.id),
        };
        let event = OrchestratorEvent::new(
            reaction.event_type.clone(),
            session.id.clone(),
            session.project_id.clone(),
            text,
        )
        .with_priority(reaction.priority)
        .with_data("attempt", reaction.attempt)
        .with_data("escalated", reaction.escalated);
        self.send_notification(project, &event).await;
    }

    async fn send_notification(&self, project: &ProjectContext, event: &OrchestratorEvent) {
        let notifier = &project.plugins.notifier;
        match tokio::time::timeout(self.settings.session_timeout(), notifier.notify(event)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(notifier = notifier.name(), "Notification failed: {}", e),
            Err(_) => tracing::warn!(notifier = notifier.name(), "Notification timed out"),
        }
    }

    /// 项目下所有会话都到达终态时记录一次汇总事件
    async fn check_all_complete(&self, state: &mut LoopState, report: &mut TickReport) {
        let mut by_project: BTreeMap<&str, (usize, bool)> = BTreeMap::new();
        for session in state.sessions.values() {
            let entry = by_project.entry(session.project_id.as_str()).or_insert((0, true));
            entry.0 += 1;
            entry.1 &= session.status.is_terminal();
        }

        let mut newly_complete = Vec::new();
        for (project_id, (count, all_terminal)) in by_project {
            if !all_terminal {
                state.all_complete_reported.remove(project_id);
            } else if !state.all_complete_reported.contains(project_id) {
                newly_complete.push((project_id.to_string(), count));
            }
        }

        for (project_id, count) in newly_complete {
            state.all_complete_reported.insert(project_id.clone());
            tracing::info!(project = %project_id, sessions = count, "All sessions complete");
            let event = OrchestratorEvent::for_project(
                event_types::SUMMARY_ALL_COMPLETE,
                project_id.clone(),
                format!("All {count} session(s) of {project_id} are complete"),
            )
            .with_data("sessions", count);
            self.record(&event).await;

            let Some(project) = self.projects.get(&project_id) else {
                continue;
            };
            let key = format!("project:{project_id}");
            if let Some(reaction) = state.counters.decide_for(
                &self.engine,
                &key,
                &project.rules,
                event_types::SUMMARY_ALL_COMPLETE,
                Firing::Transition,
                Utc::now(),
            ) {
                report.reactions += 1;
                // 没有可投递的会话，一律通知
                self.send_notification(project, &event.clone().with_priority(reaction.priority))
                    .await;
            }
            state.counters.remove(&key);
        }
    }

    /// 追加事件；失败或超时只记录日志
    async fn record(&self, event: &OrchestratorEvent) {
        match tokio::time::timeout(self.settings.session_timeout(), self.event_log.append(event)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(event = %event.event_type, "Failed to append event log: {}", e),
            Err(_) => tracing::warn!(event = %event.event_type, "Event log append timed out"),
        }
    }

    /// 持久化会话状态；失败或超时只记录日志，下个 tick 会再次写入
    async fn persist(&self, session: &Session) {
        let metadata = session.to_metadata();
        let write = self.store.write(&session.id, &metadata);
        match tokio::time::timeout(self.settings.session_timeout(), write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(session = %session.id, "Failed to persist session metadata: {}", e),
            Err(_) => tracing::warn!(session = %session.id, "Persisting session metadata timed out"),
        }
    }
}

fn action_name(kind: ReactionKind) -> &'static str {
    match kind {
        ReactionKind::SendToAgent => "send-to-agent",
        ReactionKind::Notify => "notify",
    }
}
