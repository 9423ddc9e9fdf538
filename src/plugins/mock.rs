//! Mock 插件（用于测试与本地演示，无需外部服务）
//!
//! 所有外部信号都可以在运行中修改，便于逐 tick 驱动生命周期场景。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::config::ProjectConfig;
use crate::events::OrchestratorEvent;
use crate::plugins::{
    CiCheck, CiStatus, Mergeability, Notifier, PluginError, PrState, ReviewComment,
    ReviewDecision, Runtime, Scm,
};
use crate::session::{ActivityState, PrInfo, RuntimeHandle, Session};

/// 一个可编排的 PR 快照
#[derive(Debug, Clone, PartialEq)]
pub struct MockPr {
    pub info: PrInfo,
    pub state: PrState,
    pub ci: CiStatus,
    pub checks: Vec<CiCheck>,
    pub review: ReviewDecision,
    pub comments: Vec<ReviewComment>,
    pub mergeability: Mergeability,
}

impl MockPr {
    pub fn open(number: u64, branch: impl Into<String>) -> Self {
        Self {
            info: PrInfo {
                number,
                url: format!("https://example.test/pull/{number}"),
                title: None,
                branch: branch.into(),
                base_branch: Some("main".to_string()),
            },
            state: PrState::Open,
            ci: CiStatus::None,
            checks: Vec::new(),
            review: ReviewDecision::None,
            comments: Vec::new(),
            mergeability: Mergeability::default(),
        }
    }

    pub fn with_state(mut self, state: PrState) -> Self {
        self.state = state;
        self
    }

    pub fn with_ci(mut self, ci: CiStatus) -> Self {
        self.ci = ci;
        self
    }

    pub fn with_checks(mut self, checks: Vec<CiCheck>) -> Self {
        self.checks = checks;
        self
    }

    pub fn with_review(mut self, review: ReviewDecision) -> Self {
        self.review = review;
        self
    }

    pub fn with_comments(mut self, comments: Vec<ReviewComment>) -> Self {
        self.comments = comments;
        self
    }

    pub fn with_mergeability(mut self, mergeability: Mergeability) -> Self {
        self.mergeability = mergeability;
        self
    }
}

/// Mock SCM：按会话 ID 返回预设 PR，按 repo/branch 返回预设 SHA
#[derive(Debug)]
pub struct MockScm {
    name: String,
    prs: Mutex<HashMap<String, MockPr>>,
    shas: Mutex<HashMap<String, String>>,
    failing_sessions: Mutex<HashSet<String>>,
    fail_branch_sha: AtomicBool,
    delay: Mutex<Option<Duration>>,
    session_delays: Mutex<HashMap<String, Duration>>,
    branch_delay: Mutex<Option<Duration>>,
    detect_calls: AtomicUsize,
}

impl Default for MockScm {
    fn default() -> Self {
        Self::new()
    }
}

fn sha_key(repo: &str, branch: &str) -> String {
    format!("{repo}@{branch}")
}

impl MockScm {
    pub fn new() -> Self {
        Self::named("mock")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prs: Mutex::new(HashMap::new()),
            shas: Mutex::new(HashMap::new()),
            failing_sessions: Mutex::new(HashSet::new()),
            fail_branch_sha: AtomicBool::new(false),
            delay: Mutex::new(None),
            session_delays: Mutex::new(HashMap::new()),
            branch_delay: Mutex::new(None),
            detect_calls: AtomicUsize::new(0),
        }
    }

    pub async fn set_pr(&self, session_id: &str, pr: MockPr) {
        self.prs.lock().await.insert(session_id.to_string(), pr);
    }

    /// 原地修改某会话的 PR；会话没有 PR 时不做任何事
    pub async fn update_pr<F>(&self, session_id: &str, f: F)
    where
        F: FnOnce(&mut MockPr),
    {
        if let Some(pr) = self.prs.lock().await.get_mut(session_id) {
            f(pr);
        }
    }

    pub async fn clear_pr(&self, session_id: &str) {
        self.prs.lock().await.remove(session_id);
    }

    /// 让该会话的所有 SCM 调用失败
    pub async fn fail_session(&self, session_id: &str, fail: bool) {
        let mut failing = self.failing_sessions.lock().await;
        if fail {
            failing.insert(session_id.to_string());
        } else {
            failing.remove(session_id);
        }
    }

    pub async fn set_branch_sha(&self, repo: &str, branch: &str, sha: &str) {
        self.shas
            .lock()
            .await
            .insert(sha_key(repo, branch), sha.to_string());
    }

    pub fn fail_branch_sha(&self, fail: bool) {
        self.fail_branch_sha.store(fail, Ordering::SeqCst);
    }

    /// 每次 detect_pr 前的人为延迟（模拟无响应的连接器）
    pub async fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().await = delay;
    }

    /// 只对某个会话的 detect_pr 生效的延迟；None 表示取消
    pub async fn set_session_delay(&self, session_id: &str, delay: Option<Duration>) {
        let mut delays = self.session_delays.lock().await;
        match delay {
            Some(delay) => delays.insert(session_id.to_string(), delay),
            None => delays.remove(session_id),
        };
    }

    /// 每次 get_branch_sha 前的人为延迟
    pub async fn set_branch_delay(&self, delay: Option<Duration>) {
        *self.branch_delay.lock().await = delay;
    }

    pub fn detect_calls(&self) -> usize {
        self.detect_calls.load(Ordering::SeqCst)
    }

    async fn find(&self, pr: &PrInfo) -> Result<MockPr, PluginError> {
        let prs = self.prs.lock().await;
        let (session_id, found) = prs
            .iter()
            .find(|(_, p)| p.info.number == pr.number)
            .ok_or_else(|| PluginError::ExecutionFailed(format!("unknown PR #{}", pr.number)))?;
        if self.failing_sessions.lock().await.contains(session_id) {
            return Err(PluginError::ExecutionFailed(format!(
                "connector error for PR #{}",
                pr.number
            )));
        }
        Ok(found.clone())
    }
}

#[async_trait]
impl Scm for MockScm {
    fn name(&self) -> &str {
        &self.name
    }

    async fn detect_pr(
        &self,
        session: &Session,
        _project: &ProjectConfig,
    ) -> Result<Option<PrInfo>, PluginError> {
        self.detect_calls.fetch_add(1, Ordering::SeqCst);
        let session_delay = self.session_delays.lock().await.get(&session.id).copied();
        let delay = match session_delay {
            Some(delay) => Some(delay),
            None => *self.delay.lock().await,
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_sessions.lock().await.contains(&session.id) {
            return Err(PluginError::ExecutionFailed(format!(
                "connector error for session {}",
                session.id
            )));
        }
        Ok(self
            .prs
            .lock()
            .await
            .get(&session.id)
            .map(|pr| pr.info.clone()))
    }

    async fn get_pr_state(&self, pr: &PrInfo) -> Result<PrState, PluginError> {
        Ok(self.find(pr).await?.state)
    }

    async fn get_ci_summary(&self, pr: &PrInfo) -> Result<CiStatus, PluginError> {
        Ok(self.find(pr).await?.ci)
    }

    async fn get_ci_checks(&self, pr: &PrInfo) -> Result<Vec<CiCheck>, PluginError> {
        Ok(self.find(pr).await?.checks)
    }

    async fn get_review_decision(&self, pr: &PrInfo) -> Result<ReviewDecision, PluginError> {
        Ok(self.find(pr).await?.review)
    }

    async fn get_pending_comments(&self, pr: &PrInfo) -> Result<Vec<ReviewComment>, PluginError> {
        Ok(self.find(pr).await?.comments)
    }

    async fn get_mergeability(&self, pr: &PrInfo) -> Result<Mergeability, PluginError> {
        Ok(self.find(pr).await?.mergeability)
    }

    async fn get_branch_sha(&self, repo: &str, branch: &str) -> Result<String, PluginError> {
        let delay = *self.branch_delay.lock().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_branch_sha.load(Ordering::SeqCst) {
            return Err(PluginError::ExecutionFailed(format!(
                "cannot resolve {repo}@{branch}"
            )));
        }
        self.shas
            .lock()
            .await
            .get(&sha_key(repo, branch))
            .cloned()
            .ok_or_else(|| PluginError::NotFound(sha_key(repo, branch)))
    }
}

/// Mock 运行时：默认所有会话存活且活跃，记录收到的文本
#[derive(Debug, Default)]
pub struct MockRuntime {
    dead: Mutex<HashSet<String>>,
    activity: Mutex<HashMap<String, ActivityState>>,
    sent: Mutex<Vec<(String, String)>>,
    fail_send: AtomicBool,
    fail_activity: AtomicBool,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_alive(&self, handle_id: &str, alive: bool) {
        let mut dead = self.dead.lock().await;
        if alive {
            dead.remove(handle_id);
        } else {
            dead.insert(handle_id.to_string());
        }
    }

    pub async fn set_activity(&self, session_id: &str, activity: ActivityState) {
        self.activity
            .lock()
            .await
            .insert(session_id.to_string(), activity);
    }

    pub fn fail_send(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }

    pub fn fail_activity(&self, fail: bool) {
        self.fail_activity.store(fail, Ordering::SeqCst);
    }

    /// 已发送的 (handle id, 文本)
    pub async fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Runtime for MockRuntime {
    fn name(&self) -> &str {
        "mock"
    }

    async fn is_alive(&self, handle: &RuntimeHandle) -> Result<bool, PluginError> {
        Ok(!self.dead.lock().await.contains(&handle.id))
    }

    async fn detect_activity(&self, session: &Session) -> Result<ActivityState, PluginError> {
        if self.fail_activity.load(Ordering::SeqCst) {
            return Err(PluginError::ExecutionFailed("activity probe failed".into()));
        }
        Ok(self
            .activity
            .lock()
            .await
            .get(&session.id)
            .copied()
            .unwrap_or(ActivityState::Active))
    }

    async fn send_message(&self, handle: &RuntimeHandle, text: &str) -> Result<(), PluginError> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(PluginError::ExecutionFailed(format!(
                "runtime {} unreachable",
                handle.id
            )));
        }
        self.sent
            .lock()
            .await
            .push((handle.id.clone(), text.to_string()));
        Ok(())
    }
}

/// 记录所有通知的通知器
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<OrchestratorEvent>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub async fn events(&self) -> Vec<OrchestratorEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    async fn notify(&self, event: &OrchestratorEvent) -> Result<(), PluginError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PluginError::ExecutionFailed("notifier offline".into()));
        }
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}
