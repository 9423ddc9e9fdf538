//! 会话、状态枚举与元数据映射

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 会话 ID
pub type SessionId = String;

/// 会话状态（固定集合，只由分类步骤写入）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Spawning,
    Working,
    Idle,
    NeedsInput,
    PrOpen,
    ReviewPending,
    ChangesRequested,
    CiFailed,
    Approved,
    Merged,
    Killed,
}

impl SessionStatus {
    pub const ALL: [SessionStatus; 11] = [
        SessionStatus::Spawning,
        SessionStatus::Working,
        SessionStatus::Idle,
        SessionStatus::NeedsInput,
        SessionStatus::PrOpen,
        SessionStatus::ReviewPending,
        SessionStatus::ChangesRequested,
        SessionStatus::CiFailed,
        SessionStatus::Approved,
        SessionStatus::Merged,
        SessionStatus::Killed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Spawning => "spawning",
            SessionStatus::Working => "working",
            SessionStatus::Idle => "idle",
            SessionStatus::NeedsInput => "needs_input",
            SessionStatus::PrOpen => "pr_open",
            SessionStatus::ReviewPending => "review_pending",
            SessionStatus::ChangesRequested => "changes_requested",
            SessionStatus::CiFailed => "ci_failed",
            SessionStatus::Approved => "approved",
            SessionStatus::Merged => "merged",
            SessionStatus::Killed => "killed",
        }
    }

    /// 终态：不再轮询，也不再重新分类
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Merged | SessionStatus::Killed)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SessionStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown session status: {s}"))
    }
}

/// Agent 活跃度探测结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityState {
    Active,
    Ready,
    Idle,
    WaitingInput,
    Blocked,
    Exited,
    #[default]
    Unknown,
}

impl ActivityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityState::Active => "active",
            ActivityState::Ready => "ready",
            ActivityState::Idle => "idle",
            ActivityState::WaitingInput => "waiting_input",
            ActivityState::Blocked => "blocked",
            ActivityState::Exited => "exited",
            ActivityState::Unknown => "unknown",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "active" => ActivityState::Active,
            "ready" => ActivityState::Ready,
            "idle" => ActivityState::Idle,
            "waiting_input" => ActivityState::WaitingInput,
            "blocked" => ActivityState::Blocked,
            "exited" => ActivityState::Exited,
            _ => ActivityState::Unknown,
        }
    }
}

impl fmt::Display for ActivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pull Request 引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrInfo {
    pub number: u64,
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    pub branch: String,
    #[serde(default)]
    pub base_branch: Option<String>,
}

/// 运行时句柄（对核心不透明，由 Runtime 插件解释）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeHandle {
    pub id: String,
    pub runtime: String,
}

/// 一个被跟踪的会话
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: SessionId,
    pub project_id: String,
    pub status: SessionStatus,
    pub activity: ActivityState,
    pub branch: Option<String>,
    pub issue_id: Option<String>,
    pub pr: Option<PrInfo>,
    pub workspace_path: Option<PathBuf>,
    pub runtime_handle: Option<RuntimeHandle>,
    /// 扩展字段（其他子系统写入，生命周期管理器原样保留）
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

// 元数据文件中由 Session 自身字段占用的键
const KEY_PROJECT: &str = "project";
const KEY_STATUS: &str = "status";
const KEY_ACTIVITY: &str = "activity";
const KEY_BRANCH: &str = "branch";
const KEY_ISSUE: &str = "issue";
const KEY_PR: &str = "pr";
const KEY_WORKSPACE: &str = "worktree";
const KEY_RUNTIME: &str = "runtime_handle";
const KEY_CREATED: &str = "created_at";
const KEY_LAST_ACTIVITY: &str = "last_activity_at";

const RESERVED_KEYS: [&str; 10] = [
    KEY_PROJECT,
    KEY_STATUS,
    KEY_ACTIVITY,
    KEY_BRANCH,
    KEY_ISSUE,
    KEY_PR,
    KEY_WORKSPACE,
    KEY_RUNTIME,
    KEY_CREATED,
    KEY_LAST_ACTIVITY,
];

impl Session {
    pub fn new(id: impl Into<String>, project_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            project_id: project_id.into(),
            status: SessionStatus::Spawning,
            activity: ActivityState::Unknown,
            branch: None,
            issue_id: None,
            pr: None,
            workspace_path: None,
            runtime_handle: None,
            metadata: HashMap::new(),
            created_at: now,
            last_activity_at: now,
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_issue(mut self, issue_id: impl Into<String>) -> Self {
        self.issue_id = Some(issue_id.into());
        self
    }

    pub fn with_pr(mut self, pr: PrInfo) -> Self {
        self.pr = Some(pr);
        self
    }

    pub fn with_status(mut self, status: SessionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_runtime_handle(mut self, handle: RuntimeHandle) -> Self {
        self.runtime_handle = Some(handle);
        self
    }

    pub fn with_workspace(mut self, path: impl Into<PathBuf>) -> Self {
        self.workspace_path = Some(path.into());
        self
    }

    /// 序列化为 key=value 元数据（值内换行会被替换为空格）
    pub fn to_metadata(&self) -> HashMap<String, String> {
        let mut map: HashMap<String, String> = self
            .metadata
            .iter()
            .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        map.insert(KEY_PROJECT.into(), self.project_id.clone());
        map.insert(KEY_STATUS.into(), self.status.as_str().into());
        map.insert(KEY_ACTIVITY.into(), self.activity.as_str().into());
        map.insert(KEY_CREATED.into(), self.created_at.to_rfc3339());
        map.insert(KEY_LAST_ACTIVITY.into(), self.last_activity_at.to_rfc3339());
        if let Some(branch) = &self.branch {
            map.insert(KEY_BRANCH.into(), branch.clone());
        }
        if let Some(issue) = &self.issue_id {
            map.insert(KEY_ISSUE.into(), issue.clone());
        }
        if let Some(pr) = &self.pr {
            if let Ok(json) = serde_json::to_string(pr) {
                map.insert(KEY_PR.into(), json);
            }
        }
        if let Some(path) = &self.workspace_path {
            map.insert(KEY_WORKSPACE.into(), path.display().to_string());
        }
        if let Some(handle) = &self.runtime_handle {
            if let Ok(json) = serde_json::to_string(handle) {
                map.insert(KEY_RUNTIME.into(), json);
            }
        }
        map
    }

    /// 从元数据恢复；缺少 project 键时返回 None
    pub fn from_metadata(id: &str, map: &HashMap<String, String>) -> Option<Self> {
        let project_id = map.get(KEY_PROJECT)?.clone();
        let parse_time = |key: &str| {
            map.get(key)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc))
        };
        let created_at = parse_time(KEY_CREATED).unwrap_or_else(Utc::now);
        let last_activity_at = parse_time(KEY_LAST_ACTIVITY).unwrap_or(created_at);

        let metadata = map
            .iter()
            .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Some(Self {
            id: id.to_string(),
            project_id,
            status: map
                .get(KEY_STATUS)
                .and_then(|s| s.parse().ok())
                .unwrap_or(SessionStatus::Spawning),
            activity: map
                .get(KEY_ACTIVITY)
                .map(|s| ActivityState::parse(s))
                .unwrap_or_default(),
            branch: map.get(KEY_BRANCH).cloned(),
            issue_id: map.get(KEY_ISSUE).cloned(),
            pr: map.get(KEY_PR).and_then(|s| serde_json::from_str(s).ok()),
            workspace_path: map.get(KEY_WORKSPACE).map(PathBuf::from),
            runtime_handle: map.get(KEY_RUNTIME).and_then(|s| serde_json::from_str(s).ok()),
            metadata,
            created_at,
            last_activity_at,
        })
    }
}
