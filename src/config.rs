//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `APIARY__*` 覆盖（双下划线表示嵌套，如 `APIARY__LIFECYCLE__POLL_INTERVAL_SECS=10`）。
//! 反应规则以事件类型字符串为键（如 `[reactions."ci.failing"]`），项目级规则覆盖全局规则。

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::events::EventPriority;
use crate::session::SessionStatus;

/// 应用配置根
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub lifecycle: LifecycleSection,
    pub event_log: EventLogSection,
    pub mailbox: MailboxSection,
    /// 全局默认反应规则
    pub reactions: HashMap<String, ReactionRule>,
    /// 项目表，键为项目 ID
    pub projects: HashMap<String, ProjectConfig>,
}

/// [app] 段
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 数据目录；未设置时用 ~/.apiary（无 HOME 时为 ./.apiary）
    pub data_dir: Option<PathBuf>,
}

/// [lifecycle] 段：轮询节奏与并发
#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleSection {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// 单个会话一次「拉取 + 分类 + 反应」中每个外部调用的超时
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,
    #[serde(default = "default_max_concurrent_sessions")]
    pub max_concurrent_sessions: usize,
    /// idle 超过该时长视为卡住
    #[serde(default = "default_stuck_threshold_secs")]
    pub stuck_threshold_secs: u64,
    /// 状态 → 反应事件映射；为空时使用内置表
    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_session_timeout_secs() -> u64 {
    20
}

fn default_max_concurrent_sessions() -> usize {
    8
}

fn default_stuck_threshold_secs() -> u64 {
    600
}

impl Default for LifecycleSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            session_timeout_secs: default_session_timeout_secs(),
            max_concurrent_sessions: default_max_concurrent_sessions(),
            stuck_threshold_secs: default_stuck_threshold_secs(),
            triggers: Vec::new(),
        }
    }
}

impl LifecycleSection {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs.max(1))
    }

    pub fn stuck_threshold(&self) -> Duration {
        Duration::from_secs(self.stuck_threshold_secs)
    }
}

/// 触发条件的附加守卫（基于合并可行性）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerGuard {
    #[default]
    Always,
    /// 仅当 PR 可合并
    Mergeable,
    /// 仅当 PR 有冲突
    Conflicting,
}

/// [[lifecycle.triggers]]：进入 `status` 时产生 `event`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    pub status: SessionStatus,
    pub event: String,
    #[serde(default)]
    pub guard: TriggerGuard,
    /// 会话进入这些状态时该事件的反应计数清零
    #[serde(default)]
    pub clears_on: Vec<SessionStatus>,
}

/// [event_log] 段
#[derive(Debug, Clone, Deserialize)]
pub struct EventLogSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub path: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl Default for EventLogSection {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

/// [mailbox] 段
#[derive(Debug, Clone, Deserialize)]
pub struct MailboxSection {
    pub base_dir: Option<PathBuf>,
    #[serde(default = "default_ack_poll_interval_ms")]
    pub ack_poll_interval_ms: u64,
    /// processed 归档保留时长（小时）
    #[serde(default = "default_processed_max_age_hours")]
    pub processed_max_age_hours: u64,
}

fn default_ack_poll_interval_ms() -> u64 {
    500
}

fn default_processed_max_age_hours() -> u64 {
    168
}

impl Default for MailboxSection {
    fn default() -> Self {
        Self {
            base_dir: None,
            ack_poll_interval_ms: default_ack_poll_interval_ms(),
            processed_max_age_hours: default_processed_max_age_hours(),
        }
    }
}

/// [projects.<id>] 段
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectConfig {
    pub name: Option<String>,
    /// 仓库标识（如 owner/repo）
    #[serde(default)]
    pub repo: String,
    #[serde(default = "default_branch")]
    pub default_branch: String,
    /// 选用的插件名；未设置时使用注册表默认
    pub scm: Option<String>,
    pub runtime: Option<String>,
    pub notifier: Option<String>,
    #[serde(default)]
    pub reactions: HashMap<String, ReactionRule>,
}

fn default_branch() -> String {
    "main".to_string()
}

impl ProjectConfig {
    pub fn new(repo: impl Into<String>) -> Self {
        Self {
            name: None,
            repo: repo.into(),
            default_branch: default_branch(),
            scm: None,
            runtime: None,
            notifier: None,
            reactions: HashMap::new(),
        }
    }

    pub fn with_reaction(mut self, event_type: &str, rule: ReactionRule) -> Self {
        self.reactions.insert(event_type.to_string(), rule);
        self
    }
}

/// 反应动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReactionKind {
    /// 把指令投递给 Agent
    SendToAgent,
    /// 通知人类
    #[default]
    Notify,
}

/// 升级阈值：尝试次数或时长（"30m"、"45s"、"2h"、"1d"，纯数字按秒）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EscalateAfter {
    Attempts(u32),
    Duration(String),
}

/// 单个事件类型的反应规则（只读配置）
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReactionRule {
    #[serde(default)]
    pub auto: bool,
    #[serde(default)]
    pub action: ReactionKind,
    /// 自动尝试上限，超过后升级为通知；未设置表示不升级
    pub retries: Option<u32>,
    pub escalate_after: Option<EscalateAfter>,
    pub priority: Option<EventPriority>,
    /// 发给 Agent / 人类的文本；未设置时按事件类型生成
    pub message: Option<String>,
    /// 状态持续期间的重发间隔（秒）。未设置时：有 retries / escalate_after 则每个 tick 重发，否则只在状态转换时触发
    pub cooldown_secs: Option<u64>,
}

impl ReactionRule {
    pub fn send_to_agent() -> Self {
        Self {
            auto: true,
            action: ReactionKind::SendToAgent,
            ..Self::default()
        }
    }

    pub fn notify() -> Self {
        Self {
            auto: true,
            action: ReactionKind::Notify,
            ..Self::default()
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn with_escalate_after(mut self, escalate_after: EscalateAfter) -> Self {
        self.escalate_after = Some(escalate_after);
        self
    }

    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_cooldown(mut self, secs: u64) -> Self {
        self.cooldown_secs = Some(secs);
        self
    }
}

/// 解析时长字符串；无法识别时返回 None
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let (digits, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => s.split_at(idx),
        None => (s, "s"),
    };
    let n: u64 = digits.parse().ok()?;
    let secs = match unit.trim() {
        "s" | "sec" | "secs" => n,
        "m" | "min" | "mins" => n.checked_mul(60)?,
        "h" | "hr" | "hrs" => n.checked_mul(3600)?,
        "d" => n.checked_mul(86_400)?,
        _ => return None,
    };
    Some(Duration::from_secs(secs))
}

impl AppConfig {
    /// 数据目录
    pub fn data_dir(&self) -> PathBuf {
        self.app.data_dir.clone().unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(|home| PathBuf::from(home).join(".apiary"))
                .unwrap_or_else(|| PathBuf::from(".apiary"))
        })
    }

    pub fn event_log_path(&self) -> PathBuf {
        self.event_log
            .path
            .clone()
            .unwrap_or_else(|| self.data_dir().join("events.jsonl"))
    }

    pub fn mailbox_dir(&self) -> PathBuf {
        self.mailbox
            .base_dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join("mailbox"))
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir().join("sessions")
    }

    /// 项目生效的反应规则：全局规则 + 项目覆盖（按键整体替换）
    pub fn reactions_for(&self, project_id: &str) -> HashMap<String, ReactionRule> {
        let mut rules = self.reactions.clone();
        if let Some(project) = self.projects.get(project_id) {
            rules.extend(project.reactions.clone());
        }
        rules
    }
}

/// 从 config 目录加载配置，环境变量 APIARY__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、apiary.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 APIARY__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "apiary"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("APIARY")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
