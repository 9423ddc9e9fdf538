//! Plugin 系统：外部协作方的能力接口
//!
//! 核心只依赖这里的 trait，具体实现按名字注册到 `PluginRegistry`，每个项目启动时选定一套。
//!
//! 插件类型：
//! - Scm：PR / CI / Review / 分支 SHA 查询
//! - Runtime：会话进程存活、活跃度探测、向会话发送文本
//! - Notifier：通知人类（尽力而为）

pub mod mock;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ProjectConfig;
use crate::events::OrchestratorEvent;
use crate::session::{ActivityState, PrInfo, RuntimeHandle, Session};

pub use types::{CiCheck, CiStatus, Mergeability, PrState, ReviewComment, ReviewDecision};

/// 源码托管能力接口；每个调用都可能独立失败，调用方不得因此中断
#[async_trait]
pub trait Scm: Send + Sync {
    fn name(&self) -> &str;

    /// 查找会话分支对应的 PR；还没有 PR 时返回 None
    async fn detect_pr(
        &self,
        session: &Session,
        project: &ProjectConfig,
    ) -> Result<Option<PrInfo>, PluginError>;

    async fn get_pr_state(&self, pr: &PrInfo) -> Result<PrState, PluginError>;

    async fn get_ci_summary(&self, pr: &PrInfo) -> Result<CiStatus, PluginError>;

    /// 单项检查明细（用于给 Agent 的修复指令），默认不提供
    async fn get_ci_checks(&self, _pr: &PrInfo) -> Result<Vec<CiCheck>, PluginError> {
        Ok(Vec::new())
    }

    async fn get_review_decision(&self, pr: &PrInfo) -> Result<ReviewDecision, PluginError>;

    async fn get_pending_comments(&self, pr: &PrInfo) -> Result<Vec<ReviewComment>, PluginError>;

    async fn get_mergeability(&self, pr: &PrInfo) -> Result<Mergeability, PluginError>;

    async fn get_branch_sha(&self, repo: &str, branch: &str) -> Result<String, PluginError>;
}

/// 会话运行时能力接口
#[async_trait]
pub trait Runtime: Send + Sync {
    fn name(&self) -> &str;

    async fn is_alive(&self, handle: &RuntimeHandle) -> Result<bool, PluginError>;

    async fn detect_activity(&self, session: &Session) -> Result<ActivityState, PluginError>;

    /// 向会话终端发送一段文本
    async fn send_message(&self, handle: &RuntimeHandle, text: &str) -> Result<(), PluginError>;
}

/// 通知人类
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, event: &OrchestratorEvent) -> Result<(), PluginError>;
}

/// 插件错误
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("Plugin not found: {0}")]
    NotFound(String),

    #[error("Plugin already registered: {0}")]
    AlreadyRegistered(String),

    #[error("No {0} plugin registered")]
    NoneRegistered(&'static str),

    #[error("Plugin execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Plugin call timed out after {0}s")]
    Timeout(u64),
}

/// 只写 tracing 日志的通知器，项目未注册任何通知器时使用
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, event: &OrchestratorEvent) -> Result<(), PluginError> {
        tracing::info!(
            event = %event.event_type,
            priority = event.priority.as_str(),
            session = %event.session_id,
            project = %event.project_id,
            "Notification: {}",
            event.message
        );
        Ok(())
    }
}

/// 一个项目选定的插件组合
#[derive(Clone)]
pub struct ProjectPlugins {
    pub scm: Arc<dyn Scm>,
    pub runtime: Option<Arc<dyn Runtime>>,
    pub notifier: Arc<dyn Notifier>,
}

/// 插件注册表：按名字保存，首个注册的即为该类默认
#[derive(Default)]
pub struct PluginRegistry {
    scms: HashMap<String, Arc<dyn Scm>>,
    runtimes: HashMap<String, Arc<dyn Runtime>>,
    notifiers: HashMap<String, Arc<dyn Notifier>>,
    default_scm: Option<String>,
    default_runtime: Option<String>,
    default_notifier: Option<String>,
}

fn insert_named<T: ?Sized>(
    map: &mut HashMap<String, Arc<T>>,
    default: &mut Option<String>,
    name: String,
    plugin: Arc<T>,
) -> Result<(), PluginError> {
    if map.contains_key(&name) {
        return Err(PluginError::AlreadyRegistered(name));
    }
    if default.is_none() {
        *default = Some(name.clone());
    }
    tracing::debug!("Registered plugin: {}", name);
    map.insert(name, plugin);
    Ok(())
}

fn select<T: ?Sized>(
    map: &HashMap<String, Arc<T>>,
    default: &Option<String>,
    wanted: Option<&str>,
) -> Result<Option<Arc<T>>, PluginError> {
    match wanted {
        Some(name) => map
            .get(name)
            .cloned()
            .map(Some)
            .ok_or_else(|| PluginError::NotFound(name.to_string())),
        None => Ok(default.as_ref().and_then(|name| map.get(name).cloned())),
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_scm(&mut self, scm: Arc<dyn Scm>) -> Result<(), PluginError> {
        let name = scm.name().to_string();
        insert_named(&mut self.scms, &mut self.default_scm, name, scm)
    }

    pub fn register_runtime(&mut self, runtime: Arc<dyn Runtime>) -> Result<(), PluginError> {
        let name = runtime.name().to_string();
        insert_named(&mut self.runtimes, &mut self.default_runtime, name, runtime)
    }

    pub fn register_notifier(&mut self, notifier: Arc<dyn Notifier>) -> Result<(), PluginError> {
        let name = notifier.name().to_string();
        insert_named(&mut self.notifiers, &mut self.default_notifier, name, notifier)
    }

    /// 按项目配置选定插件；显式指定但未注册的名字是错误，未指定则用默认
    pub fn resolve(&self, project: &ProjectConfig) -> Result<ProjectPlugins, PluginError> {
        let scm = select(&self.scms, &self.default_scm, project.scm.as_deref())?
            .ok_or(PluginError::NoneRegistered("scm"))?;
        let runtime = select(&self.runtimes, &self.default_runtime, project.runtime.as_deref())?;
        let notifier = select(&self.notifiers, &self.default_notifier, project.notifier.as_deref())?
            .unwrap_or_else(|| Arc::new(LogNotifier));
        Ok(ProjectPlugins {
            scm,
            runtime,
            notifier,
        })
    }

    pub fn len(&self) -> usize {
        self.scms.len() + self.runtimes.len() + self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
