//! 生命周期管理器构建器：统一的初始化逻辑
//!
//! 从 `AppConfig` 出发，按配置选定事件日志、元数据存储、信箱和每个项目的插件；
//! 任何一项都可以在 build 前替换（测试里常用内存实现）。

use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::dispatch::ORCHESTRATOR;
use crate::core::lifecycle::{LifecycleManager, ProjectContext};
use crate::events::{EventLog, JsonlEventLog, NullEventLog};
use crate::mailbox::Mailbox;
use crate::plugins::{PluginError, PluginRegistry};
use crate::storage::{FileMetadataStore, MetadataStore};

/// 生命周期管理器构建器
pub struct LifecycleBuilder {
    config: AppConfig,
    registry: PluginRegistry,
    event_log: Option<Arc<dyn EventLog>>,
    store: Option<Arc<dyn MetadataStore>>,
    mailbox: Option<Mailbox>,
}

impl LifecycleBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            registry: PluginRegistry::new(),
            event_log: None,
            store: None,
            mailbox: None,
        }
    }

    pub fn with_registry(mut self, registry: PluginRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_event_log(mut self, event_log: Arc<dyn EventLog>) -> Self {
        self.event_log = Some(event_log);
        self
    }

    pub fn with_metadata_store(mut self, store: Arc<dyn MetadataStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_mailbox(mut self, mailbox: Mailbox) -> Self {
        self.mailbox = Some(mailbox);
        self
    }

    /// 按配置构建事件日志（关闭时为空实现）
    pub fn build_event_log(&self) -> Arc<dyn EventLog> {
        if self.config.event_log.enabled {
            Arc::new(JsonlEventLog::new(self.config.event_log_path()))
        } else {
            Arc::new(NullEventLog)
        }
    }

    /// 为每个配置的项目选定插件并合并反应规则
    pub fn build_projects(&self) -> Result<Vec<ProjectContext>, PluginError> {
        let mut ids: Vec<&String> = self.config.projects.keys().collect();
        ids.sort();

        ids.into_iter()
            .map(|id| {
                let project = &self.config.projects[id];
                let plugins = self.registry.resolve(project).map_err(|e| {
                    tracing::error!("Failed to resolve plugins for project {}: {}", id, e);
                    e
                })?;
                Ok(ProjectContext {
                    id: id.clone(),
                    config: project.clone(),
                    plugins,
                    rules: self.config.reactions_for(id),
                })
            })
            .collect()
    }

    pub fn build(self) -> Result<LifecycleManager, PluginError> {
        let projects = self.build_projects()?;
        let event_log = match self.event_log.clone() {
            Some(log) => log,
            None => self.build_event_log(),
        };
        let store = self
            .store
            .clone()
            .unwrap_or_else(|| Arc::new(FileMetadataStore::new(self.config.sessions_dir())));
        let mailbox = self
            .mailbox
            .clone()
            .unwrap_or_else(|| Mailbox::new(self.config.mailbox_dir(), ORCHESTRATOR));

        tracing::info!("Lifecycle manager built with {} projects", projects.len());
        Ok(LifecycleManager::new(
            self.config.lifecycle,
            projects,
            event_log,
            store,
            mailbox,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProjectConfig, ReactionRule};
    use crate::plugins::mock::MockScm;

    #[tokio::test]
    async fn test_build_resolves_each_project() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.app.data_dir = Some(dir.path().to_path_buf());
        config
            .reactions
            .insert("ci.failing".into(), ReactionRule::send_to_agent());
        config.projects.insert("web".into(), ProjectConfig::new("acme/web"));
        config.projects.insert("api".into(), ProjectConfig::new("acme/api"));

        let mut registry = PluginRegistry::new();
        registry.register_scm(Arc::new(MockScm::new())).unwrap();

        let builder = LifecycleBuilder::new(config).with_registry(registry);
        let projects = builder.build_projects().unwrap();
        assert_eq!(
            projects.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(),
            vec!["api", "web"]
        );
        assert!(projects[0].rules.contains_key("ci.failing"));

        let manager = builder.build().unwrap();
        assert_eq!(manager.project_ids(), vec!["api".to_string(), "web".to_string()]);
        assert_eq!(manager.mailbox().owner(), ORCHESTRATOR);
        assert_eq!(manager.mailbox().base_dir(), dir.path().join("mailbox"));
    }

    #[test]
    fn test_build_fails_without_scm() {
        let mut config = AppConfig::default();
        config.projects.insert("web".into(), ProjectConfig::new("acme/web"));
        assert!(LifecycleBuilder::new(config).build().is_err());
    }
}
