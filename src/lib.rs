//! Apiary - 多会话编码 Agent 生命周期管理
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）与反应规则
//! - **core**: 状态分类、反应引擎、分支跟踪、主控循环、优雅关闭
//! - **events**: 编排事件与 JSONL 事件日志
//! - **mailbox**: 基于文件的持久信箱（确认、回执、归档）
//! - **observability**: tracing 初始化
//! - **plugins**: Scm / Runtime / Notifier 能力接口、注册表与 Mock 实现
//! - **session**: 会话模型与元数据映射
//! - **storage**: 原子写等文件原语与会话元数据存储

pub mod config;
pub mod core;
pub mod events;
pub mod mailbox;
pub mod observability;
pub mod plugins;
pub mod session;
pub mod storage;

pub use crate::core::{LifecycleBuilder, LifecycleManager};
