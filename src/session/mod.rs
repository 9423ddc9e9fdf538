//! 会话模型：一个会话 = 一个 Agent 进程 + 一个 issue / 分支
//!
//! 状态与活跃度字段只由生命周期管理器写入；metadata 可携带其他子系统的扩展字段。

pub mod types;

pub use types::{ActivityState, PrInfo, RuntimeHandle, Session, SessionId, SessionStatus};
