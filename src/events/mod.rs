//! 事件：生命周期管理器观察与决策的只追加记录
//!
//! - **types**: OrchestratorEvent、优先级、事件类型常量
//! - **log**: EventLog 接口、JSONL 文件实现与空实现

pub mod log;
pub mod types;

pub use log::{EventLog, JsonlEventLog, NullEventLog};
pub use types::{event_types, infer_priority, EventPriority, OrchestratorEvent};
