//! 事件日志：JSONL 只追加文件
//!
//! append 失败返回错误，由调用方记录后丢弃（日志是尽力而为的，绝不中断主控循环）；
//! read_recent 逐行独立解析，坏行直接跳过。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use crate::core::error::EventLogError;
use crate::events::OrchestratorEvent;
use crate::storage::fs::{append_line, read_optional};

/// 事件日志接口
#[async_trait]
pub trait EventLog: Send + Sync {
    /// 追加一条事件
    async fn append(&self, event: &OrchestratorEvent) -> Result<(), EventLogError>;

    /// 按文件顺序返回最近 `limit` 条合法事件
    async fn read_recent(&self, limit: usize) -> Vec<OrchestratorEvent>;
}

/// 每个部署一个 JSONL 文件
#[derive(Debug, Clone)]
pub struct JsonlEventLog {
    path: PathBuf,
}

impl JsonlEventLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// 最小结构校验：这些字段必须存在且为字符串
fn has_event_shape(value: &Value) -> bool {
    const REQUIRED: [&str; 6] = ["id", "type", "sessionId", "projectId", "timestamp", "message"];
    REQUIRED
        .iter()
        .all(|key| value.get(key).map(Value::is_string).unwrap_or(false))
}

/// 解析单行；任何失败都返回 None
pub fn parse_event_line(line: &str) -> Option<OrchestratorEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let value: Value = serde_json::from_str(line).ok()?;
    if !has_event_shape(&value) {
        return None;
    }
    serde_json::from_value(value).ok()
}

#[async_trait]
impl EventLog for JsonlEventLog {
    async fn append(&self, event: &OrchestratorEvent) -> Result<(), EventLogError> {
        let line = serde_json::to_string(event)?;
        append_line(&self.path, &line).await?;
        Ok(())
    }

    async fn read_recent(&self, limit: usize) -> Vec<OrchestratorEvent> {
        let content = match read_optional(&self.path).await {
            Ok(Some(content)) => content,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "Failed to read event log: {}", e);
                return Vec::new();
            }
        };

        let events: Vec<OrchestratorEvent> = content.lines().filter_map(parse_event_line).collect();
        let skip = events.len().saturating_sub(limit);
        events.into_iter().skip(skip).collect()
    }
}

/// 空实现：日志关闭时使用
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventLog;

#[async_trait]
impl EventLog for NullEventLog {
    async fn append(&self, _event: &OrchestratorEvent) -> Result<(), EventLogError> {
        Ok(())
    }

    async fn read_recent(&self, _limit: usize) -> Vec<OrchestratorEvent> {
        Vec::new()
    }
}
