//! 核心子系统错误类型
//!
//! 尽力而为（best-effort）的操作同样返回这些错误，由调用方显式记录后丢弃，
//! 主控循环本身从不因它们退出。

use thiserror::Error;

/// 会话元数据存储错误
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid session id: {0:?}")]
    InvalidSessionId(String),
}

/// 事件日志错误（调用方通常只记录 warn）
#[derive(Error, Debug)]
pub enum EventLogError {
    #[error("Event log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Event serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// 信箱错误；send 失败会原样返回给调用方
#[derive(Error, Debug)]
pub enum MailboxError {
    #[error("Mailbox I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Message serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid mailbox recipient: {0:?}")]
    InvalidRecipient(String),

    #[error("Invalid message id: {0:?}")]
    InvalidMessageId(String),
}

/// 会话 ID / 信箱收件人 / 消息 ID 是否可以安全地用作单级路径名
pub fn is_valid_path_key(key: &str) -> bool {
    !key.is_empty()
        && key != "."
        && key != ".."
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
