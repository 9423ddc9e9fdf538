//! 文件信箱
//!
//! 写入走「临时文件 + rename」，读者永远看不到半条消息；ack 先用一次 rename
//! 把消息认领进 processed，再在那里原子重写确认时间，消息任意时刻只存在于一处。

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;

use crate::core::error::{is_valid_path_key, MailboxError};
use crate::mailbox::{Message, MessageType};
use crate::storage::fs::{atomic_write, is_temp_file};

/// receive 过滤选项
#[derive(Debug, Clone, Default)]
pub struct ReceiveOptions {
    /// 仅返回该类型
    pub message_type: Option<MessageType>,
    /// 仅返回未确认消息
    pub unread_only: bool,
    /// 最多返回条数
    pub limit: Option<usize>,
}

impl ReceiveOptions {
    pub fn unread() -> Self {
        Self {
            unread_only: true,
            ..Self::default()
        }
    }

    pub fn of_type(message_type: MessageType) -> Self {
        Self {
            message_type: Some(message_type),
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// 某个参与者（会话或编排器）视角的信箱
#[derive(Debug, Clone)]
pub struct Mailbox {
    base_dir: PathBuf,
    owner: String,
}

impl Mailbox {
    pub fn new(base_dir: impl AsRef<Path>, owner: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            owner: owner.into(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// 以另一个参与者身份打开同一信箱根目录
    pub fn for_owner(&self, owner: impl Into<String>) -> Self {
        Self::new(&self.base_dir, owner)
    }

    fn inbox_dir_of(&self, who: &str) -> PathBuf {
        self.base_dir.join(who).join("inbox")
    }

    fn inbox_dir(&self) -> PathBuf {
        self.inbox_dir_of(&self.owner)
    }

    fn processed_dir(&self) -> PathBuf {
        self.inbox_dir().join("processed")
    }

    fn outbox_dir(&self) -> PathBuf {
        self.base_dir.join(&self.owner).join("outbox")
    }

    /// 发送到 `to` 的 inbox；返回补全了 id / timestamp 的消息
    pub async fn send(&self, to: &str, mut message: Message) -> Result<Message, MailboxError> {
        if !is_valid_path_key(to) {
            return Err(MailboxError::InvalidRecipient(to.to_string()));
        }
        if message.id.is_empty() {
            message.id = Message::generate_id();
        } else if !is_valid_path_key(&message.id) {
            return Err(MailboxError::InvalidMessageId(message.id));
        }
        if message.timestamp.is_none() {
            message.timestamp = Some(Utc::now());
        }
        if message.from.is_empty() {
            message.from = self.owner.clone();
        }
        message.to = to.to_string();

        let body = serde_json::to_vec_pretty(&message)?;
        let name = message.file_name();
        atomic_write(&self.inbox_dir_of(to).join(&name), &body).await?;

        if is_valid_path_key(&self.owner) {
            if let Err(e) = atomic_write(&self.outbox_dir().join(&name), &body).await {
                tracing::warn!(owner = %self.owner, "Failed to keep outbox copy: {}", e);
            }
        }

        tracing::debug!(id = %message.id, to = %to, kind = %message.message_type, "Message delivered");
        Ok(message)
    }

    /// 读取自己的 inbox：坏文件跳过，按时间升序
    pub async fn receive(&self, opts: &ReceiveOptions) -> Vec<Message> {
        let mut messages: Vec<Message> = list_messages(&self.inbox_dir())
            .await
            .into_iter()
            .map(|(_, m)| m)
            .filter(|m| opts.message_type.map_or(true, |t| m.message_type == t))
            .filter(|m| !opts.unread_only || m.is_unread())
            .collect();

        messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = opts.limit {
            messages.truncate(limit);
        }
        messages
    }

    /// 已处理归档中的消息（按时间升序）
    pub async fn processed(&self) -> Vec<Message> {
        let mut messages: Vec<Message> = list_messages(&self.processed_dir())
            .await
            .into_iter()
            .map(|(_, m)| m)
            .collect();
        messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        messages
    }

    /// 确认消息：移入 processed 后写入确认时间；需要回执时向发送方回一条 ack
    ///
    /// 消息不在 inbox（从未存在或已被并发确认）时返回 Ok(None)。
    /// 并发确认同一条消息时只有 rename 成功的一方继续，回执只发一次。
    pub async fn ack(&self, id: &str) -> Result<Option<Message>, MailboxError> {
        let Some((path, mut message)) = self.find_in_inbox(id).await else {
            return Ok(None);
        };
        let Some(name) = path.file_name() else {
            return Ok(None);
        };

        let processed = self.processed_dir();
        tokio::fs::create_dir_all(&processed).await?;
        let claimed = processed.join(name);
        match tokio::fs::rename(&path, &claimed).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        message.acked_at = Some(Utc::now());
        atomic_write(&claimed, &serde_json::to_vec_pretty(&message)?).await?;

        if message.requires_ack && message.message_type != MessageType::Ack {
            let receipt = Message::new(&self.owner, &message.from, MessageType::Ack)
                .in_reply_to(&message.id)
                .with_payload(serde_json::json!({ "ackedAt": message.acked_at }));
            if let Err(e) = self.send(&message.from, receipt).await {
                tracing::warn!(id = %message.id, to = %message.from, "Failed to send ack receipt: {}", e);
            }
        }

        Ok(Some(message))
    }

    /// 回复某条消息（自动串联 replyTo）
    pub async fn reply(
        &self,
        original: &Message,
        message_type: MessageType,
        payload: Value,
    ) -> Result<Message, MailboxError> {
        let reply = Message::new(&self.owner, &original.from, message_type)
            .in_reply_to(&original.id)
            .with_payload(payload);
        self.send(&original.from, reply).await
    }

    /// 轮询自己的 inbox 等待 `replyTo == id` 的 ack；超时返回 false
    pub async fn wait_for_ack(&self, id: &str, timeout: Duration, poll_interval: Duration) -> bool {
        let poll = async {
            loop {
                let acks = self.receive(&ReceiveOptions::of_type(MessageType::Ack)).await;
                if let Some(found) = acks.into_iter().find(|m| m.reply_to.as_deref() == Some(id)) {
                    if let Err(e) = self.ack(&found.id).await {
                        tracing::warn!(id = %found.id, "Failed to archive ack receipt: {}", e);
                    }
                    return;
                }
                tokio::time::sleep(poll_interval).await;
            }
        };
        tokio::time::timeout(timeout, poll).await.is_ok()
    }

    /// 删除 processed 与 outbox 中早于 `max_age` 的消息；返回删除数量
    pub async fn clear_old_messages(&self, max_age: Duration) -> usize {
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return 0;
        };
        let cutoff = Utc::now() - max_age;
        let mut removed = 0;

        for dir in [self.processed_dir(), self.outbox_dir()] {
            for (path, message) in list_messages(&dir).await {
                let reference = message.acked_at.or(message.timestamp);
                if reference.map_or(false, |t| t < cutoff) {
                    match tokio::fs::remove_file(&path).await {
                        Ok(()) => removed += 1,
                        Err(e) => {
                            tracing::debug!(path = %path.display(), "Failed to purge message: {}", e)
                        }
                    }
                }
            }
        }
        removed
    }

    async fn find_in_inbox(&self, id: &str) -> Option<(PathBuf, Message)> {
        let marker = format!("-{id}-");
        list_messages(&self.inbox_dir())
            .await
            .into_iter()
            .filter(|(path, _)| {
                path.file_name()
                    .map_or(false, |n| n.to_string_lossy().contains(&marker))
            })
            .find(|(_, m)| m.id == id)
    }
}

/// 列出目录下所有可解析的消息文件；目录不存在视为空，坏文件跳过
async fn list_messages(dir: &Path) -> Vec<(PathBuf, Message)> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(dir = %dir.display(), "Failed to list mailbox: {}", e);
            }
            return Vec::new();
        }
    };

    let mut out = Vec::new();
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), "Mailbox listing interrupted: {}", e);
                break;
            }
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_temp_file(&name) || !name.ends_with(".json") {
            continue;
        }
        let path = entry.path();
        // 并发 ack 可能刚好把文件移走
        let Ok(content) = tokio::fs::read_to_string(&path).await else {
            continue;
        };
        match serde_json::from_str::<Message>(&content) {
            Ok(message) => out.push((path, message)),
            Err(e) => tracing::debug!(file = %name, "Skipping malformed message: {}", e),
        }
    }
    out
}
