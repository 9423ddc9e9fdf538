//! 会话元数据存储抽象层
//!
//! 以会话 ID 为键的持久 key=value 映射：文件实现（每会话一个文件）与内存实现（测试 / 嵌入）。

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::error::{is_valid_path_key, StorageError};
use crate::storage::fs::{atomic_write, is_temp_file, read_optional};

/// 元数据存储接口
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// 读取会话元数据；不存在时返回 None
    async fn read(&self, session_id: &str) -> Result<Option<HashMap<String, String>>, StorageError>;

    /// 整体覆盖写入
    async fn write(
        &self,
        session_id: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<(), StorageError>;

    /// 合并更新；空字符串值表示删除该键
    async fn update(
        &self,
        session_id: &str,
        updates: &HashMap<String, String>,
    ) -> Result<(), StorageError>;

    /// 删除（文件实现会归档而不是直接删除）
    async fn delete(&self, session_id: &str) -> Result<(), StorageError>;

    /// 列出所有会话 ID（字典序）
    async fn list(&self) -> Result<Vec<String>, StorageError>;
}

fn check_id(session_id: &str) -> Result<(), StorageError> {
    if is_valid_path_key(session_id) {
        Ok(())
    } else {
        Err(StorageError::InvalidSessionId(session_id.to_string()))
    }
}

fn merge_updates(base: &mut HashMap<String, String>, updates: &HashMap<String, String>) {
    for (k, v) in updates {
        if v.is_empty() {
            base.remove(k);
        } else {
            base.insert(k.clone(), v.clone());
        }
    }
}

/// 值中的反斜杠与换行转义成单行
fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// 解析 key=value 文本：忽略空行、注释行与没有 `=` 的行；只按第一个 `=` 切分，值原样保留（反转义）
pub fn parse_key_values(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| {
            let trimmed = line.trim_start();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
        .filter_map(|line| {
            let (k, v) = line.split_once('=')?;
            let k = k.trim();
            if k.is_empty() {
                return None;
            }
            Some((k.to_string(), unescape_value(v)))
        })
        .collect()
}

/// 序列化为 key=value 文本（按键排序，输出稳定）
pub fn render_key_values(map: &HashMap<String, String>) -> String {
    let sorted: BTreeMap<&String, &String> = map.iter().collect();
    let mut out = String::new();
    for (k, v) in sorted {
        out.push_str(k);
        out.push('=');
        out.push_str(&escape_value(v));
        out.push('\n');
    }
    out
}

/// 文件元数据存储：`{root}/{session_id}`，删除时移入 `{root}/archive/`
#[derive(Debug, Clone)]
pub struct FileMetadataStore {
    root: PathBuf,
}

impl FileMetadataStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }
}

#[async_trait]
impl MetadataStore for FileMetadataStore {
    async fn read(&self, session_id: &str) -> Result<Option<HashMap<String, String>>, StorageError> {
        check_id(session_id)?;
        let content = read_optional(&self.path_for(session_id)).await?;
        Ok(content.map(|c| parse_key_values(&c)))
    }

    async fn write(
        &self,
        session_id: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<(), StorageError> {
        check_id(session_id)?;
        let content = render_key_values(metadata);
        atomic_write(&self.path_for(session_id), content.as_bytes()).await?;
        Ok(())
    }

    async fn update(
        &self,
        session_id: &str,
        updates: &HashMap<String, String>,
    ) -> Result<(), StorageError> {
        let mut current = self.read(session_id).await?.unwrap_or_default();
        merge_updates(&mut current, updates);
        self.write(session_id, &current).await
    }

    async fn delete(&self, session_id: &str) -> Result<(), StorageError> {
        check_id(session_id)?;
        let path = self.path_for(session_id);
        if tokio::fs::metadata(&path).await.is_err() {
            return Ok(());
        }
        let archive_dir = self.root.join("archive");
        tokio::fs::create_dir_all(&archive_dir).await?;
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        tokio::fs::rename(&path, archive_dir.join(format!("{session_id}_{stamp}"))).await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_temp_file(&name) || !is_valid_path_key(&name) {
                continue;
            }
            ids.push(name);
        }
        ids.sort();
        Ok(ids)
    }
}

/// 内存元数据存储
#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    entries: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn read(&self, session_id: &str) -> Result<Option<HashMap<String, String>>, StorageError> {
        Ok(self.entries.read().await.get(session_id).cloned())
    }

    async fn write(
        &self,
        session_id: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<(), StorageError> {
        check_id(session_id)?;
        self.entries
            .write()
            .await
            .insert(session_id.to_string(), metadata.clone());
        Ok(())
    }

    async fn update(
        &self,
        session_id: &str,
        updates: &HashMap<String, String>,
    ) -> Result<(), StorageError> {
        check_id(session_id)?;
        let mut entries = self.entries.write().await;
        let current = entries.entry(session_id.to_string()).or_default();
        merge_updates(current, updates);
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<(), StorageError> {
        self.entries.write().await.remove(session_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        let mut ids: Vec<String> = self.entries.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
