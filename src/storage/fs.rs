//! 异步文件原语
//!
//! - `atomic_write`：写入同目录临时文件，fsync 后 rename 覆盖目标，读者永远看不到半个文件
//! - `append_line`：单次 write 追加一行（JSONL）
//! - `read_optional`：文件不存在视为 None 而非错误

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;

/// 临时文件后缀；任何扫描目录的读者都必须跳过带此后缀的文件
pub const TEMP_SUFFIX: &str = ".tmp";

/// 是否为写入中的临时文件（以 `.` 开头或以 `.tmp` 结尾）
pub fn is_temp_file(name: &str) -> bool {
    name.starts_with('.') || name.ends_with(TEMP_SUFFIX)
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_name = format!(".{}.{}{}", name, uuid::Uuid::new_v4().simple(), TEMP_SUFFIX);
    match path.parent() {
        Some(parent) => parent.join(tmp_name),
        None => PathBuf::from(tmp_name),
    }
}

/// 原子写入：临时文件 + fsync + rename；失败时尽力删除临时文件
pub async fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp = temp_path_for(path);

    let result = async {
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(content).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, path).await
    }
    .await;

    if result.is_err() {
        let _ = fs::remove_file(&tmp).await;
    }
    result
}

/// 追加一行；内容与换行符在同一次 write 中写出
pub async fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut buf = String::with_capacity(line.len() + 1);
    buf.push_str(line.trim_end_matches('\n'));
    buf.push('\n');

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(buf.as_bytes()).await
}

/// 读取文件；不存在时返回 Ok(None)
pub async fn read_optional(path: &Path) -> std::io::Result<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
