//! 本地持久化原语：原子写入、单行追加、会话元数据存储
//!
//! 事件日志、信箱与会话元数据共用同一套文件操作，避免各自实现「临时文件 + rename」。

pub mod fs;
pub mod metadata;

pub use fs::{append_line, atomic_write, is_temp_file, read_optional};
pub use metadata::{FileMetadataStore, MemoryMetadataStore, MetadataStore};
