//! 插件接口上传递的外部信号类型

use serde::{Deserialize, Serialize};

/// PR 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrState {
    Open,
    Closed,
    Merged,
}

/// CI 汇总状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiStatus {
    Passing,
    Failing,
    Pending,
    /// 没有配置 CI 或还没有任何检查
    #[default]
    None,
}

/// Review 结论
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approved,
    ChangesRequested,
    Pending,
    #[default]
    None,
}

/// 单个 CI 检查
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiCheck {
    pub name: String,
    pub status: CiStatus,
    #[serde(default)]
    pub url: Option<String>,
}

impl CiCheck {
    pub fn new(name: impl Into<String>, status: CiStatus) -> Self {
        Self {
            name: name.into(),
            status,
            url: None,
        }
    }
}

/// 未处理的 review 评论
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewComment {
    pub author: String,
    pub body: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub url: Option<String>,
}

impl ReviewComment {
    pub fn new(author: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            body: body.into(),
            path: None,
            line: None,
            url: None,
        }
    }

    pub fn at(mut self, path: impl Into<String>, line: u32) -> Self {
        self.path = Some(path.into());
        self.line = Some(line);
        self
    }
}

/// 合并可行性
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Mergeability {
    pub mergeable: bool,
    pub has_conflicts: bool,
    /// 阻止合并的原因（必需检查、保护分支规则等）
    #[serde(default)]
    pub blockers: Vec<String>,
}

impl Mergeability {
    pub fn clean() -> Self {
        Self {
            mergeable: true,
            has_conflicts: false,
            blockers: Vec::new(),
        }
    }

    pub fn conflicting() -> Self {
        Self {
            mergeable: false,
            has_conflicts: true,
            blockers: vec!["merge conflicts".to_string()],
        }
    }
}
