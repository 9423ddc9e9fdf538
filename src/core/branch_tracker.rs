//! 默认分支推进检测：按项目缓存上次看到的 SHA
//!
//! 只在内存中；首次观测只记录不报告，拉取失败或超时不动缓存。
//! 各项目的拉取并发进行，每个都受同一超时约束。

use std::collections::HashMap;
use std::time::Duration;

use crate::plugins::Scm;

/// 一次检查的结果
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BranchAdvance {
    pub advanced: bool,
    pub old_sha: Option<String>,
    pub new_sha: Option<String>,
}

impl BranchAdvance {
    fn unchanged() -> Self {
        Self::default()
    }
}

/// 一个待检查的项目分支
#[derive(Clone, Copy)]
pub struct BranchTarget<'a> {
    pub project_id: &'a str,
    pub repo: &'a str,
    pub branch: &'a str,
    pub scm: &'a dyn Scm,
}

/// 拉取一个分支的 SHA；失败或超时返回 None
async fn fetch_sha(target: BranchTarget<'_>, timeout: Duration) -> Option<String> {
    let BranchTarget { project_id, repo, branch, scm } = target;
    match tokio::time::timeout(timeout, scm.get_branch_sha(repo, branch)).await {
        Ok(Ok(sha)) => Some(sha),
        Ok(Err(e)) => {
            tracing::warn!(project = project_id, repo, branch, "Failed to fetch branch SHA: {}", e);
            None
        }
        Err(_) => {
            tracing::warn!(
                project = project_id,
                repo,
                branch,
                "Branch SHA fetch timed out after {}s",
                timeout.as_secs()
            );
            None
        }
    }
}

/// SHA 缓存，由主控循环实例持有
#[derive(Debug, Default)]
pub struct BranchTracker {
    last_seen: HashMap<String, String>,
}

impl BranchTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 用新观测到的 SHA 更新缓存并给出结果
    pub fn observe(&mut self, project_id: &str, sha: &str) -> BranchAdvance {
        match self.last_seen.insert(project_id.to_string(), sha.to_string()) {
            Some(old) if old != sha => BranchAdvance {
                advanced: true,
                old_sha: Some(old),
                new_sha: Some(sha.to_string()),
            },
            _ => BranchAdvance::unchanged(),
        }
    }

    /// 并发拉取各项目的当前 SHA 并逐个比较；结果与输入顺序一致
    pub async fn check_all(
        &mut self,
        targets: &[BranchTarget<'_>],
        timeout: Duration,
    ) -> Vec<(String, BranchAdvance)> {
        let fetched =
            futures_util::future::join_all(targets.iter().map(|t| fetch_sha(*t, timeout))).await;

        targets
            .iter()
            .zip(fetched)
            .map(|(target, sha)| {
                let advance = match sha {
                    Some(sha) => self.observe(target.project_id, &sha),
                    None => BranchAdvance::unchanged(),
                };
                (target.project_id.to_string(), advance)
            })
            .collect()
    }

    /// 检查单个项目
    pub async fn check(&mut self, target: BranchTarget<'_>, timeout: Duration) -> BranchAdvance {
        self.check_all(&[target], timeout)
            .await
            .pop()
            .map(|(_, advance)| advance)
            .unwrap_or_default()
    }

    pub fn last_seen(&self, project_id: &str) -> Option<&str> {
        self.last_seen.get(project_id).map(String::as_str)
    }
}
