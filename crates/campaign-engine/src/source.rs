//! 活动规则数据源
//!
//! 规则从哪里来不属于引擎的职责，这里只定义拉取接口和两个参考实现：
//! 内存列表（可模拟数据库延迟）和 JSON 文件。

use crate::error::SourceError;
use crate::models::Campaign;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, instrument};

/// 规则数据源
///
/// 拉取可能很慢也可能失败，调用方负责超时控制。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RuleSource: Send + Sync {
    /// 拉取全部活动规则
    async fn fetch(&self) -> Result<Vec<Campaign>, SourceError>;
}

/// 内存规则源
pub struct StaticRuleSource {
    campaigns: Vec<Campaign>,
    latency: Duration,
}

impl StaticRuleSource {
    pub fn new(campaigns: Vec<Campaign>) -> Self {
        Self {
            campaigns,
            latency: Duration::ZERO,
        }
    }

    /// 每次拉取前等待指定时长，模拟远端数据库
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[async_trait]
impl RuleSource for StaticRuleSource {
    async fn fetch(&self) -> Result<Vec<Campaign>, SourceError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        debug!(count = self.campaigns.len(), "从内存规则源拉取规则");
        Ok(self.campaigns.clone())
    }
}

/// JSON 文件规则源
///
/// 文件内容为活动对象数组，时间使用 RFC 3339 格式。
pub struct JsonFileRuleSource {
    path: PathBuf,
}

impl JsonFileRuleSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RuleSource for JsonFileRuleSource {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn fetch(&self) -> Result<Vec<Campaign>, SourceError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            SourceError::Unavailable(format!("读取规则文件 {} 失败: {}", self.path.display(), e))
        })?;

        let campaigns: Vec<Campaign> = serde_json::from_str(&content).map_err(|e| {
            SourceError::Unavailable(format!("解析规则文件 {} 失败: {}", self.path.display(), e))
        })?;

        debug!(count = campaigns.len(), "从文件加载规则");
        Ok(campaigns)
    }
}
