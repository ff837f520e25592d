//! 活动规则缓存
//!
//! 把从规则源拉取的完整规则集缓存在内存中，避免每次匹配都访问数据源。
//!
//! ## 并发模型
//!
//! 每一代缓存是一个 `tokio::sync::OnceCell`，由 `ArcSwap` 持有：
//! - 首次加载时并发调用者共享同一次拉取（single-flight），加载失败不写入任何内容
//! - 加载完成后的读取只是一次原子指针加载，不持有锁
//! - 失效或 TTL 过期时换上一个新的空 OnceCell，下一个调用者负责重新加载

use crate::error::SourceError;
use crate::models::Campaign;
use arc_swap::ArcSwap;
use campaign_shared::observability::metrics as obs_metrics;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// 缓存中唯一的逻辑键
pub const CACHE_KEY: &str = "campaigns";

/// 不可变的规则集快照
pub type RuleSet = Arc<[Campaign]>;

struct Snapshot {
    campaigns: RuleSet,
    loaded_at: Instant,
}

/// 活动规则缓存
pub struct RuleCache {
    current: ArcSwap<OnceCell<Snapshot>>,
    /// 快照存活时间，None 表示在进程生命周期内一直有效
    ttl: Option<Duration>,
    /// 实际调用 loader 的次数
    load_count: AtomicU64,
}

impl RuleCache {
    pub fn new() -> Self {
        Self::with_ttl(None)
    }

    pub fn with_ttl(ttl: Option<Duration>) -> Self {
        Self {
            current: ArcSwap::from_pointee(OnceCell::new()),
            ttl,
            load_count: AtomicU64::new(0),
        }
    }

    /// 获取规则集，未加载或已过期时调用 `loader` 加载
    ///
    /// 同一代缓存只有一个调用者真正执行 `loader`，其余调用者等待其结果。
    pub async fn get_or_load<F, Fut>(&self, loader: F) -> Result<RuleSet, SourceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Campaign>, SourceError>>,
    {
        let mut cell = self.current.load_full();

        if let Some(snapshot) = cell.get() {
            if !self.is_stale(snapshot) {
                return Ok(Arc::clone(&snapshot.campaigns));
            }

            // 只有仍是当前代时才替换，避免覆盖其他调用者刚换上的新一代
            let _ = self
                .current
                .compare_and_swap(&cell, Arc::new(OnceCell::new()));
            cell = self.current.load_full();
            info!(key = CACHE_KEY, "规则缓存已过期，重新加载");
        }

        let snapshot = cell
            .get_or_try_init(|| async {
                self.load_count.fetch_add(1, Ordering::Relaxed);
                let start = Instant::now();

                match loader().await {
                    Ok(campaigns) => {
                        warn_inverted_windows(&campaigns);
                        obs_metrics::record_source_load("success", campaigns.len());
                        info!(
                            key = CACHE_KEY,
                            rules_count = campaigns.len(),
                            duration_ms = start.elapsed().as_millis() as u64,
                            "规则缓存已加载"
                        );
                        Ok(Snapshot {
                            campaigns: campaigns.into(),
                            loaded_at: Instant::now(),
                        })
                    }
                    Err(e) => {
                        obs_metrics::record_source_load("error", 0);
                        warn!(key = CACHE_KEY, error = %e, "加载规则失败，缓存保持为空");
                        Err(e)
                    }
                }
            })
            .await?;

        Ok(Arc::clone(&snapshot.campaigns))
    }

    /// 丢弃当前快照，下一次读取会重新加载
    pub fn invalidate(&self) {
        self.current.store(Arc::new(OnceCell::new()));
        info!(key = CACHE_KEY, "规则缓存已失效");
    }

    /// 当前是否持有快照（不考虑 TTL）
    pub fn is_loaded(&self) -> bool {
        self.current.load().initialized()
    }

    /// 当前快照中的规则数量
    pub fn len(&self) -> usize {
        self.current
            .load()
            .get()
            .map_or(0, |snapshot| snapshot.campaigns.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// loader 被调用的总次数（用于监控和测试）
    pub fn load_count(&self) -> u64 {
        self.load_count.load(Ordering::Relaxed)
    }

    fn is_stale(&self, snapshot: &Snapshot) -> bool {
        self.ttl
            .is_some_and(|ttl| snapshot.loaded_at.elapsed() > ttl)
    }
}

impl Default for RuleCache {
    fn default() -> Self {
        Self::new()
    }
}

/// 有效期起点晚于终点的规则照常缓存，但永远不会命中
fn warn_inverted_windows(campaigns: &[Campaign]) {
    for campaign in campaigns.iter().filter(|c| c.has_inverted_window()) {
        warn!(
            rule_id = %campaign.id,
            rule_name = %campaign.name,
            valid_from = %campaign.valid_from,
            valid_to = %campaign.valid_to,
            "活动有效期起点晚于终点，该规则不会生效"
        );
    }
}
