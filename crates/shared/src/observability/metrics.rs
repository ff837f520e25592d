//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集。
//! 匹配引擎是短生命周期的进程，这里只安装 recorder，由调用方决定何时渲染快照。

use anyhow::Result;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use super::ObservabilityConfig;

/// Metrics 资源守卫
pub struct MetricsHandle {
    handle: PrometheusHandle,
}

impl MetricsHandle {
    /// 渲染 Prometheus 文本格式的指标快照
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// 安装 Prometheus recorder 并注册指标描述
pub fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_common_metrics(&config.service_name);

    Ok(MetricsHandle { handle })
}

/// 注册通用指标
fn register_common_metrics(service_name: &str) {
    // 这些描述会出现在渲染结果的 HELP 注释中
    metrics::describe_counter!(
        "campaign_matches_total",
        "Total number of criteria match calls"
    );
    metrics::describe_histogram!(
        "campaign_match_duration_seconds",
        "Criteria match duration in seconds"
    );
    metrics::describe_counter!(
        "campaign_rule_failures_total",
        "Rules skipped because their expression failed to compile or evaluate"
    );
    metrics::describe_counter!(
        "campaign_source_loads_total",
        "Rule source fetches issued by the rule cache"
    );
    metrics::describe_gauge!("campaign_rules_cached", "Rules held by the current snapshot");

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录一次匹配调用
#[inline]
pub fn record_match(status: &str, matched_rules: usize, duration_secs: f64) {
    metrics::counter!(
        "campaign_matches_total",
        "status" => status.to_string(),
        "matched" => (matched_rules > 0).to_string()
    )
    .increment(1);

    metrics::histogram!("campaign_match_duration_seconds", "status" => status.to_string())
        .record(duration_secs);
}

/// 记录单条规则失败
#[inline]
pub fn record_rule_failure(kind: &str) {
    metrics::counter!("campaign_rule_failures_total", "kind" => kind.to_string()).increment(1);
}

/// 记录一次规则源加载
#[inline]
pub fn record_source_load(status: &str, rules_count: usize) {
    metrics::counter!("campaign_source_loads_total", "status" => status.to_string()).increment(1);
    if status == "success" {
        metrics::gauge!("campaign_rules_cached").set(rules_count as f64);
    }
}
