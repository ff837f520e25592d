//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use crate::observability::ObservabilityConfig;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 规则来源配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// 活动规则 JSON 文件路径，未配置时使用内置演示规则
    pub rules_path: Option<PathBuf>,
    /// 单次拉取规则的超时时间（毫秒）
    pub fetch_timeout_ms: u64,
    /// 模拟的数据源延迟（毫秒），仅用于演示和压测
    pub simulated_latency_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            rules_path: None,
            fetch_timeout_ms: 5_000,
            simulated_latency_ms: 0,
        }
    }
}

impl SourceConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn simulated_latency(&self) -> Duration {
        Duration::from_millis(self.simulated_latency_ms)
    }
}

/// 规则缓存配置
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// 规则快照的存活时间（秒），为空时永不过期
    pub ttl_seconds: Option<u64>,
}

impl CacheConfig {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_seconds.map(Duration::from_secs)
    }
}

/// 单条规则失败时的处理策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// 记录失败并继续评估其余规则
    #[default]
    Skip,
    /// 遇到第一条失败的规则即中止整个匹配（降级模式）
    Abort,
}

/// 匹配器配置
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub failure_policy: FailurePolicy,
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub source: SourceConfig,
    pub cache: CacheConfig,
    pub matcher: MatcherConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（CAMPAIGN_ 前缀，如 CAMPAIGN_CACHE__TTL_SECONDS -> cache.ttl_seconds）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("CAMPAIGN_ENV").unwrap_or_else(|_| "development".to_string());
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        Self::load_from(Path::new(&config_dir), service_name, &env)
    }

    /// 从指定目录加载配置
    pub fn load_from(config_dir: &Path, service_name: &str, env: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join(format!("{}.toml", env))).required(false))
            .add_source(
                File::from(config_dir.join(format!("{}.toml", service_name))).required(false),
            )
            // 字段名本身带下划线，层级分隔使用双下划线
            .add_source(
                Environment::with_prefix("CAMPAIGN")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.source.fetch_timeout_ms, 5_000);
        assert_eq!(config.matcher.failure_policy, FailurePolicy::Skip);
        assert!(config.cache.ttl().is_none());
        assert!(!config.is_production());
    }

    #[test]
    fn test_load_without_files_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(dir.path(), "campaign-engine", "test").unwrap();

        assert_eq!(config.service_name, "campaign-engine");
        assert_eq!(config.environment, "test");
        assert_eq!(config.source.fetch_timeout(), Duration::from_secs(5));
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_layered_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            r#"
            [source]
            fetch_timeout_ms = 250

            [cache]
            ttl_seconds = 60
            "#,
        )
        .unwrap();
        fs::write(
            dir.path().join("campaign-engine.toml"),
            r#"
            [matcher]
            failure_policy = "abort"

            [source]
            rules_path = "rules/campaigns.json"
            "#,
        )
        .unwrap();

        let config = AppConfig::load_from(dir.path(), "campaign-engine", "test").unwrap();

        assert_eq!(config.source.fetch_timeout_ms, 250);
        assert_eq!(
            config.source.rules_path.as_deref(),
            Some(Path::new("rules/campaigns.json"))
        );
        assert_eq!(config.cache.ttl(), Some(Duration::from_secs(60)));
        assert_eq!(config.matcher.failure_policy, FailurePolicy::Abort);
    }
}
