//! 活动匹配命令行工具
//!
//! 根据命令行参数构造一条车辆记录，加载活动规则并输出命中结果。
//!
//! ```bash
//! # 使用内置演示活动
//! campaign-engine --make Toyota --model-type SUV --year 2021 --price 35000
//!
//! # 从文件加载活动，并输出指标快照
//! campaign-engine --rules campaigns.json --owner-id 15 --print-metrics
//! ```

use anyhow::{Context, Result};
use campaign_engine::{
    Car, CriteriaMatcher, JsonFileRuleSource, Owner, RuleEngine, RuleSource, StaticRuleSource,
    demo_campaigns,
};
use campaign_shared::config::AppConfig;
use campaign_shared::observability;
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

const SERVICE_NAME: &str = "campaign-engine";

/// 活动规则匹配工具
#[derive(Parser, Debug)]
#[command(name = "campaign-engine")]
#[command(version, about = "对车辆记录执行活动规则匹配")]
struct Cli {
    /// 品牌
    #[arg(long, default_value = "Toyota")]
    make: String,

    /// 车型（SUV、Sedan 等）
    #[arg(long, default_value = "SUV")]
    model_type: String,

    /// 年份
    #[arg(long, default_value_t = 2021)]
    year: i32,

    /// 价格
    #[arg(long, default_value_t = 35000.0)]
    price: f64,

    /// 车架号
    #[arg(long, default_value = "123ABC")]
    vin: String,

    /// 车主 ID
    #[arg(long, default_value_t = 15)]
    owner_id: i32,

    /// 车主姓名
    #[arg(long, default_value = "Linux Tovard")]
    owner_name: String,

    /// 车主年龄
    #[arg(long, default_value_t = 25)]
    owner_age: i32,

    /// 不设置车主（用于观察空引用的处理）
    #[arg(long)]
    no_owner: bool,

    /// 活动规则 JSON 文件，优先于配置中的 source.rules_path
    #[arg(long)]
    rules: Option<PathBuf>,

    /// 匹配结束后输出 Prometheus 格式的指标快照
    #[arg(long)]
    print_metrics: bool,
}

impl Cli {
    fn car(&self) -> Car {
        let owner = (!self.no_owner).then(|| Owner {
            id: self.owner_id,
            name: self.owner_name.clone(),
            age: self.owner_age,
        });

        Car {
            make: self.make.clone(),
            year: self.year,
            model_type: self.model_type.clone(),
            vin: self.vin.clone(),
            price: self.price,
            owner,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(SERVICE_NAME).unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });
    if cli.print_metrics {
        config.observability.metrics_enabled = true;
    }

    let obs_config = config.observability.clone().with_service_name(SERVICE_NAME);
    let guard = observability::init(&obs_config)?;

    let source: Arc<dyn RuleSource> = match cli.rules.clone().or_else(|| config.source.rules_path.clone()) {
        Some(path) => {
            info!(path = %path.display(), "Loading campaigns from file");
            Arc::new(JsonFileRuleSource::new(path))
        }
        None => {
            info!("Using built-in demo campaigns");
            Arc::new(
                StaticRuleSource::new(demo_campaigns(Utc::now()))
                    .with_latency(config.source.simulated_latency()),
            )
        }
    };

    let matcher = CriteriaMatcher::<Car>::from_config(source, &config);
    let engine: RuleEngine<Car> = RuleEngine::new(Arc::new(matcher));

    let result = engine
        .execute(cli.car())
        .await
        .context("campaign matching failed")?;

    println!("Match Found: {}", result.is_match);
    println!("Matched Campaigns:");
    for campaign in &result.matched {
        println!("{} applied Campaign", campaign.name);
    }

    if result.has_failures() {
        println!("Skipped Campaigns:");
        for failure in &result.failures {
            println!("{} ({}): {}", failure.rule_name, failure.rule_id, failure.kind);
        }
    }

    if cli.print_metrics {
        if let Some(rendered) = guard.render_metrics() {
            println!();
            print!("{}", rendered);
        }
    }

    Ok(())
}
