//! 活动规则匹配器
//!
//! 一次匹配的流程：
//! 1. 通过规则缓存取得规则集（未命中时带超时地从规则源拉取）
//! 2. 过滤出启用且在有效期内的规则
//! 3. 按规则集顺序取出（或编译）谓词并对记录求值
//! 4. 汇总命中的活动和被跳过的规则

use crate::cache::{RuleCache, RuleSet};
use crate::error::{MatchError, Result, SourceError};
use crate::models::{Campaign, FailureKind, MatchResult, RuleFailure};
use crate::record::Record;
use crate::source::RuleSource;
use crate::store::PredicateStore;
use async_trait::async_trait;
use campaign_shared::config::{AppConfig, FailurePolicy};
use campaign_shared::observability::metrics as obs_metrics;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

/// 默认的规则源拉取超时
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// 匹配器接口
#[async_trait]
pub trait Matcher<R: Record>: Send + Sync {
    /// 用当前时间匹配一条记录
    async fn match_record(&self, record: R) -> Result<MatchResult<R>>;
}

/// 活动规则匹配器
pub struct CriteriaMatcher<R> {
    source: Arc<dyn RuleSource>,
    cache: Arc<RuleCache>,
    predicates: PredicateStore<R>,
    /// 最近一次据以清理谓词存储的缓存加载次数
    pruned_generation: AtomicU64,
    failure_policy: FailurePolicy,
    fetch_timeout: Duration,
}

impl<R: Record> CriteriaMatcher<R> {
    /// 使用默认配置创建匹配器：不过期的缓存、跳过失败规则、5 秒拉取超时
    pub fn new(source: Arc<dyn RuleSource>) -> Self {
        Self {
            source,
            cache: Arc::new(RuleCache::new()),
            predicates: PredicateStore::new(Arc::new(R::schema())),
            pruned_generation: AtomicU64::new(0),
            failure_policy: FailurePolicy::default(),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    /// 按应用配置创建匹配器
    pub fn from_config(source: Arc<dyn RuleSource>, config: &AppConfig) -> Self {
        Self::new(source)
            .with_cache(Arc::new(RuleCache::with_ttl(config.cache.ttl())))
            .with_failure_policy(config.matcher.failure_policy)
            .with_fetch_timeout(config.source.fetch_timeout())
    }

    /// 使用外部的规则缓存（多个匹配器可共享同一份规则集）
    pub fn with_cache(mut self, cache: Arc<RuleCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn cache(&self) -> &RuleCache {
        &self.cache
    }

    pub fn predicates(&self) -> &PredicateStore<R> {
        &self.predicates
    }

    /// 在指定时刻匹配一条记录
    #[instrument(skip(self, record), fields(policy = ?self.failure_policy))]
    pub async fn match_at(&self, record: R, now: DateTime<Utc>) -> Result<MatchResult<R>> {
        let start = Instant::now();

        let rules = match self.load_rules().await {
            Ok(rules) => rules,
            Err(e) => {
                obs_metrics::record_match("error", 0, start.elapsed().as_secs_f64());
                error!(error = %e, "加载活动规则失败");
                return Err(e.into());
            }
        };
        self.prune_predicates(&rules);

        let mut matched = Vec::new();
        let mut failures = Vec::new();
        let mut evaluated = 0usize;

        for campaign in rules.iter().filter(|c| c.is_applicable(now)) {
            evaluated += 1;

            match self.evaluate(campaign, &record) {
                Ok(true) => {
                    debug!(rule_id = %campaign.id, "规则命中");
                    matched.push(campaign.clone());
                }
                Ok(false) => {}
                Err(kind) => {
                    obs_metrics::record_rule_failure(kind.as_str());
                    warn!(
                        rule_id = %campaign.id,
                        rule_name = %campaign.name,
                        error = %kind,
                        "规则评估失败"
                    );

                    if self.failure_policy == FailurePolicy::Abort {
                        obs_metrics::record_match("error", 0, start.elapsed().as_secs_f64());
                        return Err(abort_error(campaign, kind));
                    }

                    failures.push(RuleFailure {
                        rule_id: campaign.id.clone(),
                        rule_name: campaign.name.clone(),
                        kind,
                    });
                }
            }
        }

        let duration = start.elapsed();
        obs_metrics::record_match("success", matched.len(), duration.as_secs_f64());
        info!(
            total = rules.len(),
            evaluated = evaluated,
            matched = matched.len(),
            failures = failures.len(),
            duration_ms = duration.as_millis() as u64,
            "活动匹配完成"
        );

        Ok(MatchResult::new(record, matched, failures))
    }

    /// 对单条规则求值
    fn evaluate(&self, campaign: &Campaign, record: &R) -> std::result::Result<bool, FailureKind> {
        let predicate = self
            .predicates
            .get_or_compile(campaign)
            .map_err(FailureKind::Parse)?;

        predicate.evaluate(record).map_err(FailureKind::Evaluation)
    }

    /// 缓存换上新快照后，清理已不在规则集中的谓词
    fn prune_predicates(&self, rules: &RuleSet) {
        let generation = self.cache.load_count();
        if self.pruned_generation.swap(generation, Ordering::AcqRel) != generation {
            self.predicates.retain_rules(rules);
        }
    }

    /// 通过缓存获取规则集，拉取受超时约束
    async fn load_rules(&self) -> std::result::Result<RuleSet, SourceError> {
        let source = Arc::clone(&self.source);
        let timeout = self.fetch_timeout;

        self.cache
            .get_or_load(|| async move {
                match tokio::time::timeout(timeout, source.fetch()).await {
                    Ok(result) => result,
                    Err(_) => Err(SourceError::Timeout(timeout)),
                }
            })
            .await
    }
}

#[async_trait]
impl<R: Record> Matcher<R> for CriteriaMatcher<R> {
    async fn match_record(&self, record: R) -> Result<MatchResult<R>> {
        self.match_at(record, Utc::now()).await
    }
}

fn abort_error(campaign: &Campaign, kind: FailureKind) -> MatchError {
    let rule_id = campaign.id.clone();
    match kind {
        FailureKind::Parse(source) => MatchError::Expression { rule_id, source },
        FailureKind::Evaluation(source) => MatchError::Evaluation { rule_id, source },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::car::{Car, Owner, demo_campaigns};
    use crate::error::{EvaluationError, ParseErrorKind};
    use crate::source::{MockRuleSource, StaticRuleSource};
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn toyota() -> Car {
        Car {
            make: "Toyota".to_string(),
            year: 2021,
            model_type: "SUV".to_string(),
            vin: "123ABC".to_string(),
            price: 35000.0,
            owner: Some(Owner {
                id: 15,
                name: "Linux Tovard".to_string(),
                age: 25,
            }),
        }
    }

    fn campaign(id: &str, expression: &str) -> Campaign {
        let now = Utc::now();
        Campaign::new(
            format!("campaign-{}", id),
            expression,
            now - ChronoDuration::days(1),
            now + ChronoDuration::days(1),
        )
        .with_id(id)
    }

    fn matcher_with(campaigns: Vec<Campaign>) -> CriteriaMatcher<Car> {
        CriteriaMatcher::new(Arc::new(StaticRuleSource::new(campaigns)))
    }

    #[tokio::test]
    async fn test_demo_campaigns_match_toyota() {
        let matcher = matcher_with(demo_campaigns(Utc::now()));

        let result = matcher.match_record(toyota()).await.unwrap();

        assert!(result.is_match);
        assert_eq!(result.matched_names(), vec!["Toyota SUV Campaign"]);
        assert!(!result.has_failures());
        assert_eq!(result.record, toyota());
    }

    #[tokio::test]
    async fn test_source_fetched_once_across_calls() {
        let mut source = MockRuleSource::new();
        source
            .expect_fetch()
            .times(1)
            .returning(|| Ok(demo_campaigns(Utc::now())));

        let matcher = Arc::new(CriteriaMatcher::<Car>::new(Arc::new(source)));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let matcher = Arc::clone(&matcher);
                tokio::spawn(async move { matcher.match_record(toyota()).await })
            })
            .collect();

        for result in futures::future::join_all(tasks).await {
            assert!(result.unwrap().unwrap().is_match);
        }
        assert_eq!(matcher.cache().load_count(), 1);
        assert_eq!(matcher.predicates().len(), 2);
    }

    #[tokio::test]
    async fn test_source_failure_is_fatal_and_retried() {
        let calls = AtomicUsize::new(0);
        let mut source = MockRuleSource::new();
        source.expect_fetch().times(2).returning(move || {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(SourceError::Unavailable("connection refused".to_string()))
            } else {
                Ok(demo_campaigns(Utc::now()))
            }
        });

        let matcher = CriteriaMatcher::<Car>::new(Arc::new(source));

        let err = matcher.match_record(toyota()).await.unwrap_err();
        assert_eq!(err.code(), "SOURCE_UNAVAILABLE");
        assert!(!matcher.cache().is_loaded());

        let result = matcher.match_record(toyota()).await.unwrap();
        assert!(result.is_match);
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let source = StaticRuleSource::new(demo_campaigns(Utc::now()))
            .with_latency(Duration::from_millis(500));
        let matcher = CriteriaMatcher::<Car>::new(Arc::new(source))
            .with_fetch_timeout(Duration::from_millis(20));

        let err = matcher.match_record(toyota()).await.unwrap_err();
        assert!(matches!(err, MatchError::Source(SourceError::Timeout(_))));
        assert!(!matcher.cache().is_loaded());
    }

    #[tokio::test]
    async fn test_reload_prunes_removed_rules() {
        let calls = AtomicUsize::new(0);
        let mut source = MockRuleSource::new();
        source.expect_fetch().times(2).returning(move || {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(vec![
                    campaign("1", r#"Make == "Toyota""#),
                    campaign("2", "Year > 2000"),
                ])
            } else {
                Ok(vec![campaign("2", "Year > 2000")])
            }
        });

        let matcher = CriteriaMatcher::<Car>::new(Arc::new(source));

        matcher.match_record(toyota()).await.unwrap();
        assert!(matcher.predicates().contains("1"));
        assert!(matcher.predicates().contains("2"));

        matcher.cache().invalidate();
        let result = matcher.match_record(toyota()).await.unwrap();

        assert_eq!(result.matched_names(), vec!["campaign-2"]);
        assert!(!matcher.predicates().contains("1"));
        assert!(matcher.predicates().contains("2"));
        assert_eq!(matcher.predicates().len(), 1);
    }

    #[tokio::test]
    async fn test_deeply_nested_rule_is_skipped() {
        let negations = format!("{}true", "!".repeat(5000));
        let matcher = matcher_with(vec![
            campaign("deep", &negations),
            campaign("ok", r#"Make == "Toyota""#),
        ]);

        let result = matcher.match_record(toyota()).await.unwrap();

        assert_eq!(result.matched_names(), vec!["campaign-ok"]);
        assert_eq!(result.failures.len(), 1);
        assert!(matches!(
            &result.failures[0].kind,
            FailureKind::Parse(e) if matches!(e.kind, ParseErrorKind::Syntax { .. })
        ));
    }

    #[tokio::test]
    async fn test_skip_policy_records_failures() {
        let matcher = matcher_with(vec![
            campaign("broken", "Make =="),
            campaign("unknown", r#"Colour == "red""#),
            campaign("ok", r#"Make == "Toyota""#),
        ]);

        let result = matcher.match_record(toyota()).await.unwrap();

        assert!(result.is_match);
        assert_eq!(result.matched_names(), vec!["campaign-ok"]);
        assert_eq!(result.failures.len(), 2);
        assert_eq!(result.failures[0].rule_id, "broken");
        assert!(matches!(
            &result.failures[1].kind,
            FailureKind::Parse(e) if e.kind == ParseErrorKind::UnknownField("Colour".to_string())
        ));
    }

    #[tokio::test]
    async fn test_abort_policy_stops_at_first_failure() {
        let matcher = matcher_with(vec![
            campaign("ok", r#"Make == "Toyota""#),
            campaign("broken", "   "),
            campaign("later", "Year > 2000"),
        ])
        .with_failure_policy(FailurePolicy::Abort);

        let err = matcher.match_record(toyota()).await.unwrap_err();

        match err {
            MatchError::Expression { rule_id, source } => {
                assert_eq!(rule_id, "broken");
                assert_eq!(source.kind, ParseErrorKind::Empty);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!matcher.predicates().contains("later"));
    }

    #[tokio::test]
    async fn test_absent_owner_is_reported_not_matched() {
        let matcher = matcher_with(vec![campaign("owner", "Owner.ID == 15")]);
        let mut car = toyota();
        car.owner = None;

        let result = matcher.match_record(car).await.unwrap();

        assert!(!result.is_match);
        assert_eq!(result.failures.len(), 1);
        assert!(matches!(
            &result.failures[0].kind,
            FailureKind::Evaluation(EvaluationError::NullReference { path }) if path == "Owner.ID"
        ));
    }

    #[tokio::test]
    async fn test_absent_owner_aborts_under_abort_policy() {
        let matcher = matcher_with(vec![campaign("owner", "Owner.ID == 15")])
            .with_failure_policy(FailurePolicy::Abort);
        let mut car = toyota();
        car.owner = None;

        let err = matcher.match_record(car).await.unwrap_err();
        assert_eq!(err.code(), "EVALUATION_FAILED");
    }

    #[tokio::test]
    async fn test_inactive_and_out_of_window_rules_are_skipped() {
        let now = Utc::now();
        let expired = Campaign::new(
            "expired",
            r#"Make == "Toyota""#,
            now - ChronoDuration::days(10),
            now - ChronoDuration::days(1),
        )
        .with_id("expired");
        let upcoming = Campaign::new(
            "upcoming",
            r#"Make == "Toyota""#,
            now + ChronoDuration::days(1),
            now + ChronoDuration::days(10),
        )
        .with_id("upcoming");
        let inactive = campaign("inactive", "not a valid expression ((").inactive();

        let matcher = matcher_with(vec![expired, upcoming, inactive]);
        let result = matcher.match_at(toyota(), now).await.unwrap();

        assert!(!result.is_match);
        assert!(!result.has_failures());
        assert!(matcher.predicates().is_empty());
    }

    #[tokio::test]
    async fn test_window_bounds_are_inclusive() {
        let now = Utc::now();
        let rule = Campaign::new("edge", "Year >= 2020", now, now + ChronoDuration::hours(1));
        let matcher = matcher_with(vec![rule]);

        assert!(matcher.match_at(toyota(), now).await.unwrap().is_match);
        assert!(
            matcher
                .match_at(toyota(), now + ChronoDuration::hours(1))
                .await
                .unwrap()
                .is_match
        );
        assert!(
            !matcher
                .match_at(toyota(), now - ChronoDuration::milliseconds(1))
                .await
                .unwrap()
                .is_match
        );
    }

    #[tokio::test]
    async fn test_matches_keep_rule_order() {
        let matcher = matcher_with(vec![
            campaign("c", "Year > 2000"),
            campaign("a", "Price > 1"),
            campaign("miss", "Price < 1"),
            campaign("b", r#"VIN.StartsWith("123")"#),
        ]);

        let result = matcher.match_record(toyota()).await.unwrap();
        assert_eq!(
            result.matched_names(),
            vec!["campaign-c", "campaign-a", "campaign-b"]
        );
    }

    #[tokio::test]
    async fn test_from_config() {
        let mut config = AppConfig::default();
        config.matcher.failure_policy = FailurePolicy::Abort;
        config.cache.ttl_seconds = Some(60);

        let matcher = CriteriaMatcher::<Car>::from_config(
            Arc::new(StaticRuleSource::new(vec![campaign("bad", "")])),
            &config,
        );

        assert!(matcher.match_record(toyota()).await.is_err());
    }
}
