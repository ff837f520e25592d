//! 规则引擎入口
//!
//! 调用方只面对 [`RuleEngine`]，具体的匹配实现通过 [`Matcher`] 注入。

use crate::error::Result;
use crate::matcher::Matcher;
use crate::models::MatchResult;
use crate::record::Record;
use std::sync::Arc;
use tracing::instrument;

/// 规则引擎
pub struct RuleEngine<R: Record> {
    matcher: Arc<dyn Matcher<R>>,
}

impl<R: Record> Clone for RuleEngine<R> {
    fn clone(&self) -> Self {
        Self {
            matcher: Arc::clone(&self.matcher),
        }
    }
}

impl<R: Record> RuleEngine<R> {
    pub fn new(matcher: Arc<dyn Matcher<R>>) -> Self {
        Self { matcher }
    }

    /// 对记录执行全部活动规则
    #[instrument(skip_all)]
    pub async fn execute(&self, record: R) -> Result<MatchResult<R>> {
        self.matcher.match_record(record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{MatchError, SourceError};
    use crate::models::Campaign;
    use async_trait::async_trait;
    use chrono::Utc;

    #[derive(Debug)]
    struct Plate(String);

    impl Record for Plate {
        fn schema() -> crate::record::RecordSchema<Self> {
            crate::record::RecordSchema::<Self>::new("Plate").field(
                "Number",
                crate::record::FieldKind::String,
                |p| (&p.0).into(),
            )
        }
    }

    /// 固定返回结果的匹配器
    struct FixedMatcher {
        fail: bool,
    }

    #[async_trait]
    impl Matcher<Plate> for FixedMatcher {
        async fn match_record(&self, record: Plate) -> Result<MatchResult<Plate>> {
            if self.fail {
                return Err(SourceError::Unavailable("offline".to_string()).into());
            }
            let now = Utc::now();
            let matched = if record.0.starts_with("VIP") {
                vec![Campaign::new("vip", "Number.StartsWith(\"VIP\")", now, now)]
            } else {
                vec![]
            };
            Ok(MatchResult::new(record, matched, vec![]))
        }
    }

    #[tokio::test]
    async fn test_execute_delegates_to_matcher() {
        let engine: RuleEngine<Plate> = RuleEngine::new(Arc::new(FixedMatcher { fail: false }));

        let result = tokio_test::assert_ok!(engine.execute(Plate("VIP-001".to_string())).await);
        assert!(result.is_match);
        assert_eq!(result.record.0, "VIP-001");

        let result = engine.clone().execute(Plate("ABC".to_string())).await.unwrap();
        assert!(!result.is_match);
    }

    #[tokio::test]
    async fn test_execute_propagates_errors() {
        let engine: RuleEngine<Plate> = RuleEngine::new(Arc::new(FixedMatcher { fail: true }));

        let err = tokio_test::assert_err!(engine.execute(Plate("VIP".to_string())).await);
        assert!(matches!(err, MatchError::Source(SourceError::Unavailable(_))));
    }
}
