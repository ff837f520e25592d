//! 活动引擎领域模型

use crate::error::{EvaluationError, ExpressionParseError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 活动规则定义
///
/// 表达式来自外部配置，视为不可信输入；有效期为闭区间 `[valid_from, valid_to]`（UTC）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub name: String,
    #[serde(alias = "expressionString")]
    pub expression: String,
    #[serde(alias = "validFrom")]
    pub valid_from: DateTime<Utc>,
    #[serde(alias = "validTo")]
    pub valid_to: DateTime<Utc>,
    /// 缺省为未启用，未显式启用的规则不会参与匹配
    #[serde(alias = "isActive", default)]
    pub is_active: bool,
}

impl Campaign {
    pub fn new(
        name: impl Into<String>,
        expression: impl Into<String>,
        valid_from: DateTime<Utc>,
        valid_to: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            expression: expression.into(),
            valid_from,
            valid_to,
            is_active: true,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// 给定时刻是否落在有效期内（两端包含）
    pub fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        self.valid_from <= now && now <= self.valid_to
    }

    /// 是否在给定时刻参与匹配
    pub fn is_applicable(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.is_within_window(now)
    }

    /// 有效期起点晚于终点，这样的规则永远不会生效
    pub fn has_inverted_window(&self) -> bool {
        self.valid_from > self.valid_to
    }
}

/// 单条规则的失败原因
#[derive(Debug, Clone)]
pub enum FailureKind {
    Parse(ExpressionParseError),
    Evaluation(EvaluationError),
}

impl FailureKind {
    /// 用于指标标签
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parse(_) => "parse",
            Self::Evaluation(_) => "evaluation",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(e) => write!(f, "{}", e),
            Self::Evaluation(e) => write!(f, "{}", e),
        }
    }
}

/// 被跳过的规则
#[derive(Debug, Clone)]
pub struct RuleFailure {
    pub rule_id: String,
    pub rule_name: String,
    pub kind: FailureKind,
}

/// 匹配结果
#[derive(Debug, Clone)]
pub struct MatchResult<R> {
    /// 被评估的记录
    pub record: R,
    /// 命中的活动，按规则集合中的顺序排列
    pub matched: Vec<Campaign>,
    /// 是否至少命中一条活动
    pub is_match: bool,
    /// 跳过的规则及原因
    pub failures: Vec<RuleFailure>,
}

impl<R> MatchResult<R> {
    pub fn new(record: R, matched: Vec<Campaign>, failures: Vec<RuleFailure>) -> Self {
        let is_match = !matched.is_empty();
        Self {
            record,
            matched,
            is_match,
            failures,
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// 命中活动的名称
    pub fn matched_names(&self) -> Vec<&str> {
        self.matched.iter().map(|c| c.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_window_is_inclusive() {
        let now = Utc::now();
        let campaign = Campaign::new("c", "Year > 1", now, now + Duration::days(1));

        assert!(campaign.is_within_window(now));
        assert!(campaign.is_within_window(now + Duration::days(1)));
        assert!(!campaign.is_within_window(now - Duration::seconds(1)));
        assert!(!campaign.is_within_window(now + Duration::days(1) + Duration::seconds(1)));
    }

    #[test]
    fn test_inactive_campaign_is_not_applicable() {
        let now = Utc::now();
        let campaign = Campaign::new("c", "Year > 1", now - Duration::days(1), now + Duration::days(1));
        assert!(campaign.is_applicable(now));
        assert!(!campaign.inactive().is_applicable(now));
    }

    #[test]
    fn test_inverted_window_never_applies() {
        let now = Utc::now();
        let campaign = Campaign::new("c", "Year > 1", now + Duration::days(1), now - Duration::days(1));
        assert!(campaign.has_inverted_window());
        assert!(!campaign.is_applicable(now));
    }

    #[test]
    fn test_deserialize_camel_case_aliases() {
        let json = r#"{
            "id": "1",
            "name": "Toyota SUV Promo",
            "expressionString": "Make == \"Toyota\"",
            "validFrom": "2024-01-01T00:00:00Z",
            "validTo": "2024-12-31T23:59:59Z",
            "isActive": false
        }"#;
        let campaign: Campaign = serde_json::from_str(json).unwrap();
        assert_eq!(campaign.expression, r#"Make == "Toyota""#);
        assert!(!campaign.is_active);
        assert!(campaign.valid_from < campaign.valid_to);
    }

    #[test]
    fn test_deserialize_missing_flag_is_inactive() {
        let json = r#"{
            "id": "2",
            "name": "n",
            "expression": "Year > 2000",
            "valid_from": "2024-01-01T00:00:00Z",
            "valid_to": "2024-12-31T23:59:59Z"
        }"#;
        let campaign: Campaign = serde_json::from_str(json).unwrap();
        assert!(!campaign.is_active);
        assert!(!campaign.is_applicable("2024-06-01T00:00:00Z".parse().unwrap()));
    }

    #[test]
    fn test_match_result_flag_follows_matches() {
        let now = Utc::now();
        let empty: MatchResult<()> = MatchResult::new((), vec![], vec![]);
        assert!(!empty.is_match);

        let hit = MatchResult::new((), vec![Campaign::new("c", "x", now, now)], vec![]);
        assert!(hit.is_match);
        assert_eq!(hit.matched_names(), vec!["c"]);
        assert!(!hit.has_failures());
    }
}
