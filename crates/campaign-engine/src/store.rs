//! 编译后谓词存储
//!
//! 使用 DashMap 按规则 ID 缓存编译结果，表达式文本不变时不会重复编译。
//! 编译失败同样会被缓存，坏规则不会在每次匹配时反复解析。

use crate::compiler::{CompiledPredicate, ExpressionCompiler};
use crate::error::ExpressionParseError;
use crate::models::Campaign;
use crate::record::RecordSchema;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

type CompileResult<R> = Result<CompiledPredicate<R>, ExpressionParseError>;

/// 一条规则的编译结果
struct StoredPredicate<R> {
    /// 编译时的表达式文本，用于判断规则是否被修改
    expression: String,
    compiled: CompileResult<R>,
}

/// 谓词存储
pub struct PredicateStore<R> {
    predicates: Arc<DashMap<String, Arc<StoredPredicate<R>>>>,
    compiler: ExpressionCompiler<R>,
}

impl<R> Clone for PredicateStore<R> {
    fn clone(&self) -> Self {
        Self {
            predicates: Arc::clone(&self.predicates),
            compiler: self.compiler.clone(),
        }
    }
}

impl<R> PredicateStore<R> {
    pub fn new(schema: Arc<RecordSchema<R>>) -> Self {
        Self {
            predicates: Arc::new(DashMap::new()),
            compiler: ExpressionCompiler::new(schema),
        }
    }

    /// 获取规则的谓词，不存在或表达式已变化时编译
    ///
    /// 同一规则的并发编译以先写入者为准。
    #[instrument(skip(self, campaign), fields(rule_id = %campaign.id))]
    pub fn get_or_compile(&self, campaign: &Campaign) -> CompileResult<R> {
        if let Some(stored) = self.predicates.get(&campaign.id) {
            if stored.expression == campaign.expression {
                return stored.compiled.clone();
            }
        }

        let stored = self
            .predicates
            .entry(campaign.id.clone())
            .and_modify(|stored| {
                if stored.expression != campaign.expression {
                    info!("规则表达式已变更，重新编译");
                    *stored = Arc::new(self.compile(campaign));
                }
            })
            .or_insert_with(|| Arc::new(self.compile(campaign)))
            .value()
            .clone();

        stored.compiled.clone()
    }

    fn compile(&self, campaign: &Campaign) -> StoredPredicate<R> {
        let compiled = self.compiler.compile(&campaign.expression);
        match &compiled {
            Ok(predicate) => debug!(
                rule_name = %campaign.name,
                fields = predicate.required_fields().len(),
                "规则表达式已编译"
            ),
            Err(e) => warn!(rule_name = %campaign.name, error = %e, "规则表达式编译失败"),
        }

        StoredPredicate {
            expression: campaign.expression.clone(),
            compiled,
        }
    }

    /// 获取当前存储的规则数量
    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    /// 检查存储是否为空
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// 检查规则是否已编译
    pub fn contains(&self, rule_id: &str) -> bool {
        self.predicates.contains_key(rule_id)
    }

    /// 移除单条规则的编译结果
    pub fn remove(&self, rule_id: &str) -> bool {
        self.predicates.remove(rule_id).is_some()
    }

    /// 只保留仍存在于规则集中的规则，返回被清理的条数
    ///
    /// 规则集重新加载后调用，已删除规则的编译结果（包括缓存的失败）随之释放。
    pub fn retain_rules(&self, campaigns: &[Campaign]) -> usize {
        let live: HashSet<&str> = campaigns.iter().map(|c| c.id.as_str()).collect();
        let before = self.predicates.len();
        self.predicates.retain(|id, _| live.contains(id.as_str()));

        let removed = before.saturating_sub(self.predicates.len());
        if removed > 0 {
            info!(removed = removed, remaining = self.predicates.len(), "已清理失效规则的编译结果");
        }
        removed
    }

    /// 清空所有编译结果
    #[instrument(skip(self))]
    pub fn clear(&self) {
        let count = self.predicates.len();
        self.predicates.clear();
        info!("已清空 {} 条编译结果", count);
    }

    /// 获取存储统计信息
    pub fn stats(&self) -> PredicateStoreStats {
        let mut stats = PredicateStoreStats::default();

        for entry in self.predicates.iter() {
            stats.predicates_count += 1;
            match &entry.compiled {
                Ok(predicate) => stats.total_fields += predicate.required_fields().len(),
                Err(_) => stats.failed_count += 1,
            }
        }

        let compiled = stats.predicates_count - stats.failed_count;
        if compiled > 0 {
            stats.avg_fields_per_predicate = stats.total_fields as f64 / compiled as f64;
        }
        stats
    }
}

/// 谓词存储统计信息
#[derive(Debug, Clone, Default)]
pub struct PredicateStoreStats {
    /// 已缓存的规则总数（包括编译失败的）
    pub predicates_count: usize,
    /// 编译失败的规则数
    pub failed_count: usize,
    /// 所有成功编译的谓词使用的字段总数
    pub total_fields: usize,
    /// 平均每个谓词使用的字段数
    pub avg_fields_per_predicate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::car::Car;
    use crate::error::ParseErrorKind;
    use crate::record::Record;
    use chrono::Utc;

    fn store() -> PredicateStore<Car> {
        PredicateStore::new(Arc::new(Car::schema()))
    }

    fn campaign(id: &str, expression: &str) -> Campaign {
        let now = Utc::now();
        Campaign::new(format!("campaign-{}", id), expression, now, now).with_id(id)
    }

    #[test]
    fn test_compile_once_per_rule() {
        let store = store();
        let rule = campaign("1", r#"Make == "Toyota" && Year >= 2020"#);

        let first = store.get_or_compile(&rule).unwrap();
        let second = store.get_or_compile(&rule).unwrap();

        assert_eq!(store.len(), 1);
        assert!(store.contains("1"));
        assert_eq!(first.expression(), second.expression());
    }

    #[test]
    fn test_changed_expression_recompiles() {
        let store = store();
        store.get_or_compile(&campaign("1", "Year >= 2020")).unwrap();

        let updated = store.get_or_compile(&campaign("1", "Price <= 30000")).unwrap();

        assert_eq!(updated.expression(), "Price <= 30000");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_parse_failures_are_cached() {
        let store = store();
        let broken = campaign("bad", "Colour == \"red\"");

        let err = store.get_or_compile(&broken).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnknownField("Colour".to_string()));

        assert!(store.get_or_compile(&broken).is_err());
        let stats = store.stats();
        assert_eq!(stats.predicates_count, 1);
        assert_eq!(stats.failed_count, 1);
    }

    #[test]
    fn test_remove_and_clear() {
        let store = store();
        store.get_or_compile(&campaign("1", "Year > 1")).unwrap();
        store.get_or_compile(&campaign("2", "Year > 2")).unwrap();

        assert!(store.remove("1"));
        assert!(!store.remove("1"));
        assert_eq!(store.len(), 1);

        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn test_retain_rules_drops_stale_entries() {
        let store = store();
        store.get_or_compile(&campaign("1", "Year > 1")).unwrap();
        store.get_or_compile(&campaign("2", "Year > 2")).unwrap();
        store.get_or_compile(&campaign("bad", "Colour == 1")).unwrap_err();

        let removed = store.retain_rules(&[campaign("2", "Year > 2")]);

        assert_eq!(removed, 2);
        assert!(!store.contains("1"));
        assert!(!store.contains("bad"));
        assert!(store.contains("2"));
        assert_eq!(store.retain_rules(&[campaign("2", "Year > 2")]), 0);
    }

    #[test]
    fn test_stats() {
        let store = store();
        store
            .get_or_compile(&campaign("1", r#"Make == "Toyota" && Year >= 2020"#))
            .unwrap();
        store
            .get_or_compile(&campaign("2", r#"Type == "SUV" && Owner.ID == 15"#))
            .unwrap();

        let stats = store.stats();

        assert_eq!(stats.predicates_count, 2);
        assert_eq!(stats.total_fields, 4);
        assert_eq!(stats.avg_fields_per_predicate, 2.0);
    }

    #[test]
    fn test_concurrent_access() {
        use std::thread;

        let store = store();
        let store_clone = store.clone();

        let handle = thread::spawn(move || {
            for i in 0..100 {
                store_clone
                    .get_or_compile(&campaign(&i.to_string(), "Year >= 2020"))
                    .unwrap();
            }
        });

        for i in 50..150 {
            store
                .get_or_compile(&campaign(&i.to_string(), "Year >= 2020"))
                .unwrap();
        }

        handle.join().unwrap();

        assert_eq!(store.len(), 150);
    }
}
