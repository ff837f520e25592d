//! 活动规则匹配引擎
//!
//! 把以字符串形式配置的活动规则表达式编译成可复用的谓词，并对任意记录类型求值：
//! - 手写的词法/语法分析器，语法封闭，不执行任何外部代码
//! - 按记录类型显式注册字段表，不依赖运行时反射
//! - 规则集缓存（single-flight 首次加载、可选 TTL）
//! - 按规则 ID 缓存编译结果
//! - 有效期过滤与失败策略（跳过或中止）

pub mod cache;
pub mod car;
pub mod compiler;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod lexer;
pub mod matcher;
pub mod models;
pub mod operators;
pub mod parser;
pub mod record;
pub mod source;
pub mod store;

pub use cache::{RuleCache, RuleSet};
pub use car::{Car, Owner, demo_campaigns};
pub use compiler::{CompiledPredicate, ExpressionCompiler};
pub use engine::RuleEngine;
pub use error::{
    EvaluationError, ExpressionParseError, MatchError, ParseErrorKind, Result, SourceError,
};
pub use evaluator::ValueComparator;
pub use matcher::{CriteriaMatcher, Matcher};
pub use models::{Campaign, FailureKind, MatchResult, RuleFailure};
pub use operators::{CompareOp, LogicalOperator, StringMethod};
pub use record::{FieldKind, FieldValue, Record, RecordSchema};
pub use source::{JsonFileRuleSource, RuleSource, StaticRuleSource};
pub use store::{PredicateStore, PredicateStoreStats};
