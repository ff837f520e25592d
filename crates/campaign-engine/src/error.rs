//! 活动引擎错误类型

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// 表达式解析失败的具体原因
#[derive(Debug, Clone, PartialEq)]
pub enum ParseErrorKind {
    /// 表达式为空或只包含空白
    Empty,
    /// 语法错误，position 为字节偏移
    Syntax { position: usize, message: String },
    /// 字段路径在记录结构中不存在
    UnknownField(String),
    /// 操作数类型与操作符不兼容
    TypeMismatch { expected: String, actual: String },
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "表达式不能为空"),
            Self::Syntax { position, message } => {
                write!(f, "语法错误 (位置 {}): {}", position, message)
            }
            Self::UnknownField(path) => write!(f, "字段不存在: {}", path),
            Self::TypeMismatch { expected, actual } => {
                write!(f, "类型不匹配: 期望 {}, 实际 {}", expected, actual)
            }
        }
    }
}

/// 表达式解析错误
///
/// 携带原始表达式文本，便于定位是哪条活动规则写错了。
#[derive(Debug, Clone, Error)]
#[error("表达式解析失败 '{expression}': {kind}")]
pub struct ExpressionParseError {
    pub expression: String,
    pub kind: ParseErrorKind,
}

impl ExpressionParseError {
    pub fn new(expression: impl Into<String>, kind: ParseErrorKind) -> Self {
        Self {
            expression: expression.into(),
            kind,
        }
    }
}

/// 谓词对具体记录求值时的错误
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    #[error("空引用: 字段路径 '{path}' 经过了缺失的嵌套对象")]
    NullReference { path: String },
}

/// 规则源错误
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("规则源不可用: {0}")]
    Unavailable(String),

    #[error("规则源超时: {0:?}")]
    Timeout(Duration),
}

/// 匹配调用的致命错误
#[derive(Debug, Clone, Error)]
pub enum MatchError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("规则 {rule_id} 编译失败: {source}")]
    Expression {
        rule_id: String,
        #[source]
        source: ExpressionParseError,
    },

    #[error("规则 {rule_id} 求值失败: {source}")]
    Evaluation {
        rule_id: String,
        #[source]
        source: EvaluationError,
    },
}

impl MatchError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Source(SourceError::Unavailable(_)) => "SOURCE_UNAVAILABLE",
            Self::Source(SourceError::Timeout(_)) => "SOURCE_TIMEOUT",
            Self::Expression { .. } => "EXPRESSION_PARSE_FAILED",
            Self::Evaluation { .. } => "EVALUATION_FAILED",
        }
    }
}

pub type Result<T> = std::result::Result<T, MatchError>;
