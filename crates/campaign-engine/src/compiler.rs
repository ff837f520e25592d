//! 表达式编译器
//!
//! 将活动规则的表达式字符串编译成可复用的谓词：解析语法树，按记录的字段表
//! 解析字段路径并做类型检查，生成直接持有取值函数的执行树。
//! 编译是纯函数，相同的表达式和字段表总是得到语义相同的谓词。

use crate::error::{EvaluationError, ExpressionParseError, ParseErrorKind};
use crate::evaluator::ValueComparator;
use crate::operators::{CompareOp, LogicalOperator, StringMethod};
use crate::parser::{self, Expr, Literal};
use crate::record::{Accessor, FieldKind, FieldValue, RecordSchema};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// 表达式最大字节长度
pub const MAX_EXPRESSION_LEN: usize = 4096;

/// 比较操作数
enum Operand<R> {
    Field { path: String, accessor: Accessor<R> },
    Const(Literal),
}

impl<R> Operand<R> {
    /// 读取操作数的值
    ///
    /// `lenient` 为真时，路径经过缺失的嵌套对象按空值处理（用于与 null 字面量比较）。
    fn read<'a>(&'a self, record: &'a R, lenient: bool) -> Result<FieldValue<'a>, EvaluationError> {
        match self {
            Self::Const(literal) => Ok(literal_value(literal)),
            Self::Field { path, accessor } => match (**accessor)(record) {
                Some(value) => Ok(value),
                None if lenient => Ok(FieldValue::Null),
                None => Err(EvaluationError::NullReference { path: path.clone() }),
            },
        }
    }

    fn is_null_literal(&self) -> bool {
        matches!(self, Self::Const(Literal::Null))
    }
}

fn literal_value(literal: &Literal) -> FieldValue<'_> {
    match literal {
        Literal::Str(s) => FieldValue::Str(s),
        Literal::Int(i) => FieldValue::Int(*i),
        Literal::Decimal(d) => FieldValue::Decimal(*d),
        Literal::Bool(b) => FieldValue::Bool(*b),
        Literal::Null => FieldValue::Null,
    }
}

/// 编译后的执行树节点
enum Node<R> {
    Const(bool),
    BoolField {
        path: String,
        accessor: Accessor<R>,
    },
    Not(Box<Node<R>>),
    Logical {
        op: LogicalOperator,
        lhs: Box<Node<R>>,
        rhs: Box<Node<R>>,
    },
    Compare {
        op: CompareOp,
        lhs: Operand<R>,
        rhs: Operand<R>,
    },
    Method {
        method: StringMethod,
        target: Operand<R>,
        argument: Operand<R>,
    },
}

impl<R> Node<R> {
    /// 短路求值
    fn evaluate(&self, record: &R) -> Result<bool, EvaluationError> {
        match self {
            Self::Const(b) => Ok(*b),
            Self::BoolField { path, accessor } => match (**accessor)(record) {
                Some(FieldValue::Bool(b)) => Ok(b),
                Some(_) => Ok(false),
                None => Err(EvaluationError::NullReference { path: path.clone() }),
            },
            Self::Not(inner) => inner.evaluate(record).map(|b| !b),
            Self::Logical { op, lhs, rhs } => match op {
                LogicalOperator::And => Ok(lhs.evaluate(record)? && rhs.evaluate(record)?),
                LogicalOperator::Or => Ok(lhs.evaluate(record)? || rhs.evaluate(record)?),
            },
            Self::Compare { op, lhs, rhs } => {
                let lenient = lhs.is_null_literal() || rhs.is_null_literal();
                let l = lhs.read(record, lenient)?;
                let r = rhs.read(record, lenient)?;
                Ok(ValueComparator::compare(l, *op, r))
            }
            Self::Method {
                method,
                target,
                argument,
            } => {
                let t = target.read(record, false)?;
                let a = argument.read(record, false)?;
                Ok(ValueComparator::apply_method(*method, t, a))
            }
        }
    }
}

/// 编译后的谓词
///
/// 不含内部可变状态，可以跨线程共享并反复调用。
pub struct CompiledPredicate<R> {
    expression: Arc<str>,
    root: Arc<Node<R>>,
    /// 表达式读取的全部字段路径
    required_fields: Arc<BTreeSet<String>>,
}

impl<R> CompiledPredicate<R> {
    /// 对记录求值
    pub fn evaluate(&self, record: &R) -> Result<bool, EvaluationError> {
        self.root.evaluate(record)
    }

    /// 原始表达式文本
    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn required_fields(&self) -> &BTreeSet<String> {
        &self.required_fields
    }
}

impl<R> Clone for CompiledPredicate<R> {
    fn clone(&self) -> Self {
        Self {
            expression: Arc::clone(&self.expression),
            root: Arc::clone(&self.root),
            required_fields: Arc::clone(&self.required_fields),
        }
    }
}

impl<R> fmt::Debug for CompiledPredicate<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledPredicate")
            .field("expression", &self.expression)
            .field("required_fields", &self.required_fields)
            .finish()
    }
}

/// 操作数的静态类型
#[derive(Debug, Clone, Copy, PartialEq)]
enum OperandType {
    Kind(FieldKind),
    Null,
}

impl fmt::Display for OperandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kind(kind) => write!(f, "{}", kind),
            Self::Null => write!(f, "null"),
        }
    }
}

/// 表达式编译器
///
/// 绑定到一种记录类型的字段表。
pub struct ExpressionCompiler<R> {
    schema: Arc<RecordSchema<R>>,
}

impl<R> Clone for ExpressionCompiler<R> {
    fn clone(&self) -> Self {
        Self {
            schema: Arc::clone(&self.schema),
        }
    }
}

impl<R> ExpressionCompiler<R> {
    pub fn new(schema: Arc<RecordSchema<R>>) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &RecordSchema<R> {
        &self.schema
    }

    /// 编译表达式
    pub fn compile(&self, expression: &str) -> Result<CompiledPredicate<R>, ExpressionParseError> {
        if expression.trim().is_empty() {
            return Err(ExpressionParseError::new(expression, ParseErrorKind::Empty));
        }

        if expression.len() > MAX_EXPRESSION_LEN {
            return Err(ExpressionParseError::new(
                expression,
                ParseErrorKind::Syntax {
                    position: MAX_EXPRESSION_LEN,
                    message: format!("表达式过长 ({} 字节, 上限 {})", expression.len(), MAX_EXPRESSION_LEN),
                },
            ));
        }

        let ast = parser::parse(expression).map_err(|e| {
            ExpressionParseError::new(
                expression,
                ParseErrorKind::Syntax {
                    position: e.position,
                    message: e.message,
                },
            )
        })?;

        let mut binder = Binder {
            schema: &self.schema,
            required_fields: BTreeSet::new(),
        };
        let root = binder
            .bind_bool(ast)
            .map_err(|kind| ExpressionParseError::new(expression, kind))?;

        Ok(CompiledPredicate {
            expression: Arc::from(expression),
            root: Arc::new(root),
            required_fields: Arc::new(binder.required_fields),
        })
    }
}

/// 把语法树绑定到字段表上，同时收集使用到的字段
struct Binder<'s, R> {
    schema: &'s RecordSchema<R>,
    required_fields: BTreeSet<String>,
}

impl<R> Binder<'_, R> {
    fn resolve(&mut self, path: String) -> Result<(FieldKind, Accessor<R>), ParseErrorKind> {
        let def = self
            .schema
            .resolve(&path)
            .ok_or_else(|| ParseErrorKind::UnknownField(path.clone()))?;
        let resolved = (def.kind, Arc::clone(&def.accessor));
        self.required_fields.insert(path);
        Ok(resolved)
    }

    /// 绑定一个必须产出布尔值的表达式
    fn bind_bool(&mut self, expr: Expr) -> Result<Node<R>, ParseErrorKind> {
        match expr {
            Expr::Literal(Literal::Bool(b)) => Ok(Node::Const(b)),
            Expr::Literal(other) => Err(mismatch("boolean", literal_type(&other))),
            Expr::Field { path, .. } => {
                let (kind, accessor) = self.resolve(path.clone())?;
                if kind != FieldKind::Boolean {
                    return Err(mismatch("boolean", OperandType::Kind(kind)));
                }
                Ok(Node::BoolField { path, accessor })
            }
            Expr::Not(inner) => Ok(Node::Not(Box::new(self.bind_bool(*inner)?))),
            Expr::Logical { op, lhs, rhs } => Ok(Node::Logical {
                op,
                lhs: Box::new(self.bind_bool(*lhs)?),
                rhs: Box::new(self.bind_bool(*rhs)?),
            }),
            Expr::Compare { op, lhs, rhs, .. } => {
                let (lhs, lhs_type) = self.bind_operand(*lhs)?;
                let (rhs, rhs_type) = self.bind_operand(*rhs)?;
                check_comparable(op, lhs_type, rhs_type)?;
                Ok(Node::Compare { op, lhs, rhs })
            }
            Expr::Method {
                method,
                target,
                argument,
                ..
            } => {
                let (target, target_type) = self.bind_operand(*target)?;
                let (argument, argument_type) = self.bind_operand(*argument)?;
                for ty in [target_type, argument_type] {
                    if ty != OperandType::Kind(FieldKind::String) {
                        return Err(mismatch(&format!("{} 的字符串操作数", method), ty));
                    }
                }
                Ok(Node::Method {
                    method,
                    target,
                    argument,
                })
            }
        }
    }

    /// 绑定比较操作数（字段或字面量）
    fn bind_operand(&mut self, expr: Expr) -> Result<(Operand<R>, OperandType), ParseErrorKind> {
        match expr {
            Expr::Literal(literal) => {
                let ty = literal_type(&literal);
                Ok((Operand::Const(literal), ty))
            }
            Expr::Field { path, .. } => {
                let (kind, accessor) = self.resolve(path.clone())?;
                Ok((Operand::Field { path, accessor }, OperandType::Kind(kind)))
            }
            _ => Err(ParseErrorKind::TypeMismatch {
                expected: "字段或字面量".to_string(),
                actual: "布尔表达式".to_string(),
            }),
        }
    }
}

fn literal_type(literal: &Literal) -> OperandType {
    match literal {
        Literal::Str(_) => OperandType::Kind(FieldKind::String),
        Literal::Int(_) => OperandType::Kind(FieldKind::Integer),
        Literal::Decimal(_) => OperandType::Kind(FieldKind::Decimal),
        Literal::Bool(_) => OperandType::Kind(FieldKind::Boolean),
        Literal::Null => OperandType::Null,
    }
}

fn mismatch(expected: &str, actual: OperandType) -> ParseErrorKind {
    ParseErrorKind::TypeMismatch {
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

/// 检查两个操作数能否用给定操作符比较
fn check_comparable(op: CompareOp, lhs: OperandType, rhs: OperandType) -> Result<(), ParseErrorKind> {
    use OperandType::*;

    match (lhs, rhs) {
        (Null, _) | (_, Null) => {
            if op.is_ordering() {
                return Err(mismatch(&format!("'{}' 的可排序操作数", op), Null));
            }
            Ok(())
        }
        (Kind(a), Kind(b)) if a.is_numeric() && b.is_numeric() => Ok(()),
        (Kind(FieldKind::String), Kind(FieldKind::String)) => Ok(()),
        (Kind(FieldKind::Boolean), Kind(FieldKind::Boolean)) => {
            if op.is_ordering() {
                return Err(mismatch(
                    &format!("'{}' 的可排序操作数", op),
                    Kind(FieldKind::Boolean),
                ));
            }
            Ok(())
        }
        (Kind(a), other) => Err(mismatch(&a.to_string(), other)),
    }
}
