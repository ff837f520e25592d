//! 值比较器
//!
//! 实现比较操作符和字符串方法在字段值上的语义。
//! 操作数类型已由编译器检查，这里只处理运行时才能确定的情况（空值、数值精度）。

use crate::operators::{CompareOp, StringMethod};
use crate::record::FieldValue;
use std::cmp::Ordering;

/// 值比较器
pub struct ValueComparator;

impl ValueComparator {
    /// 比较两个值
    ///
    /// 空值只参与 `==` / `!=`，其余比较一律不成立。
    pub fn compare(lhs: FieldValue<'_>, op: CompareOp, rhs: FieldValue<'_>) -> bool {
        if lhs.is_null() || rhs.is_null() {
            let both_null = lhs.is_null() && rhs.is_null();
            return match op {
                CompareOp::Eq => both_null,
                CompareOp::Neq => !both_null,
                _ => false,
            };
        }

        if op == CompareOp::Eq || op == CompareOp::Neq {
            let equal = Self::eq(lhs, rhs);
            return if op == CompareOp::Eq { equal } else { !equal };
        }

        Self::ordering(lhs, rhs).is_some_and(|ord| op.holds(ord))
    }

    /// 字符串方法调用，任一侧为空值时不成立
    pub fn apply_method(method: StringMethod, target: FieldValue<'_>, argument: FieldValue<'_>) -> bool {
        match (target, argument) {
            (FieldValue::Str(haystack), FieldValue::Str(needle)) => method.apply(haystack, needle),
            _ => false,
        }
    }

    /// 相等比较
    fn eq(lhs: FieldValue<'_>, rhs: FieldValue<'_>) -> bool {
        match (lhs, rhs) {
            (FieldValue::Int(a), FieldValue::Int(b)) => a == b,
            (FieldValue::Str(a), FieldValue::Str(b)) => a == b,
            (FieldValue::Bool(a), FieldValue::Bool(b)) => a == b,
            // 整数与小数混合比较统一转为浮点数（如 100 == 100.0）
            _ => match (lhs.as_f64(), rhs.as_f64()) {
                (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON,
                _ => false,
            },
        }
    }

    /// 排序比较，类型不可比较时返回 None
    fn ordering(lhs: FieldValue<'_>, rhs: FieldValue<'_>) -> Option<Ordering> {
        match (lhs, rhs) {
            (FieldValue::Int(a), FieldValue::Int(b)) => Some(a.cmp(&b)),
            (FieldValue::Str(a), FieldValue::Str(b)) => Some(a.cmp(b)),
            _ => {
                let (a, b) = (lhs.as_f64()?, rhs.as_f64()?);
                a.partial_cmp(&b)
            }
        }
    }
}
