//! 记录结构描述
//!
//! 引擎对被匹配的记录类型保持泛型。每种记录类型通过实现 [`Record`] 显式注册
//! 自己的字段表（字段路径 -> 类型 + 取值函数），编译器据此解析表达式中的字段名，
//! 不依赖任何运行时反射。

use crate::lexer::is_reserved_word;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// 字段的静态类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    String,
    Integer,
    Decimal,
    Boolean,
}

impl FieldKind {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Decimal)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Decimal => "decimal",
            Self::Boolean => "boolean",
        };
        write!(f, "{}", s)
    }
}

/// 从记录中取出的字段值，字符串借用自记录本身
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    Null,
    Bool(bool),
    Int(i64),
    Decimal(f64),
    Str(&'a str),
}

impl FieldValue<'_> {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// 数值统一转为 f64，用于整数与小数混合比较
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Decimal(_) => "decimal",
            Self::Str(_) => "string",
        }
    }
}

impl<'a> From<&'a str> for FieldValue<'a> {
    fn from(s: &'a str) -> Self {
        Self::Str(s)
    }
}

impl<'a> From<&'a String> for FieldValue<'a> {
    fn from(s: &'a String) -> Self {
        Self::Str(s.as_str())
    }
}

impl From<i64> for FieldValue<'_> {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for FieldValue<'_> {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<u32> for FieldValue<'_> {
    fn from(i: u32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for FieldValue<'_> {
    fn from(d: f64) -> Self {
        Self::Decimal(d)
    }
}

impl From<bool> for FieldValue<'_> {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl<'a, T: Into<FieldValue<'a>>> From<Option<T>> for FieldValue<'a> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// 类型擦除后的取值函数
///
/// 返回 `None` 表示路径途经的嵌套对象缺失（空引用），
/// 与字段本身为空值的 `Some(FieldValue::Null)` 区分开。
pub type Accessor<R> = Arc<dyn for<'a> Fn(&'a R) -> Option<FieldValue<'a>> + Send + Sync>;

fn erase<R, F>(f: F) -> Accessor<R>
where
    F: for<'a> Fn(&'a R) -> Option<FieldValue<'a>> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// 已注册的字段
pub struct FieldDef<R> {
    pub kind: FieldKind,
    pub accessor: Accessor<R>,
}

impl<R> Clone for FieldDef<R> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            accessor: Arc::clone(&self.accessor),
        }
    }
}

impl<R> fmt::Debug for FieldDef<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDef").field("kind", &self.kind).finish()
    }
}

/// 记录类型的字段表
///
/// 键为区分大小写的字段路径，嵌套字段以点号连接（如 `Owner.ID`）。
pub struct RecordSchema<R> {
    type_name: &'static str,
    fields: BTreeMap<String, FieldDef<R>>,
}

impl<R: 'static> RecordSchema<R> {
    pub fn new(type_name: &'static str) -> Self {
        Self {
            type_name,
            fields: BTreeMap::new(),
        }
    }

    /// 注册一个基本类型字段
    pub fn field<F>(mut self, name: &str, kind: FieldKind, get: F) -> Self
    where
        F: for<'a> Fn(&'a R) -> FieldValue<'a> + Send + Sync + 'static,
    {
        if is_reserved_word(name) {
            warn!(record = self.type_name, field = name, "字段名与保留字冲突，已忽略");
            return self;
        }

        let accessor = erase(move |record: &R| Some(get(record)));
        self.fields
            .insert(name.to_string(), FieldDef { kind, accessor });
        self
    }

    /// 注册一个嵌套对象，其全部字段以 `prefix.` 为前缀展开
    ///
    /// `get` 返回 `None` 时，经由该对象的所有字段读取都视为空引用。
    pub fn nested<N, G>(mut self, prefix: &str, get: G) -> Self
    where
        N: Record,
        G: for<'a> Fn(&'a R) -> Option<&'a N> + Send + Sync + 'static,
    {
        if is_reserved_word(prefix) {
            warn!(record = self.type_name, field = prefix, "嵌套对象名与保留字冲突，已忽略");
            return self;
        }

        let get = Arc::new(get);
        for (path, def) in N::schema().fields {
            let get = Arc::clone(&get);
            let inner = def.accessor;
            let accessor = erase(move |record: &R| (*get)(record).and_then(|n| (*inner)(n)));
            self.fields.insert(
                format!("{}.{}", prefix, path),
                FieldDef {
                    kind: def.kind,
                    accessor,
                },
            );
        }
        self
    }
}

impl<R> RecordSchema<R> {
    /// 按路径查找字段（精确匹配，区分大小写）
    pub fn resolve(&self, path: &str) -> Option<&FieldDef<R>> {
        self.fields.get(path)
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// 所有已注册的字段路径（有序）
    pub fn field_paths(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<R> fmt::Debug for RecordSchema<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordSchema")
            .field("type_name", &self.type_name)
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// 可被活动规则匹配的记录类型
///
/// 字段名和嵌套对象名不能是保留字 `and`、`or`、`not`、`true`、`false`、`null`
/// （不区分大小写），注册时会被忽略。
pub trait Record: Send + Sync + Sized + 'static {
    /// 构建该类型的字段表，每个匹配器只调用一次
    fn schema() -> RecordSchema<Self>;
}
