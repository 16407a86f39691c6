use std::{any::Any, cmp::Ordering, fmt, sync::Arc};

use chrono::{DateTime, Utc};

use super::{Node, NodeError, NodePath, NodeResult};
use crate::expression::Expression;

/// The dynamically typed value slot of a [`Node`].
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    DateTime(DateTime<Utc>),
    Bytes(Vec<u8>),
    Path(NodePath),
    Node(Box<Node>),
    NodeList(Vec<Node>),
    Expression(Expression),
    Opaque(Opaque),
}

/// Shared reference to a host object carried through the tree untouched.
///
/// Cloning shares the object; two opaque values are equal only when they point
/// at the same allocation.
#[derive(Clone)]
pub struct Opaque {
    inner: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Opaque {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            inner: Arc::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    fn address(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opaque({})", self.type_name)
    }
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::String(_) => "string",
            Value::Integer(_) => "int",
            Value::Float(_) => "float",
            Value::Boolean(_) => "bool",
            Value::DateTime(_) => "date",
            Value::Bytes(_) => "bytes",
            Value::Path(_) => "path",
            Value::Node(_) => "node",
            Value::NodeList(_) => "node-list",
            Value::Expression(_) => "expression",
            Value::Opaque(_) => "opaque",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Value::Node(node) => Some(node),
            _ => None,
        }
    }

    pub fn as_expression(&self) -> Option<&Expression> {
        match self {
            Value::Expression(expression) => Some(expression),
            _ => None,
        }
    }

    /// Natural ordering used by node comparison and conditions.
    ///
    /// Null sorts below everything, integers and floats compare numerically,
    /// values of the same type use their own ordering and anything else falls
    /// back to comparing type names.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => compare_floats(*a, *b),
            (Value::Integer(a), Value::Float(b)) => compare_integer_float(*a, *b),
            (Value::Float(a), Value::Integer(b)) => compare_integer_float(*b, *a).reverse(),
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::Path(a), Value::Path(b)) => a.cmp(b),
            (Value::Node(a), Value::Node(b)) => a.as_ref().cmp(b.as_ref()),
            (Value::NodeList(a), Value::NodeList(b)) => a.cmp(b),
            (Value::Expression(a), Value::Expression(b)) => a.source().cmp(b.source()),
            (Value::Opaque(a), Value::Opaque(b)) => a
                .type_name()
                .cmp(b.type_name())
                .then_with(|| a.address().cmp(&b.address())),
            (a, b) => a.type_name().cmp(b.type_name()),
        }
    }
}

/// Numeric order with `-0.0 == 0.0`; NaN sorts past the infinity of its sign.
fn compare_floats(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or_else(|| a.total_cmp(&b))
}

/// Exact comparison without rounding the integer through `f64`.
fn compare_integer_float(integer: i64, float: f64) -> Ordering {
    // 2^63, the first float above i64::MAX
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if float.is_nan() {
        return if float.is_sign_negative() {
            Ordering::Greater
        } else {
            Ordering::Less
        };
    }
    if float >= LIMIT {
        return Ordering::Less;
    }
    if float < -LIMIT {
        return Ordering::Greater;
    }
    let whole = float.trunc();
    integer
        .cmp(&(whole as i64))
        .then_with(|| 0.0f64.partial_cmp(&(float - whole)).unwrap_or(Ordering::Equal))
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.compare(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::String(s) => write!(f, "{}", s),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::DateTime(d) => write!(f, "{}", d.to_rfc3339()),
            Value::Bytes(bytes) => {
                for b in bytes {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
            Value::Path(path) => write!(f, "{}", path),
            Value::Node(node) => write!(f, "{}", node.name),
            Value::NodeList(nodes) => {
                let names: Vec<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
                write!(f, "{}", names.join(","))
            }
            Value::Expression(expression) => write!(f, "{}", expression.source()),
            Value::Opaque(opaque) => write!(f, "[{}]", opaque.type_name()),
        }
    }
}

macro_rules! impl_from {
    ($ty:ty, $variant:ident) => {
        impl From<$ty> for Value {
            fn from(value: $ty) -> Self {
                Value::$variant(value)
            }
        }
    };
}

impl_from!(String, String);
impl_from!(i64, Integer);
impl_from!(f64, Float);
impl_from!(bool, Boolean);
impl_from!(DateTime<Utc>, DateTime);
impl_from!(Vec<u8>, Bytes);
impl_from!(NodePath, Path);
impl_from!(Vec<Node>, NodeList);
impl_from!(Expression, Expression);
impl_from!(Opaque, Opaque);

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value as i64)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Integer(value as i64)
    }
}

impl From<Node> for Value {
    fn from(node: Node) -> Self {
        Value::Node(Box::new(node))
    }
}

/// Typed extraction from a [`Value`], used by [`Node::value_as`].
///
/// Strings are parsed into the requested scalar type; other mismatches fail
/// with [`NodeError::TypeMismatch`].
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> NodeResult<Self>;
}

fn mismatch(expected: &'static str, value: &Value) -> NodeError {
    NodeError::TypeMismatch {
        expected,
        found: value.type_name(),
    }
}

fn parse_str<T: std::str::FromStr>(expected: &'static str, s: &str) -> NodeResult<T> {
    s.trim().parse::<T>().map_err(|_| NodeError::Conversion {
        value: s.to_string(),
        target: expected,
    })
}

impl FromValue for String {
    fn from_value(value: &Value) -> NodeResult<Self> {
        match value {
            Value::Null => Err(mismatch("string", value)),
            other => Ok(other.to_string()),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> NodeResult<Self> {
        match value {
            Value::Integer(i) => Ok(*i),
            Value::String(s) => parse_str("int", s),
            other => Err(mismatch("int", other)),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> NodeResult<Self> {
        match value {
            Value::Float(f) => Ok(*f),
            Value::Integer(i) => Ok(*i as f64),
            Value::String(s) => parse_str("float", s),
            other => Err(mismatch("float", other)),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> NodeResult<Self> {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::String(s) => parse_str("bool", s),
            other => Err(mismatch("bool", other)),
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: &Value) -> NodeResult<Self> {
        match value {
            Value::DateTime(d) => Ok(*d),
            Value::String(s) => parse_str("date", s),
            other => Err(mismatch("date", other)),
        }
    }
}

impl FromValue for NodePath {
    fn from_value(value: &Value) -> NodeResult<Self> {
        match value {
            Value::Path(path) => Ok(path.clone()),
            Value::String(s) => s.parse(),
            other => Err(mismatch("path", other)),
        }
    }
}
