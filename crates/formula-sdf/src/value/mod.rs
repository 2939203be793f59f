use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

mod function;

pub use function::FunctionValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Null,
    Div0,
    Value,
    Ref,
    Name,
    Num,
    NA,
    Calc,
    /// A call supplied a different number of arguments than the callee's arity.
    ArgCount,
    /// A call supplied more arguments than any sheet-defined function can accept.
    TooManyArgs,
    /// The callee was deleted; the stale index still answers with this error.
    Deleted,
    /// The callee is registered but its first compilation has not been installed yet.
    Pending,
}

impl ErrorKind {
    pub fn as_code(self) -> &'static str {
        match self {
            ErrorKind::Null => "#NULL!",
            ErrorKind::Div0 => "#DIV/0!",
            ErrorKind::Value => "#VALUE!",
            ErrorKind::Ref => "#REF!",
            ErrorKind::Name => "#NAME?",
            ErrorKind::Num => "#NUM!",
            ErrorKind::NA => "#N/A",
            ErrorKind::Calc => "#CALC!",
            ErrorKind::ArgCount => "#ARGCOUNT!",
            ErrorKind::TooManyArgs => "#TOOMANY!",
            ErrorKind::Deleted => "#DELETED!",
            ErrorKind::Pending => "#PENDING!",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

/// Row-major 2-D block of values.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    pub rows: usize,
    pub cols: usize,
    pub values: Vec<Value>,
}

impl Array {
    /// Returns `None` when `values` does not hold exactly `rows * cols` items.
    pub fn new(rows: usize, cols: usize, values: Vec<Value>) -> Option<Self> {
        if rows.checked_mul(cols)? != values.len() {
            return None;
        }
        Some(Self { rows, cols, values })
    }

    pub fn row(values: Vec<Value>) -> Self {
        Self {
            rows: 1,
            cols: values.len(),
            values,
        }
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&Value> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.values.get(row * self.cols + col)
    }

    /// True for a single row or a single column, the shapes accepted where a
    /// one-dimensional sequence is expected.
    pub fn is_vector(&self) -> bool {
        self.rows == 1 || self.cols == 1
    }
}

/// Opaque host object carried through spreadsheet values.
///
/// Equality is identity: two handles are equal only if they point at the same object.
#[derive(Clone)]
pub struct ObjectValue(pub Arc<dyn Any + Send + Sync>);

impl ObjectValue {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl PartialEq for ObjectValue {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ObjectValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectValue({:p})", Arc::as_ptr(&self.0))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
    Bool(bool),
    Blank,
    Error(ErrorKind),
    Array(Arc<Array>),
    Function(FunctionValue),
    Object(ObjectValue),
}

impl Value {
    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// `#N/A` marks an unbound argument of a [`FunctionValue`].
    pub fn is_unbound(&self) -> bool {
        matches!(self, Value::Error(ErrorKind::NA))
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Blank => Some(0.0),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => Some(*n != 0.0),
            Value::Blank => Some(false),
            _ => None,
        }
    }

    /// Structural identity used for memoization keys.
    ///
    /// Unlike `==`, numbers compare by bit pattern (with `-0.0 == 0.0`), so `NaN`
    /// arguments still hit the cache.
    pub fn same_as(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => number_bits(*a) == number_bits(*b),
            (Value::Array(a), Value::Array(b)) => {
                a.rows == b.rows
                    && a.cols == b.cols
                    && a.values
                        .iter()
                        .zip(b.values.iter())
                        .all(|(x, y)| x.same_as(y))
            }
            (Value::Function(a), Value::Function(b)) => a.same_as(b),
            _ => self == other,
        }
    }

    /// Hash consistent with [`Value::same_as`].
    pub fn hash_into<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Number(n) => number_bits(*n).hash(state),
            Value::Text(s) => s.hash(state),
            Value::Bool(b) => b.hash(state),
            Value::Blank => {}
            Value::Error(e) => e.hash(state),
            Value::Array(a) => {
                a.rows.hash(state);
                a.cols.hash(state);
                for v in &a.values {
                    v.hash_into(state);
                }
            }
            Value::Function(f) => f.hash_into(state),
            Value::Object(o) => (Arc::as_ptr(&o.0) as *const () as usize).hash(state),
        }
    }
}

fn number_bits(n: f64) -> u64 {
    if n == 0.0 {
        0
    } else {
        n.to_bits()
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<ErrorKind> for Value {
    fn from(value: ErrorKind) -> Self {
        Value::Error(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(s) => f.write_str(s),
            Value::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Value::Blank => f.write_str(""),
            Value::Error(e) => write!(f, "{e}"),
            Value::Array(a) => write!(f, "{{array {}x{}}}", a.rows, a.cols),
            Value::Function(func) => write!(f, "{func}"),
            Value::Object(_) => f.write_str("<object>"),
        }
    }
}
