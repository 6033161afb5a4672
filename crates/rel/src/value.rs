use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// The attribute domains a relation may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Domain {
    Int,
    Float,
    Str,
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Domain::Int => "int",
            Domain::Float => "float",
            Domain::Str => "str",
        })
    }
}

/// A totally ordered `f64`.
///
/// Tuples live in hash sets and index keys get sorted, so the raw float's
/// partial order is not enough. Ordering is `f64::total_cmp`, hashing goes
/// through the bit pattern.
#[derive(Debug, Clone, Copy)]
pub struct F64(f64);

impl F64 {
    pub fn new(value: f64) -> Self {
        F64(value)
    }

    pub fn get(self) -> f64 {
        self.0
    }
}

impl From<f64> for F64 {
    fn from(value: f64) -> Self {
        F64(value)
    }
}

impl PartialEq for F64 {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for F64 {}

impl PartialOrd for F64 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for F64 {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Hash for F64 {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl fmt::Display for F64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A single attribute value.
///
/// The derived `Ord` only orders values of the same domain meaningfully;
/// cross-domain comparisons go through [`Value::compare`], which promotes
/// ints to floats and refuses anything else.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    Int(i64),
    Float(F64),
    Str(String),
}

/// A tuple of a relation: one value per schema attribute, in order.
pub type Tuple = Vec<Value>;

impl Value {
    pub fn domain(&self) -> Domain {
        match self {
            Value::Int(_) => Domain::Int,
            Value::Float(_) => Domain::Float,
            Value::Str(_) => Domain::Str,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(f.get()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The value as a float, promoting ints.
    pub fn numeric(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(f.get()),
            Value::Str(_) => None,
        }
    }

    /// Adapts the value to `domain` where a lossless reading exists
    /// (an int literal used against a float column).
    pub fn coerce(self, domain: Domain) -> Option<Value> {
        match (self, domain) {
            (v @ Value::Int(_), Domain::Int) => Some(v),
            (Value::Int(i), Domain::Float) => Some(Value::Float(F64::new(i as f64))),
            (v @ Value::Float(_), Domain::Float) => Some(v),
            (v @ Value::Str(_), Domain::Str) => Some(v),
            _ => None,
        }
    }

    /// Domain-aware comparison: numerics compare numerically, strings
    /// lexicographically, anything else is incomparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Str(_), _) | (_, Value::Str(_)) => None,
            (a, b) => a.numeric()?.partial_cmp(&b.numeric()?),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => i.fmt(f),
            Value::Float(x) => x.fmt(f),
            Value::Str(s) => s.fmt(f),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(F64::new(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

/// The comparison operators predicates and index lookups support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    /// Token table in match order: two-character operators first, so that
    /// splitting `a <= 5` never stops at the bare `<`.
    pub const TOKENS: [(&'static str, CmpOp); 5] = [
        ("==", CmpOp::Eq),
        ("<=", CmpOp::Le),
        (">=", CmpOp::Ge),
        ("<", CmpOp::Lt),
        (">", CmpOp::Gt),
    ];

    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }

    /// Flips the operator for a reversed operand order (`5 < a` == `a > 5`).
    pub fn flip(self) -> CmpOp {
        match self {
            CmpOp::Eq => CmpOp::Eq,
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::Le => CmpOp::Ge,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::Ge => CmpOp::Le,
        }
    }

    /// Evaluates `lhs op rhs`, or `None` when the values are incomparable.
    pub fn eval(self, lhs: &Value, rhs: &Value) -> Option<bool> {
        let ord = lhs.compare(rhs)?;
        Some(match self {
            CmpOp::Eq => ord == Ordering::Equal,
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::Le => ord != Ordering::Greater,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::Ge => ord != Ordering::Less,
        })
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_comparison_promotes_ints() {
        assert_eq!(CmpOp::Lt.eval(&Value::Int(1), &Value::from(1.5)), Some(true));
        assert_eq!(CmpOp::Eq.eval(&Value::Int(2), &Value::from(2.0)), Some(true));
        assert_eq!(CmpOp::Ge.eval(&Value::from(0.5), &Value::Int(1)), Some(false));
    }

    #[test]
    fn strings_only_compare_with_strings() {
        assert_eq!(CmpOp::Lt.eval(&Value::from("a"), &Value::from("b")), Some(true));
        assert_eq!(CmpOp::Eq.eval(&Value::from("a"), &Value::Int(1)), None);
    }

    #[test]
    fn coerce_promotes_int_literals_for_float_columns() {
        assert_eq!(Value::Int(3).coerce(Domain::Float), Some(Value::from(3.0)));
        assert_eq!(Value::from("x").coerce(Domain::Int), None);
    }

    #[test]
    fn f64_wrapper_is_totally_ordered() {
        let mut keys = vec![F64::new(2.0), F64::new(-1.0), F64::new(0.5)];
        keys.sort();
        assert_eq!(keys, vec![F64::new(-1.0), F64::new(0.5), F64::new(2.0)]);
    }
}
