//! Runtime configuration values
//!
//! Configuration backends hand the validator loosely-typed data; this tagged
//! sum is the shape it travels in. `Display` is the diagnostic form quoted in
//! error messages, so its output is part of the validator's contract.

use std::fmt;

use crate::sip::url::SipUrl;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A bare symbolic name, e.g. a log level or backend module name.
    Sym(String),
    Int(i64),
    Bool(bool),
    Str(String),
    List(Vec<Value>),
    /// Two-element tuple, used by the rewrite/match rule types.
    Pair(Box<Value>, Box<Value>),
    /// A URL that has been parsed and normalized.
    Url(SipUrl),
    /// Marker from the defaults backend for a parameter nobody set.
    Unset,
}

impl Value {
    pub fn sym(s: impl Into<String>) -> Self {
        Value::Sym(s.into())
    }

    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::List(items.into_iter().collect())
    }

    pub fn pair(left: Value, right: Value) -> Self {
        Value::Pair(Box::new(left), Box::new(right))
    }

    /// True for the values the required-parameter check treats as empty.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Str(s) => s.is_empty(),
            Value::List(items) => items.is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Sym(s) => f.write_str(s),
            Value::Int(n) => write!(f, "{}", n),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Str(s) => write!(f, "\"{}\"", s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    item.fmt(f)?;
                }
                f.write_str("]")
            }
            Value::Pair(left, right) => write!(f, "({}, {})", left, right),
            Value::Url(url) => write!(f, "{}", url),
            Value::Unset => f.write_str("undefined"),
        }
    }
}
