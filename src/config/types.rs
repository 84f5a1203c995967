//! Per-type value checking and normalization
//!
//! A schema entry names one of ten value types; this module reconciles the
//! incoming value's shape against `list`, checks every element, and produces
//! the normalized value. The first failing element wins and carries its
//! 1-based position for the error message.

use regex::Regex;

use crate::sip::url::{self, Scheme};

use super::schema::{SchemaEntry, ValueType};
use super::value::Value;

/// One failed element, ready to be rendered into the message grammar.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TypeFailure {
    /// 1-based position; 1 for a non-list value.
    pub index: usize,
    /// Whether the `#<n> in list` message form applies.
    pub in_list: bool,
    /// Diagnostic rendering of the offending value.
    pub value: String,
    /// What the schema wanted, e.g. `integer` or `list of integer`.
    pub expected: String,
    pub reason: String,
}

/// Check `value` against `entry`, returning the normalized value.
pub(crate) fn validate_value(entry: &SchemaEntry, value: &Value) -> Result<Value, TypeFailure> {
    if entry.list {
        match value {
            Value::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    match check_element(entry.ty, item, entry.normalize) {
                        Ok(v) => out.push(v),
                        Err(reason) => {
                            return Err(TypeFailure {
                                index: i + 1,
                                in_list: true,
                                value: item.to_string(),
                                expected: entry.ty.to_string(),
                                reason,
                            })
                        }
                    }
                }
                Ok(Value::List(out))
            }
            other => Err(TypeFailure {
                index: 1,
                in_list: false,
                value: other.to_string(),
                expected: format!("list of {}", entry.ty),
                reason: "invalid type".to_string(),
            }),
        }
    } else {
        check_element(entry.ty, value, entry.normalize).map_err(|reason| TypeFailure {
            index: 1,
            in_list: false,
            value: value.to_string(),
            expected: entry.ty.to_string(),
            reason,
        })
    }
}

const INVALID_TYPE: &str = "invalid type";
const TOO_SHORT: &str = "string shorter than 2 characters";

fn check_element(ty: ValueType, value: &Value, normalize: bool) -> Result<Value, String> {
    match ty {
        ValueType::Symbol => match value {
            Value::Sym(_) => Ok(value.clone()),
            _ => Err(INVALID_TYPE.to_string()),
        },
        ValueType::Integer => match value {
            Value::Int(_) => Ok(value.clone()),
            _ => Err(INVALID_TYPE.to_string()),
        },
        ValueType::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            _ => Err(INVALID_TYPE.to_string()),
        },
        ValueType::Opaque => Ok(value.clone()),
        ValueType::String => match value {
            // A one-character string is indistinguishable from a stray
            // element of a string list, so it is refused outright. The empty
            // string passes here and is caught by the required-value check.
            Value::Str(s) if s.chars().count() == 1 => Err(TOO_SHORT.to_string()),
            Value::Str(s) => {
                if normalize {
                    Ok(Value::Str(s.to_lowercase()))
                } else {
                    Ok(value.clone())
                }
            }
            _ => Err(INVALID_TYPE.to_string()),
        },
        ValueType::RegexRewrite => match value {
            Value::Pair(left, right) => match (left.as_ref(), right.as_ref()) {
                (Value::Str(lhs), Value::Str(rhs)) => {
                    if lhs.chars().count() < 2 || rhs.chars().count() < 2 {
                        return Err(TOO_SHORT.to_string());
                    }
                    compile(lhs)?;
                    Ok(value.clone())
                }
                _ => Err(INVALID_TYPE.to_string()),
            },
            _ => Err(INVALID_TYPE.to_string()),
        },
        ValueType::RegexMatch => match value {
            Value::Pair(left, _) => match left.as_ref() {
                Value::Str(lhs) => {
                    compile(lhs)?;
                    Ok(value.clone())
                }
                _ => Err(INVALID_TYPE.to_string()),
            },
            _ => Err(INVALID_TYPE.to_string()),
        },
        ValueType::SipUrl => check_url(value, normalize, |s| url::parse(s)),
        ValueType::SipDefaultedUrl => check_url(value, normalize, |s| {
            url::parse_with_default_scheme(Scheme::Sip, s)
        }),
        ValueType::SipsDefaultedUrl => check_url(value, normalize, |s| {
            url::parse_with_default_scheme(Scheme::Sips, s)
        }),
    }
}

fn compile(pattern: &str) -> Result<(), String> {
    // The regex crate's error text spans several lines, which does not fit
    // the single-line message grammar.
    Regex::new(pattern)
        .map(|_| ())
        .map_err(|_| "invalid regex".to_string())
}

fn check_url<F>(value: &Value, normalize: bool, parse: F) -> Result<Value, String>
where
    F: Fn(&str) -> Result<url::SipUrl, url::UrlError>,
{
    match value {
        Value::Str(s) => {
            let parsed = parse(s).map_err(|e| e.to_string())?;
            if normalize {
                Ok(Value::Url(parsed))
            } else {
                Ok(value.clone())
            }
        }
        // Already normalized; re-validation must be a fixed point.
        Value::Url(_) => Ok(value.clone()),
        _ => Err(INVALID_TYPE.to_string()),
    }
}
