//! Expression evaluation against a record's bins.

use super::Exp;
use crate::types::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Result of evaluating an expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Eval {
    Value(Value),
    Unknown,
}

impl Eval {
    pub fn is_unknown(&self) -> bool {
        matches!(self, Eval::Unknown)
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Eval::Value(v) => Some(v),
            Eval::Unknown => None,
        }
    }
}

/// Evaluation failure. Engines surface these as rejected operations.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ExpError {
    #[error("{op}: expected {expected}, found {found}")]
    TypeMismatch {
        op: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    #[error("{0}: integer overflow")]
    Overflow(&'static str),

    #[error("{op}: invalid argument {value}")]
    InvalidArgument { op: &'static str, value: i64 },
}

// Unwraps a value or propagates Unknown out of the enclosing evaluation.
macro_rules! known {
    ($eval:expr) => {
        match $eval {
            Eval::Value(v) => v,
            Eval::Unknown => return Ok(Eval::Unknown),
        }
    };
}

impl Exp {
    /// Evaluate against the current bins of a record.
    pub fn eval(&self, bins: &BTreeMap<String, Value>) -> Result<Eval, ExpError> {
        match self {
            Exp::Val(v) => Ok(Eval::Value(v.clone())),

            Exp::IntBin(name) => match bins.get(name) {
                None => Ok(Eval::Unknown),
                Some(v @ Value::Int(_)) => Ok(Eval::Value(v.clone())),
                Some(other) => Err(mismatch("int_bin", "int", other)),
            },

            Exp::ListBin(name) => match bins.get(name) {
                None => Ok(Eval::Unknown),
                Some(v @ Value::List(_)) => Ok(Eval::Value(v.clone())),
                Some(other) => Err(mismatch("list_bin", "list", other)),
            },

            Exp::BinExists(name) => Ok(Eval::Value(Value::Bool(bins.contains_key(name)))),

            Exp::Not(inner) => {
                let b = expect_bool("not", known!(inner.eval(bins)?))?;
                Ok(Eval::Value(Value::Bool(!b)))
            }

            Exp::Add(operands) => {
                let mut sum = 0i64;
                for operand in operands {
                    let n = expect_int("add", known!(operand.eval(bins)?))?;
                    sum = sum.checked_add(n).ok_or(ExpError::Overflow("add"))?;
                }
                Ok(Eval::Value(Value::Int(sum)))
            }

            Exp::Ge(left, right) => {
                let l = expect_int("ge", known!(left.eval(bins)?))?;
                let r = expect_int("ge", known!(right.eval(bins)?))?;
                Ok(Eval::Value(Value::Bool(l >= r)))
            }

            Exp::Cond {
                when,
                then,
                otherwise,
            } => {
                if expect_bool("cond", known!(when.eval(bins)?))? {
                    then.eval(bins)
                } else {
                    otherwise.eval(bins)
                }
            }

            Exp::ListSize(list) => {
                let items = expect_list("list_size", known!(list.eval(bins)?))?;
                Ok(Eval::Value(Value::Int(items.len() as i64)))
            }

            Exp::ListRange { index, count, list } => {
                let index = expect_int("list_range", known!(index.eval(bins)?))?;
                let count = match count {
                    Some(c) => Some(expect_int("list_range", known!(c.eval(bins)?))?),
                    None => None,
                };
                let items = expect_list("list_range", known!(list.eval(bins)?))?;
                Ok(Eval::Value(Value::List(slice_range(items, index, count)?)))
            }

            Exp::Unknown => Ok(Eval::Unknown),
        }
    }
}

/// Negative indexes count from the end. Out-of-range bounds clamp.
fn slice_range(items: Vec<Value>, index: i64, count: Option<i64>) -> Result<Vec<Value>, ExpError> {
    let len = items.len() as i64;
    let start = if index < 0 { (len + index).max(0) } else { index.min(len) };
    let end = match count {
        None => len,
        Some(c) if c < 0 => {
            return Err(ExpError::InvalidArgument {
                op: "list_range",
                value: c,
            })
        }
        Some(c) => start.saturating_add(c).min(len),
    };
    Ok(items
        .into_iter()
        .skip(start as usize)
        .take((end - start) as usize)
        .collect())
}

fn mismatch(op: &'static str, expected: &'static str, found: &Value) -> ExpError {
    ExpError::TypeMismatch {
        op,
        expected,
        found: found.type_name(),
    }
}

fn expect_int(op: &'static str, value: Value) -> Result<i64, ExpError> {
    match value {
        Value::Int(n) => Ok(n),
        other => Err(mismatch(op, "int", &other)),
    }
}

fn expect_bool(op: &'static str, value: Value) -> Result<bool, ExpError> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(mismatch(op, "bool", &other)),
    }
}

fn expect_list(op: &'static str, value: Value) -> Result<Vec<Value>, ExpError> {
    match value {
        Value::List(items) => Ok(items),
        other => Err(mismatch(op, "list", &other)),
    }
}
