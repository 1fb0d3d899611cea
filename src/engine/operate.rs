//! Applying a command to a record.
//!
//! Shared by every engine. The command runs against a working copy; the
//! caller installs the copy only if the whole command succeeded.

use super::{FieldWrite, OperateResult, Operation};
use crate::error::{Phase, Result, StoreError};
use crate::types::{Key, Record, Value};

/// Outcome of applying a command.
#[derive(Clone, Debug)]
pub struct Applied {
    /// New record image, if any operation wrote.
    pub record: Option<Record>,

    /// Read results.
    pub result: OperateResult,
}

/// Apply `ops` in order to a copy of `current`.
///
/// A command that writes creates the record when absent. A read-only command
/// on an absent record fails with `NotFound`. A written record whose encoded
/// bins exceed `max_record_size` bytes is rejected.
pub fn apply_operations(
    key: &Key,
    current: Option<&Record>,
    ops: &[Operation],
    max_record_size: usize,
) -> Result<Applied> {
    if current.is_none() && !ops.iter().any(Operation::is_write) {
        return Err(StoreError::NotFound {
            key: key.to_string(),
        });
    }

    let mut working = current.cloned().unwrap_or_default();
    let mut result = OperateResult::default();
    let mut dirty = false;

    for op in ops {
        match op {
            Operation::ListAppend { bin, value } => {
                match working.bins.get_mut(bin) {
                    None => {
                        working.bins.insert(bin.clone(), Value::List(vec![value.clone()]));
                    }
                    Some(Value::List(items)) => items.push(value.clone()),
                    Some(other) => {
                        return Err(rejected(
                            key,
                            format!("list_append on {} bin '{}'", other.type_name(), bin),
                        ))
                    }
                }
                dirty = true;
            }

            Operation::ExpWrite { bin, exp, flags } => {
                let eval = exp
                    .eval(&working.bins)
                    .map_err(|e| rejected(key, format!("write '{}': {}", bin, e)))?;
                match FieldWrite::resolve(eval, *flags) {
                    Some(FieldWrite::Write(Value::Nil)) => {
                        dirty |= working.bins.remove(bin).is_some();
                    }
                    Some(FieldWrite::Write(value)) => {
                        working.bins.insert(bin.clone(), value);
                        dirty = true;
                    }
                    Some(FieldWrite::Skip) => {}
                    None => {
                        return Err(rejected(
                            key,
                            format!("write '{}': expression evaluated to unknown", bin),
                        ))
                    }
                }
            }

            Operation::ExpRead { name, exp } => {
                let eval = exp
                    .eval(&working.bins)
                    .map_err(|e| rejected(key, format!("read '{}': {}", name, e)))?;
                if let Some(value) = eval.into_value() {
                    result.bins.insert(name.clone(), value);
                }
            }

            Operation::Get { bin } => {
                if let Some(value) = working.bins.get(bin) {
                    result.bins.insert(bin.clone(), value.clone());
                }
            }
        }
    }

    if !dirty {
        result.generation = working.generation;
        return Ok(Applied {
            record: None,
            result,
        });
    }

    let size = rmp_serde::to_vec(&working.bins)?.len();
    if size > max_record_size {
        return Err(rejected(
            key,
            format!("record size {} exceeds limit {}", size, max_record_size),
        ));
    }

    working.generation = working.generation.wrapping_add(1);
    result.generation = working.generation;

    Ok(Applied {
        record: Some(working),
        result,
    })
}

fn rejected(key: &Key, reason: String) -> StoreError {
    StoreError::Rejected {
        key: key.to_string(),
        phase: Phase::Operate,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::WriteFlags;
    use crate::expr::Exp;

    const LIMIT: usize = 1024 * 1024;

    fn key() -> Key {
        Key::new("test", "obs", "1")
    }

    #[test]
    fn test_read_only_on_missing_record() {
        let result = apply_operations(&key(), None, &[Operation::get("total")], LIMIT);
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn test_write_creates_record() {
        let ops = [Operation::list_append("obs", Value::Int(1))];
        let applied = apply_operations(&key(), None, &ops, LIMIT).unwrap();
        let record = applied.record.unwrap();
        assert_eq!(record.generation, 1);
        assert_eq!(record.get("obs"), Some(&Value::List(vec![Value::Int(1)])));
    }

    #[test]
    fn test_operations_see_earlier_effects() {
        let ops = [
            Operation::list_append("obs", Value::Int(1)),
            Operation::list_append("obs", Value::Int(2)),
            Operation::exp_read("size", Exp::list_size(Exp::list_bin("obs"))),
        ];
        let applied = apply_operations(&key(), None, &ops, LIMIT).unwrap();
        assert_eq!(applied.result.get("size"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_skip_leaves_bin_absent() {
        let ops = [
            Operation::list_append("obs", Value::Int(1)),
            Operation::exp_write("cut", Exp::unknown(), WriteFlags::EVAL_NO_FAIL),
        ];
        let applied = apply_operations(&key(), None, &ops, LIMIT).unwrap();
        assert!(applied.record.unwrap().get("cut").is_none());
    }

    #[test]
    fn test_unknown_without_no_fail_rejects_whole_command() {
        let mut current = Record::default();
        current.bins.insert("obs".into(), Value::List(vec![]));
        let ops = [
            Operation::list_append("obs", Value::Int(1)),
            Operation::exp_write("cut", Exp::unknown(), WriteFlags::DEFAULT),
        ];
        let result = apply_operations(&key(), Some(&current), &ops, LIMIT);
        assert!(matches!(result, Err(StoreError::Rejected { .. })));
        // The caller's record is untouched.
        assert_eq!(current.get("obs"), Some(&Value::List(vec![])));
    }

    #[test]
    fn test_append_to_non_list_rejected() {
        let mut current = Record::default();
        current.bins.insert("obs".into(), Value::Int(3));
        let ops = [Operation::list_append("obs", Value::Int(1))];
        let err = apply_operations(&key(), Some(&current), &ops, LIMIT).unwrap_err();
        assert!(err.to_string().contains("list_append on int bin"));
    }

    #[test]
    fn test_writing_nil_removes_bin() {
        let mut current = Record::default();
        current.bins.insert("total".into(), Value::Int(3));
        let ops = [Operation::exp_write("total", Exp::Val(Value::Nil), WriteFlags::DEFAULT)];
        let applied = apply_operations(&key(), Some(&current), &ops, LIMIT).unwrap();
        assert!(applied.record.unwrap().get("total").is_none());
    }

    #[test]
    fn test_record_size_limit() {
        let ops = [Operation::list_append("obs", Value::Str("x".repeat(200)))];
        let result = apply_operations(&key(), None, &ops, 100);
        assert!(matches!(result, Err(StoreError::Rejected { .. })));
    }

    #[test]
    fn test_read_only_keeps_generation() {
        let mut current = Record::default();
        current.generation = 7;
        current.bins.insert("total".into(), Value::Int(3));
        let applied =
            apply_operations(&key(), Some(&current), &[Operation::get("total")], LIMIT).unwrap();
        assert!(applied.record.is_none());
        assert_eq!(applied.result.generation, 7);
        assert_eq!(applied.result.get("total"), Some(&Value::Int(3)));
    }
}
