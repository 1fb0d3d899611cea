//! Storage engine interface.
//!
//! An engine applies a list of [`Operation`]s to a single record as one
//! atomic command: either every operation takes effect or none does, and no
//! other command on the same record observes an intermediate state.
//! Operations run in order and each sees the effects of the ones before it.
//!
//! Two engines are provided:
//! - [`MemoryEngine`]: sharded in-memory records
//! - [`FileEngine`]: the same, made durable by an append-only image log

mod file;
mod memory;
mod operate;

pub use file::{FileEngine, FileEngineConfig};
pub use memory::{EngineConfig, MemoryEngine};
pub use operate::{apply_operations, Applied};

use crate::error::Result;
use crate::expr::{Eval, Exp};
use crate::types::{Key, Value};
use std::collections::BTreeMap;
use std::time::Duration;

/// Flags for expression writes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriteFlags {
    /// Treat an `Unknown` result as a skipped write instead of an error.
    pub eval_no_fail: bool,
}

impl WriteFlags {
    pub const DEFAULT: WriteFlags = WriteFlags {
        eval_no_fail: false,
    };

    pub const EVAL_NO_FAIL: WriteFlags = WriteFlags { eval_no_fail: true };
}

/// What an expression write does to its bin.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldWrite {
    /// Store the value. Writing `Nil` removes the bin.
    Write(Value),
    /// Leave the bin as it is.
    Skip,
}

impl FieldWrite {
    /// Resolve an evaluation result under the given flags.
    ///
    /// Returns `None` when the write must be rejected.
    pub fn resolve(eval: Eval, flags: WriteFlags) -> Option<FieldWrite> {
        match eval {
            Eval::Value(v) => Some(FieldWrite::Write(v)),
            Eval::Unknown if flags.eval_no_fail => Some(FieldWrite::Skip),
            Eval::Unknown => None,
        }
    }
}

/// One step of an atomic command.
#[derive(Clone, Debug, PartialEq)]
pub enum Operation {
    /// Append a value to a list bin, creating the bin if absent.
    ListAppend { bin: String, value: Value },

    /// Evaluate an expression and write the result into a bin.
    ExpWrite {
        bin: String,
        exp: Exp,
        flags: WriteFlags,
    },

    /// Evaluate an expression and return it under `name`.
    ExpRead { name: String, exp: Exp },

    /// Return a bin's current value.
    Get { bin: String },
}

impl Operation {
    pub fn list_append(bin: impl Into<String>, value: Value) -> Self {
        Operation::ListAppend {
            bin: bin.into(),
            value,
        }
    }

    pub fn exp_write(bin: impl Into<String>, exp: Exp, flags: WriteFlags) -> Self {
        Operation::ExpWrite {
            bin: bin.into(),
            exp,
            flags,
        }
    }

    pub fn exp_read(name: impl Into<String>, exp: Exp) -> Self {
        Operation::ExpRead {
            name: name.into(),
            exp,
        }
    }

    pub fn get(bin: impl Into<String>) -> Self {
        Operation::Get { bin: bin.into() }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, Operation::ListAppend { .. } | Operation::ExpWrite { .. })
    }
}

/// Per-command policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Policy {
    /// Upper bound on how long the command may wait for the record.
    pub timeout: Duration,
}

impl Policy {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
        }
    }
}

/// Values returned by the read operations of a command.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OperateResult {
    /// Read results by bin or result name. Absent bins and `Unknown`
    /// expression results are omitted.
    pub bins: BTreeMap<String, Value>,

    /// Record generation after the command.
    pub generation: u32,
}

impl OperateResult {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bins.get(name)
    }
}

/// A store of records supporting atomic single-record commands.
pub trait StorageEngine: Send + Sync {
    /// Apply `ops` to the record at `key` as one atomic command.
    ///
    /// Fails with `NotFound` for a read-only command on an absent record,
    /// `Timeout` if the record cannot be acquired within the policy timeout,
    /// `Connection` once the engine is closed, and `Rejected` when any
    /// operation is refused. A failed command leaves the record unchanged.
    fn operate(&self, key: &Key, ops: &[Operation], policy: &Policy) -> Result<OperateResult>;

    /// Stop accepting commands.
    fn close(&self);

    /// Whether commands are accepted.
    fn is_open(&self) -> bool;

    /// Number of records held.
    fn record_count(&self) -> usize;
}
