//! In-memory storage engine.

use super::{apply_operations, OperateResult, Operation, Policy, StorageEngine};
use crate::error::{Phase, Result, StoreError};
use crate::types::{Digest, Key, Record};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::trace;

/// Engine limits.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Largest encoded record accepted, in bytes.
    pub max_record_size: usize,

    /// Number of lock shards records are spread over.
    pub shards: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_record_size: 1024 * 1024,
            shards: 16,
        }
    }
}

type Shard = RwLock<HashMap<Digest, Record>>;

/// Sharded in-memory records.
///
/// A command holds its shard's lock for its whole duration, which makes it
/// atomic with respect to every other command on the same record.
pub struct MemoryEngine {
    config: EngineConfig,
    shards: Vec<Shard>,
    open: AtomicBool,
}

impl MemoryEngine {
    pub fn new(config: EngineConfig) -> Self {
        let shards = (0..config.shards.max(1))
            .map(|_| RwLock::new(HashMap::new()))
            .collect();
        Self {
            config,
            shards,
            open: AtomicBool::new(true),
        }
    }

    /// Copy of a record, bypassing the command path.
    pub fn record(&self, key: &Key) -> Option<Record> {
        let digest = key.digest();
        self.shard_for(&digest).read().get(&digest).cloned()
    }

    fn shard_for(&self, digest: &Digest) -> &Shard {
        &self.shards[digest.shard(self.shards.len())]
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl StorageEngine for MemoryEngine {
    fn operate(&self, key: &Key, ops: &[Operation], policy: &Policy) -> Result<OperateResult> {
        if !self.is_open() {
            return Err(StoreError::Connection {
                key: key.to_string(),
                phase: Phase::Operate,
                reason: "engine closed".into(),
            });
        }

        let digest = key.digest();
        let shard = self.shard_for(&digest);
        let timeout = || StoreError::Timeout {
            key: key.to_string(),
            phase: Phase::Operate,
            timeout: policy.timeout,
        };

        if !ops.iter().any(Operation::is_write) {
            let records = shard.try_read_for(policy.timeout).ok_or_else(timeout)?;
            let applied =
                apply_operations(key, records.get(&digest), ops, self.config.max_record_size)?;
            return Ok(applied.result);
        }

        let mut records = shard.try_write_for(policy.timeout).ok_or_else(timeout)?;
        let applied = apply_operations(key, records.get(&digest), ops, self.config.max_record_size)?;
        if let Some(record) = applied.record {
            trace!(key = %key, generation = record.generation, "record committed");
            records.insert(digest, record);
        }
        Ok(applied.result)
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn record_count(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::WriteFlags;
    use crate::expr::Exp;
    use crate::types::Value;
    use std::time::Duration;

    fn append_one() -> Vec<Operation> {
        vec![Operation::list_append("obs", Value::Int(1))]
    }

    #[test]
    fn test_operate_creates_and_reads() {
        let engine = MemoryEngine::default();
        let key = Key::new("test", "obs", "1");

        engine.operate(&key, &append_one(), &Policy::default()).unwrap();
        let result = engine
            .operate(&key, &[Operation::get("obs")], &Policy::default())
            .unwrap();

        assert_eq!(result.get("obs"), Some(&Value::List(vec![Value::Int(1)])));
        assert_eq!(result.generation, 1);
        assert_eq!(engine.record_count(), 1);
    }

    #[test]
    fn test_failed_command_leaves_record_unchanged() {
        let engine = MemoryEngine::default();
        let key = Key::new("test", "obs", "1");
        engine.operate(&key, &append_one(), &Policy::default()).unwrap();

        let ops = vec![
            Operation::list_append("obs", Value::Int(2)),
            Operation::exp_write("total", Exp::unknown(), WriteFlags::DEFAULT),
        ];
        assert!(engine.operate(&key, &ops, &Policy::default()).is_err());

        let record = engine.record(&key).unwrap();
        assert_eq!(record.get("obs"), Some(&Value::List(vec![Value::Int(1)])));
        assert_eq!(record.generation, 1);
    }

    #[test]
    fn test_closed_engine_refuses_commands() {
        let engine = MemoryEngine::default();
        engine.close();
        let err = engine
            .operate(&Key::new("t", "s", "k"), &append_one(), &Policy::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::Connection { .. }));
    }

    #[test]
    fn test_timeout_while_record_is_held() {
        let engine = MemoryEngine::new(EngineConfig {
            shards: 1,
            ..Default::default()
        });
        let key = Key::new("test", "obs", "1");

        let _held = engine.shards[0].write();
        let err = engine
            .operate(
                &key,
                &append_one(),
                &Policy::with_timeout(Duration::from_millis(20)),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Timeout { .. }));
        assert!(err.is_ambiguous());
    }
}
