//! The accumulate-and-mark protocol.
//!
//! One call appends a batch to an entity's observations, adds the batch size
//! to the running total, and, the first time the total reaches the threshold,
//! freezes the cutoff index at the post-append list length. All three steps
//! travel as a single engine command:
//!
//! ```text
//! list_append(observations, encode(batch))
//! exp_write(total, (exists(total) ? total : 0) + len(batch))
//! exp_write(cutoff, !exists(cutoff)
//!                       ? (total >= T ? size(observations) : unknown)
//!                       : unknown,                       eval_no_fail)
//! ```
//!
//! The cutoff write reads the total and list size produced by the two
//! operations before it. Once the cutoff exists, or while the threshold is
//! unmet, the expression yields `unknown` and the write is skipped.
//!
//! Nothing is read before the command is sent and no client-side lock is
//! taken; concurrent callers on the same key are serialized by the engine.
//!
//! Accumulate is not idempotent: retrying after a [`StoreError::Timeout`]
//! may append the batch a second time.

use crate::encoding::BatchCodec;
use crate::engine::{OperateResult, Operation, Policy, StorageEngine, WriteFlags};
use crate::error::{Phase, Result, StoreError};
use crate::expr::Exp;
use crate::reader::{entity_state, state_reads};
use crate::store::StoreConfig;
use crate::types::{BinNames, EntityState, Key, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Issues accumulate commands against a storage engine.
pub struct Accumulator {
    engine: Arc<dyn StorageEngine>,
    threshold: i64,
    names: BinNames,
    codec: Box<dyn BatchCodec>,
    policy: Policy,
}

impl Accumulator {
    /// Create an accumulator. Fails if the configuration is invalid.
    pub fn new(engine: Arc<dyn StorageEngine>, config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            engine,
            threshold: config.threshold,
            names: config.bins.clone(),
            codec: config.layout.codec(&config.bins),
            policy: Policy::with_timeout(config.write_timeout),
        })
    }

    pub fn threshold(&self) -> i64 {
        self.threshold
    }

    /// The operations sent for one batch, without the trailing state reads.
    pub fn operations(&self, batch: &[Value]) -> Vec<Operation> {
        let names = &self.names;

        let running_total = Exp::add(
            Exp::cond(
                Exp::bin_exists(&names.total_count),
                Exp::int_bin(&names.total_count),
                Exp::val(0),
            ),
            Exp::val(batch.len() as i64),
        );

        let cutoff = Exp::cond(
            Exp::not(Exp::bin_exists(&names.cutoff_index)),
            Exp::cond(
                Exp::ge(Exp::int_bin(&names.total_count), Exp::val(self.threshold)),
                Exp::list_size(Exp::list_bin(&names.observations)),
                Exp::unknown(),
            ),
            Exp::unknown(),
        );

        vec![
            Operation::list_append(&names.observations, self.codec.encode(batch)),
            Operation::exp_write(&names.total_count, running_total, WriteFlags::DEFAULT),
            Operation::exp_write(&names.cutoff_index, cutoff, WriteFlags::EVAL_NO_FAIL),
        ]
    }

    /// Append `batch` to the record at `key`.
    ///
    /// An empty batch is accepted and changes nothing.
    pub fn accumulate(&self, key: &Key, batch: &[Value]) -> Result<bool> {
        if batch.is_empty() {
            debug!(key = %key, "empty batch, nothing appended");
            return Ok(true);
        }
        self.accumulate_returning(key, batch)?;
        Ok(true)
    }

    /// Append `batch` and return the record's protocol bins as they stand
    /// right after this command.
    ///
    /// The reads ride in the same atomic command as the writes. For an empty
    /// batch only the reads are sent.
    pub fn accumulate_returning(&self, key: &Key, batch: &[Value]) -> Result<EntityState> {
        if batch.is_empty() {
            debug!(key = %key, "empty batch, nothing appended");
            return match self.execute(key, &state_reads(&self.names)) {
                Ok(result) => Ok(entity_state(&self.names, &result)),
                Err(StoreError::NotFound { .. }) => Ok(EntityState::default()),
                Err(e) => Err(e),
            };
        }

        let mut ops = self.operations(batch);
        ops.extend(state_reads(&self.names));

        let result = self.execute(key, &ops)?;
        let state = entity_state(&self.names, &result);

        let len = batch.len() as i64;
        let total = state.total_count.unwrap_or(len);
        if state.cutoff_index == Some(state.batches as i64) && total - len < self.threshold {
            debug!(
                key = %key,
                total,
                cutoff_index = state.batches,
                threshold = self.threshold,
                "cutoff index frozen"
            );
        }
        debug!(
            key = %key,
            batch = batch.len(),
            total,
            cutoff_index = ?state.cutoff_index,
            "observations accumulated"
        );

        Ok(state)
    }

    fn execute(&self, key: &Key, ops: &[Operation]) -> Result<OperateResult> {
        self.engine
            .operate(key, ops, &self.policy)
            .map_err(|e| match e {
                StoreError::NotFound { .. } => e,
                other => {
                    let other = other.in_phase(Phase::Accumulate);
                    warn!(key = %key, error = %other, "accumulate failed");
                    other
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Layout;
    use crate::engine::MemoryEngine;

    fn accumulator(threshold: i64) -> Accumulator {
        let config = StoreConfig {
            threshold,
            ..Default::default()
        };
        Accumulator::new(Arc::new(MemoryEngine::default()), &config).unwrap()
    }

    fn batch(values: &[i64]) -> Vec<Value> {
        values.iter().map(|v| Value::Int(*v)).collect()
    }

    #[test]
    fn test_threshold_ten_scenario() {
        let acc = accumulator(10);
        let key = Key::new("test", "neustar", "1");

        let s = acc.accumulate_returning(&key, &batch(&[1, 2, 3])).unwrap();
        assert_eq!((s.total_count, s.cutoff_index), (Some(3), None));

        let s = acc.accumulate_returning(&key, &batch(&[4, 5, 6, 7])).unwrap();
        assert_eq!((s.total_count, s.cutoff_index), (Some(7), None));

        let s = acc.accumulate_returning(&key, &batch(&[13, 14])).unwrap();
        assert_eq!((s.total_count, s.cutoff_index), (Some(9), None));

        let s = acc.accumulate_returning(&key, &batch(&[99])).unwrap();
        assert_eq!((s.total_count, s.cutoff_index), (Some(10), Some(4)));

        let s = acc.accumulate_returning(&key, &batch(&[1, 1, 1])).unwrap();
        assert_eq!((s.total_count, s.cutoff_index), (Some(13), Some(4)));
        assert_eq!(s.batches, 5);
    }

    #[test]
    fn test_threshold_five_scenario() {
        let acc = accumulator(5);
        let key = Key::new("test", "neustar", "2");

        let s = acc.accumulate_returning(&key, &batch(&[1, 2, 3])).unwrap();
        assert_eq!((s.total_count, s.cutoff_index), (Some(3), None));

        let s = acc.accumulate_returning(&key, &batch(&[4, 5, 6, 7])).unwrap();
        assert_eq!((s.total_count, s.cutoff_index), (Some(7), Some(2)));

        let s = acc.accumulate_returning(&key, &batch(&[100])).unwrap();
        assert_eq!((s.total_count, s.cutoff_index), (Some(8), Some(2)));
    }

    #[test]
    fn test_first_batch_can_reach_threshold() {
        let acc = accumulator(3);
        let key = Key::new("test", "neustar", "3");
        let s = acc.accumulate_returning(&key, &batch(&[1, 2, 3, 4])).unwrap();
        assert_eq!((s.total_count, s.cutoff_index), (Some(4), Some(1)));
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let acc = accumulator(10);
        let key = Key::new("test", "neustar", "4");

        assert!(acc.accumulate(&key, &[]).unwrap());
        assert_eq!(acc.accumulate_returning(&key, &[]).unwrap(), EntityState::default());

        acc.accumulate(&key, &batch(&[1, 2])).unwrap();
        let s = acc.accumulate_returning(&key, &[]).unwrap();
        assert_eq!(s.total_count, Some(2));
        assert_eq!(s.batches, 1);
        assert_eq!(s.generation, 1);
    }

    #[test]
    fn test_operations_shape() {
        let acc = accumulator(10);
        let ops = acc.operations(&batch(&[1, 2]));

        assert_eq!(ops.len(), 3);
        assert!(matches!(&ops[0], Operation::ListAppend { bin, .. } if bin == "observations"));
        assert!(matches!(
            &ops[1],
            Operation::ExpWrite { bin, flags, .. } if bin == "totalObs" && !flags.eval_no_fail
        ));
        assert!(matches!(
            &ops[2],
            Operation::ExpWrite { bin, flags, .. } if bin == "indexOfReqObs" && flags.eval_no_fail
        ));
    }

    #[test]
    fn test_layout_applies_to_appended_batch() {
        let engine = Arc::new(MemoryEngine::default());
        let config = StoreConfig {
            layout: Layout::NestedMap,
            ..Default::default()
        };
        let acc = Accumulator::new(engine.clone(), &config).unwrap();
        let key = Key::new("test", "neustar", "5");

        acc.accumulate(&key, &batch(&[7])).unwrap();

        let record = engine.record(&key).unwrap();
        let expected = Value::List(vec![Value::map_of(
            "obs",
            Value::List(vec![Value::map_of("d", Value::Int(7))]),
        )]);
        assert_eq!(record.get("observations"), Some(&expected));
    }

    #[test]
    fn test_rejected_error_is_tagged_with_phase() {
        let engine = Arc::new(MemoryEngine::default());
        let acc = Accumulator::new(engine.clone(), &StoreConfig::default()).unwrap();
        let key = Key::new("test", "neustar", "6");

        // Corrupt the total bin so the arithmetic is refused.
        engine
            .operate(
                &key,
                &[Operation::exp_write("totalObs", Exp::val("many"), WriteFlags::DEFAULT)],
                &Policy::default(),
            )
            .unwrap();

        let err = acc.accumulate(&key, &batch(&[1])).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Rejected {
                phase: Phase::Accumulate,
                ..
            }
        ));
        // Nothing was appended.
        assert!(engine.record(&key).unwrap().get("observations").is_none());
    }

    #[test]
    fn test_invalid_threshold() {
        let config = StoreConfig {
            threshold: 0,
            ..Default::default()
        };
        let result = Accumulator::new(Arc::new(MemoryEngine::default()), &config);
        assert!(matches!(result, Err(StoreError::InvalidConfig(_))));
    }
}
