//! Bounded reads of an entity's observations.
//!
//! The bounded view is a single server-evaluated expression:
//!
//! ```text
//! exists(cutoff) ? observations[0 .. cutoff] : observations[0 ..]
//! ```
//!
//! so the cutoff check and the range extraction happen inside one engine
//! command rather than as a check-then-read pair.

use crate::encoding::BatchCodec;
use crate::engine::{OperateResult, Operation, Policy, StorageEngine};
use crate::error::{Phase, Result, StoreError};
use crate::expr::Exp;
use crate::store::StoreConfig;
use crate::types::{BinNames, EntityState, Key, ObservationBatch, Value};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{trace, warn};

/// Result name of the batch-count read.
const BATCH_COUNT: &str = "$batches";

/// Result name of the range read.
const RANGE: &str = "$range";

/// What a read returns when the record does not exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingRecord {
    /// An empty list.
    Empty,
    /// [`StoreError::NotFound`].
    Error,
}

impl Default for MissingRecord {
    fn default() -> Self {
        MissingRecord::Empty
    }
}

/// Reads observation history.
pub struct RangeReader {
    engine: Arc<dyn StorageEngine>,
    names: BinNames,
    codec: Box<dyn BatchCodec>,
    policy: Policy,
    missing: MissingRecord,
}

impl RangeReader {
    pub fn new(engine: Arc<dyn StorageEngine>, config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            engine,
            names: config.bins.clone(),
            codec: config.layout.codec(&config.bins),
            policy: Policy::with_timeout(config.read_timeout),
            missing: config.missing_record,
        })
    }

    /// The prefix up to the cutoff if one is set, otherwise everything.
    pub fn bounded_expression(names: &BinNames) -> Exp {
        Exp::cond(
            Exp::bin_exists(&names.cutoff_index),
            Exp::list_range(
                Exp::val(0),
                Exp::int_bin(&names.cutoff_index),
                Exp::list_bin(&names.observations),
            ),
            Exp::list_range_from(Exp::val(0), Exp::list_bin(&names.observations)),
        )
    }

    /// Batches `[0, cutoff)` once the cutoff is set, all batches before.
    pub fn read_bounded(&self, key: &Key) -> Result<Vec<ObservationBatch>> {
        self.read_range(key, Self::bounded_expression(&self.names))
    }

    /// Every batch, ignoring the cutoff.
    pub fn read_all(&self, key: &Key) -> Result<Vec<ObservationBatch>> {
        let exp = Exp::list_range_from(Exp::val(0), Exp::list_bin(&self.names.observations));
        self.read_range(key, exp)
    }

    /// The bounded view decoded through the configured layout.
    pub fn read_bounded_values(&self, key: &Key) -> Result<Vec<Vec<Value>>> {
        self.read_bounded(key)?
            .iter()
            .map(|batch| self.codec.decode(batch))
            .collect()
    }

    /// The protocol bins of a record, or `None` if it does not exist.
    pub fn state(&self, key: &Key) -> Result<Option<EntityState>> {
        match self.engine.operate(key, &state_reads(&self.names), &self.policy) {
            Ok(result) => Ok(Some(entity_state(&self.names, &result))),
            Err(StoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(self.failed(key, e, Phase::ReadState)),
        }
    }

    fn read_range(&self, key: &Key, exp: Exp) -> Result<Vec<ObservationBatch>> {
        let ops = [Operation::exp_read(RANGE, exp)];
        let result = match self.engine.operate(key, &ops, &self.policy) {
            Ok(result) => result,
            Err(StoreError::NotFound { key: missing }) => {
                return match self.missing {
                    MissingRecord::Empty => Ok(Vec::new()),
                    MissingRecord::Error => Err(StoreError::NotFound { key: missing }),
                };
            }
            Err(e) => return Err(self.failed(key, e, Phase::ReadBounded)),
        };

        match result.bins.get(RANGE) {
            // Record without an observations bin.
            None => Ok(Vec::new()),
            Some(Value::List(batches)) => {
                trace!(key = %key, batches = batches.len(), "range read");
                Ok(batches.clone())
            }
            Some(other) => Err(StoreError::Decode(format!(
                "range read on {} returned {}",
                key,
                other.type_name()
            ))),
        }
    }

    fn failed(&self, key: &Key, e: StoreError, phase: Phase) -> StoreError {
        let e = e.in_phase(phase);
        warn!(key = %key, error = %e, "read failed");
        e
    }
}

/// Reads of the protocol bins, appended to a command.
pub(crate) fn state_reads(names: &BinNames) -> Vec<Operation> {
    vec![
        Operation::get(&names.total_count),
        Operation::get(&names.cutoff_index),
        Operation::exp_read(
            BATCH_COUNT,
            Exp::cond(
                Exp::bin_exists(&names.observations),
                Exp::list_size(Exp::list_bin(&names.observations)),
                Exp::val(0),
            ),
        ),
    ]
}

pub(crate) fn entity_state(names: &BinNames, result: &OperateResult) -> EntityState {
    EntityState {
        total_count: result.get(&names.total_count).and_then(Value::as_int),
        cutoff_index: result.get(&names.cutoff_index).and_then(Value::as_int),
        batches: result
            .get(BATCH_COUNT)
            .and_then(Value::as_int)
            .unwrap_or(0) as usize,
        generation: result.generation,
    }
}
