//! Main ObservationStore struct tying the protocol pieces together.

use crate::accumulator::Accumulator;
use crate::encoding::Layout;
use crate::engine::{FileEngine, FileEngineConfig, MemoryEngine, StorageEngine};
use crate::error::{Result, StoreError};
use crate::reader::{MissingRecord, RangeReader};
use crate::types::{BinNames, EntityState, Key, ObservationBatch, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Store configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Total observation count at which the cutoff index is frozen.
    pub threshold: i64,

    /// Layout of each appended batch. Fixed for the life of a record.
    pub layout: Layout,

    /// Bin and label names.
    pub bins: BinNames,

    /// Timeout for accumulate commands.
    pub write_timeout: Duration,

    /// Timeout for reads.
    pub read_timeout: Duration,

    /// What reads return for an absent record.
    pub missing_record: MissingRecord,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            threshold: 10,
            layout: Layout::FlatList,
            bins: BinNames::default(),
            write_timeout: Duration::from_secs(1),
            read_timeout: Duration::from_secs(1),
            missing_record: MissingRecord::Empty,
        }
    }
}

impl StoreConfig {
    /// Parse a JSON configuration; omitted fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: StoreConfig =
            serde_json::from_str(json).map_err(|e| StoreError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration before any command is built from it.
    pub fn validate(&self) -> Result<()> {
        if self.threshold <= 0 {
            return Err(StoreError::InvalidConfig(format!(
                "threshold must be positive, got {}",
                self.threshold
            )));
        }

        let bins = [
            &self.bins.observations,
            &self.bins.total_count,
            &self.bins.cutoff_index,
        ];
        let mut seen = HashSet::new();
        for name in bins {
            if name.is_empty() || name.starts_with('$') {
                return Err(StoreError::InvalidConfig(format!(
                    "invalid bin name '{}'",
                    name
                )));
            }
            if !seen.insert(name) {
                return Err(StoreError::InvalidConfig(format!(
                    "bin name '{}' used twice",
                    name
                )));
            }
        }

        if self.bins.batch_label.is_empty() || self.bins.value_field.is_empty() {
            return Err(StoreError::InvalidConfig(
                "batch label and value field must be non-empty".into(),
            ));
        }

        if self.write_timeout.is_zero() || self.read_timeout.is_zero() {
            return Err(StoreError::InvalidConfig("timeouts must be non-zero".into()));
        }

        Ok(())
    }
}

/// Per-entity observation logs over a storage engine.
///
/// Provides a unified interface for:
/// - Accumulating batches with the write-once cutoff
/// - Reading the bounded or full history
/// - Inspecting the protocol bins of a record
pub struct ObservationStore {
    config: StoreConfig,
    engine: Arc<dyn StorageEngine>,
    accumulator: Accumulator,
    reader: RangeReader,
}

impl ObservationStore {
    /// Create a store over an existing engine.
    pub fn new(engine: Arc<dyn StorageEngine>, config: StoreConfig) -> Result<Self> {
        let accumulator = Accumulator::new(Arc::clone(&engine), &config)?;
        let reader = RangeReader::new(Arc::clone(&engine), &config)?;
        Ok(Self {
            config,
            engine,
            accumulator,
            reader,
        })
    }

    /// Create a store over a fresh in-memory engine.
    pub fn in_memory(config: StoreConfig) -> Result<Self> {
        Self::new(Arc::new(MemoryEngine::default()), config)
    }

    /// Open a store over a file engine.
    pub fn open(engine_config: FileEngineConfig, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        Self::new(Arc::new(FileEngine::open(engine_config)?), config)
    }

    // --- Writes ---

    /// Append a batch of observations to the entity at `key`.
    pub fn accumulate(&self, key: &Key, batch: &[Value]) -> Result<bool> {
        self.accumulator.accumulate(key, batch)
    }

    /// Append a batch and return the protocol bins after the append.
    pub fn accumulate_returning(&self, key: &Key, batch: &[Value]) -> Result<EntityState> {
        self.accumulator.accumulate_returning(key, batch)
    }

    // --- Reads ---

    /// Observations up to the cutoff index if set, otherwise all.
    pub fn read_bounded(&self, key: &Key) -> Result<Vec<ObservationBatch>> {
        self.reader.read_bounded(key)
    }

    /// The bounded view, decoded into per-batch values.
    pub fn read_bounded_values(&self, key: &Key) -> Result<Vec<Vec<Value>>> {
        self.reader.read_bounded_values(key)
    }

    /// Every stored batch.
    pub fn read_all(&self, key: &Key) -> Result<Vec<ObservationBatch>> {
        self.reader.read_all(key)
    }

    /// The protocol bins of the entity, or `None` if it has no record.
    pub fn state(&self, key: &Key) -> Result<Option<EntityState>> {
        self.reader.state(key)
    }

    // --- Utility ---

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<dyn StorageEngine> {
        &self.engine
    }

    /// Close the underlying engine. Later calls fail with a connection error.
    pub fn close(&self) {
        self.engine.close();
    }
}
