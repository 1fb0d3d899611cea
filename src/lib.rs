//! # Observation Log
//!
//! Per-entity, append-only observation logs kept in a single record of a
//! document store, with a cutoff index that is computed lazily and frozen
//! exactly once.
//!
//! ## Core Concepts
//!
//! - **Accumulate**: one atomic command appends a batch, bumps the running
//!   total and, the first time the total reaches the threshold, freezes the
//!   cutoff index
//! - **Bounded read**: one server-side expression returns the batches up to
//!   the cutoff, or all of them before it exists
//! - **Layouts**: three interchangeable shapes for a stored batch, trading
//!   size against self-description
//! - **Engines**: pluggable record stores that run commands atomically
//!
//! ## Example
//!
//! ```ignore
//! use obslog::{Key, ObservationStore, StoreConfig, Value};
//!
//! let store = ObservationStore::in_memory(StoreConfig {
//!     threshold: 10,
//!     ..Default::default()
//! })?;
//!
//! let key = Key::new("test", "neustar", "1");
//! store.accumulate(&key, &[Value::Int(1), Value::Int(2), Value::Int(3)])?;
//!
//! let history = store.read_bounded_values(&key)?;
//! ```

pub mod accumulator;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod expr;
pub mod reader;
pub mod store;
pub mod types;

// Re-exports
pub use accumulator::Accumulator;
pub use encoding::{
    sizing::{compare_layouts, measure, SizeReport},
    BatchCodec, Compression, FlatListCodec, Layout, MapFreeCodec, NestedMapCodec,
};
pub use engine::{
    EngineConfig, FieldWrite, FileEngine, FileEngineConfig, MemoryEngine, OperateResult,
    Operation, Policy, StorageEngine, WriteFlags,
};
pub use error::{Phase, Result, StoreError};
pub use expr::{Eval, Exp, ExpError};
pub use reader::{MissingRecord, RangeReader};
pub use store::{ObservationStore, StoreConfig};
pub use types::*;
