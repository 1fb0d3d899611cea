//! Stored-size comparison of batch layouts.
//!
//! Serializes an `observations` list the way the engines store it
//! (MessagePack) and optionally compresses it, so the three layouts can be
//! compared for the same logical data.

use super::{Compression, Layout};
use crate::error::Result;
use crate::types::{BinNames, Value};

/// Stored size of one layout/compression combination.
#[derive(Clone, Debug, PartialEq)]
pub struct SizeReport {
    pub layout: Layout,
    pub compression: Compression,
    /// Number of batches measured.
    pub batches: usize,
    /// Number of values across all batches.
    pub values: usize,
    /// MessagePack size of the encoded observations list.
    pub encoded_bytes: usize,
    /// Size after compression.
    pub stored_bytes: usize,
}

impl SizeReport {
    /// Stored bytes per observation value.
    pub fn bytes_per_value(&self) -> f64 {
        if self.values == 0 {
            0.0
        } else {
            self.stored_bytes as f64 / self.values as f64
        }
    }

    /// `stored_bytes / encoded_bytes`.
    pub fn compression_ratio(&self) -> f64 {
        if self.encoded_bytes == 0 {
            1.0
        } else {
            self.stored_bytes as f64 / self.encoded_bytes as f64
        }
    }
}

/// Measure one layout.
pub fn measure(
    layout: Layout,
    compression: Compression,
    names: &BinNames,
    batches: &[Vec<Value>],
) -> Result<SizeReport> {
    let codec = layout.codec(names);
    let observations = Value::List(batches.iter().map(|b| codec.encode(b)).collect());

    let encoded = rmp_serde::to_vec(&observations)?;
    let stored = compression.compress(&encoded)?;

    Ok(SizeReport {
        layout,
        compression,
        batches: batches.len(),
        values: batches.iter().map(Vec::len).sum(),
        encoded_bytes: encoded.len(),
        stored_bytes: stored.len(),
    })
}

/// Measure every layout under the same compression, in [`Layout::ALL`] order.
pub fn compare_layouts(
    compression: Compression,
    names: &BinNames,
    batches: &[Vec<Value>],
) -> Result<Vec<SizeReport>> {
    Layout::ALL
        .iter()
        .map(|layout| measure(*layout, compression, names, batches))
        .collect()
}
