//! Observation-batch layouts and record compression.
//!
//! A batch of observation values can be stored in one of three shapes:
//!
//! | Layout      | One batch                         | Tradeoff                         |
//! |-------------|-----------------------------------|----------------------------------|
//! | `NestedMap` | `{"obs": [{"d": 1}, {"d": 2}]}`   | every value tagged, largest      |
//! | `FlatList`  | `{"obs": [1, 2]}`                 | one label per batch              |
//! | `MapFree`   | `[1, 2]`                          | no labels, smallest, positional  |
//!
//! The layout is chosen when a record is first written and must stay the
//! same for the life of the record. Compression is independent of the layout
//! and is applied by the storage engine to whole record images.

mod compression;
mod layouts;
pub mod sizing;

pub use compression::Compression;
pub use layouts::{FlatListCodec, MapFreeCodec, NestedMapCodec};

use crate::error::Result;
use crate::types::{BinNames, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Encodes a batch of values into one stored container and back.
pub trait BatchCodec: Send + Sync {
    /// Wrap `values` in this layout's container.
    fn encode(&self, values: &[Value]) -> Value;

    /// Recover the values from a container written by [`encode`](Self::encode).
    fn decode(&self, container: &Value) -> Result<Vec<Value>>;

    /// Layout this codec implements.
    fn layout(&self) -> Layout;
}

/// Selects a batch layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    NestedMap,
    FlatList,
    MapFree,
}

impl Layout {
    pub const ALL: [Layout; 3] = [Layout::NestedMap, Layout::FlatList, Layout::MapFree];

    /// Build the codec for this layout using the configured label names.
    pub fn codec(&self, names: &BinNames) -> Box<dyn BatchCodec> {
        match self {
            Layout::NestedMap => Box::new(NestedMapCodec::new(&names.batch_label, &names.value_field)),
            Layout::FlatList => Box::new(FlatListCodec::new(&names.batch_label)),
            Layout::MapFree => Box::new(MapFreeCodec),
        }
    }
}

impl Default for Layout {
    fn default() -> Self {
        Layout::FlatList
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Layout::NestedMap => "nested_map",
            Layout::FlatList => "flat_list",
            Layout::MapFree => "map_free",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_reports_its_layout() {
        let names = BinNames::default();
        for layout in Layout::ALL {
            assert_eq!(layout.codec(&names).layout(), layout);
        }
    }

    #[test]
    fn test_layout_serde_names() {
        let json = serde_json::to_string(&Layout::NestedMap).unwrap();
        assert_eq!(json, "\"nested_map\"");
        let parsed: Layout = serde_json::from_str("\"map_free\"").unwrap();
        assert_eq!(parsed, Layout::MapFree);
        assert_eq!(Layout::FlatList.to_string(), "flat_list");
    }
}
