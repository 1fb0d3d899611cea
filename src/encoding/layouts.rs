//! The three batch codecs.

use super::{BatchCodec, Layout};
use crate::error::{Result, StoreError};
use crate::types::Value;

/// `{label: [{field: v}, ...]}`
#[derive(Clone, Debug)]
pub struct NestedMapCodec {
    label: String,
    field: String,
}

impl NestedMapCodec {
    pub fn new(label: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            field: field.into(),
        }
    }
}

impl BatchCodec for NestedMapCodec {
    fn encode(&self, values: &[Value]) -> Value {
        let wrapped = values
            .iter()
            .map(|v| Value::map_of(self.field.clone(), v.clone()))
            .collect();
        Value::map_of(self.label.clone(), Value::List(wrapped))
    }

    fn decode(&self, container: &Value) -> Result<Vec<Value>> {
        labeled_list(container, &self.label)?
            .iter()
            .map(|item| {
                item.as_map()
                    .and_then(|m| if m.len() == 1 { m.get(&self.field) } else { None })
                    .cloned()
                    .ok_or_else(|| {
                        StoreError::Decode(format!(
                            "expected {{\"{}\": value}}, found {}",
                            self.field,
                            item.type_name()
                        ))
                    })
            })
            .collect()
    }

    fn layout(&self) -> Layout {
        Layout::NestedMap
    }
}

/// `{label: [v, ...]}`
#[derive(Clone, Debug)]
pub struct FlatListCodec {
    label: String,
}

impl FlatListCodec {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl BatchCodec for FlatListCodec {
    fn encode(&self, values: &[Value]) -> Value {
        Value::map_of(self.label.clone(), Value::List(values.to_vec()))
    }

    fn decode(&self, container: &Value) -> Result<Vec<Value>> {
        Ok(labeled_list(container, &self.label)?.clone())
    }

    fn layout(&self) -> Layout {
        Layout::FlatList
    }
}

/// `[v, ...]`
#[derive(Clone, Copy, Debug, Default)]
pub struct MapFreeCodec;

impl BatchCodec for MapFreeCodec {
    fn encode(&self, values: &[Value]) -> Value {
        Value::List(values.to_vec())
    }

    fn decode(&self, container: &Value) -> Result<Vec<Value>> {
        container.as_list().cloned().ok_or_else(|| {
            StoreError::Decode(format!(
                "expected a bare list, found {}",
                container.type_name()
            ))
        })
    }

    fn layout(&self) -> Layout {
        Layout::MapFree
    }
}

/// The list under `label` in a single-entry map.
fn labeled_list<'a>(container: &'a Value, label: &str) -> Result<&'a Vec<Value>> {
    let map = container.as_map().ok_or_else(|| {
        StoreError::Decode(format!(
            "expected a map labeled '{}', found {}",
            label,
            container.type_name()
        ))
    })?;
    if map.len() != 1 {
        return Err(StoreError::Decode(format!(
            "expected a single '{}' entry, found {} entries",
            label,
            map.len()
        )));
    }
    map.get(label)
        .and_then(Value::as_list)
        .ok_or_else(|| StoreError::Decode(format!("missing list under '{}'", label)))
}
