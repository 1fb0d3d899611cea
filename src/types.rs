//! Core types: record keys, digests, the document value model and records.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Address of one entity record.
///
/// Namespace and set group records; the user key identifies the entity.
/// The display form `namespace/set/user_key` is the opaque key string used
/// in errors and logs.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key {
    pub namespace: String,
    pub set: String,
    pub user_key: String,
}

impl Key {
    pub fn new(
        namespace: impl Into<String>,
        set: impl Into<String>,
        user_key: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            set: set.into(),
            user_key: user_key.into(),
        }
    }

    /// Digest of namespace + set + user key, each separated by a zero byte.
    pub fn digest(&self) -> Digest {
        let mut hasher = Sha256::new();
        hasher.update(self.namespace.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.set.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.user_key.as_bytes());
        Digest(hasher.finalize().into())
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.set, self.user_key)
    }
}

/// Record digest (SHA-256).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Digest(arr))
    }

    /// Pick a shard in `0..shards`.
    pub fn shard(&self, shards: usize) -> usize {
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&self.0[0..8]);
        (u64::from_le_bytes(prefix) % shards.max(1) as u64) as usize
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({}...)", &self.to_hex()[..8])
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// A value in the document model.
///
/// Observations are opaque `Value`s; the protocol only ever counts them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Vec<Value>> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Build a single-entry map.
    pub fn map_of(field: impl Into<String>, value: Value) -> Self {
        let mut map = BTreeMap::new();
        map.insert(field.into(), value);
        Value::Map(map)
    }

    /// Short type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

/// One stored observation-batch, in whatever layout it was written with.
pub type ObservationBatch = Value;

/// A record as held by a storage engine.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Named bins.
    pub bins: BTreeMap<String, Value>,

    /// Number of committed writes to this record.
    pub generation: u32,
}

impl Record {
    pub fn get(&self, bin: &str) -> Option<&Value> {
        self.bins.get(bin)
    }
}

/// Bin names used by the observation protocol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinNames {
    /// Append-only list of observation-batches.
    pub observations: String,
    /// Running total of appended values.
    pub total_count: String,
    /// Frozen cutoff index.
    pub cutoff_index: String,
    /// Label wrapping each batch in the map layouts.
    pub batch_label: String,
    /// Per-value field in the nested-map layout.
    pub value_field: String,
}

impl Default for BinNames {
    fn default() -> Self {
        Self {
            observations: "observations".to_string(),
            total_count: "totalObs".to_string(),
            cutoff_index: "indexOfReqObs".to_string(),
            batch_label: "obs".to_string(),
            value_field: "d".to_string(),
        }
    }
}

/// Protocol bins of one entity, read in a single command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntityState {
    /// Sum of all appended batch sizes; `None` before the first append.
    pub total_count: Option<i64>,
    /// Frozen cutoff index; `None` until the threshold is reached.
    pub cutoff_index: Option<i64>,
    /// Number of batches in the observations list.
    pub batches: usize,
    /// Record generation.
    pub generation: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_roundtrip() {
        let digest = Key::new("test", "neustar", "1").digest();
        let parsed = Digest::from_hex(&digest.to_hex()).unwrap();
        assert_eq!(digest, parsed);
    }

    #[test]
    fn test_digest_covers_every_key_part() {
        let a = Key::new("ns1", "set", "42").digest();
        assert_eq!(a, Key::new("ns1", "set", "42").digest());
        assert_ne!(a, Key::new("ns2", "set", "42").digest());
        assert_ne!(a, Key::new("ns1", "other", "42").digest());
        assert_ne!(a, Key::new("ns1", "set", "43").digest());
        // Separators keep shifted boundaries apart
        assert_ne!(
            Key::new("ab", "c", "k").digest(),
            Key::new("a", "bc", "k").digest()
        );
    }

    #[test]
    fn test_digest_shard_in_range() {
        for i in 0..100 {
            let shard = Key::new("test", "s", i.to_string()).digest().shard(16);
            assert!(shard < 16);
        }
        assert_eq!(Key::new("t", "s", "k").digest().shard(0), 0);
    }

    #[test]
    fn test_key_display() {
        let key = Key::new("test", "neustar", "1");
        assert_eq!(key.to_string(), "test/neustar/1");
    }

    #[test]
    fn test_value_msgpack_roundtrip() {
        let value = Value::List(vec![
            Value::map_of("obs", Value::List(vec![1.into(), 2.into()])),
            Value::Nil,
            Value::Str("x".into()),
            Value::Float(1.5),
            Value::Bool(true),
        ]);
        let bytes = rmp_serde::to_vec(&value).unwrap();
        let back: Value = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(value, back);
    }

    #[test]
    fn test_default_bin_names() {
        let bins = BinNames::default();
        assert_eq!(bins.observations, "observations");
        assert_eq!(bins.total_count, "totalObs");
        assert_eq!(bins.cutoff_index, "indexOfReqObs");
    }
}
