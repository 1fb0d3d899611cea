//! Record image compression.

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};

/// Compression applied to stored record images.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    None,
    Zstd { level: i32 },
}

impl Default for Compression {
    fn default() -> Self {
        Compression::None
    }
}

impl Compression {
    /// Code stored alongside compressed data.
    pub fn code(&self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Zstd { .. } => 1,
        }
    }

    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Zstd { level } => Ok(zstd::bulk::compress(data, *level)?),
        }
    }

    /// Decompress data written under the given code.
    pub fn decompress(code: u8, data: &[u8]) -> Result<Vec<u8>> {
        match code {
            0 => Ok(data.to_vec()),
            1 => Ok(zstd::stream::decode_all(data)?),
            other => Err(StoreError::InvalidFormat(format!(
                "Unknown compression code: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zstd_shrinks_repetitive_data() {
        let data = b"obs".repeat(1000);
        let zstd = Compression::Zstd { level: 3 };
        let compressed = zstd.compress(&data).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(Compression::decompress(zstd.code(), &compressed).unwrap(), data);
    }

    #[test]
    fn test_none_is_identity() {
        let data = b"hello".to_vec();
        let stored = Compression::None.compress(&data).unwrap();
        assert_eq!(stored, data);
        assert_eq!(Compression::decompress(0, &stored).unwrap(), data);
    }

    #[test]
    fn test_unknown_code() {
        assert!(matches!(
            Compression::decompress(9, b"x"),
            Err(StoreError::InvalidFormat(_))
        ));
    }
}
