//! Error types for the observation log.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Which stage of a call produced an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Raw engine command, before the caller re-tags it.
    Operate,
    /// Append + count + cutoff command.
    Accumulate,
    /// Bounded range read.
    ReadBounded,
    /// Bin snapshot read.
    ReadState,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Operate => "operate",
            Phase::Accumulate => "accumulate",
            Phase::ReadBounded => "read_bounded",
            Phase::ReadState => "read_state",
        };
        f.write_str(name)
    }
}

/// Main error type for store operations.
///
/// `Connection`, `Timeout`, `Rejected` and `NotFound` come back from any
/// engine's `operate` and are what protocol callers handle. `InvalidConfig`
/// and `Decode` are raised by the protocol layer itself. The remaining
/// variants belong to the file engine's image log: `Io` and the
/// (de)serialization errors on any read or write of it, `Corruption`,
/// `InvalidFormat` and `ChecksumMismatch` when it is damaged, and `Locked`
/// when another process holds the engine directory.
#[derive(Debug, Error)]
pub enum StoreError {
    // Engine command outcomes
    #[error("Connection error during {phase} on {key}: {reason}")]
    Connection {
        key: String,
        phase: Phase,
        reason: String,
    },

    #[error("Timeout after {timeout:?} during {phase} on {key}")]
    Timeout {
        key: String,
        phase: Phase,
        timeout: Duration,
    },

    #[error("Operation rejected during {phase} on {key}: {reason}")]
    Rejected {
        key: String,
        phase: Phase,
        reason: String,
    },

    #[error("Record not found: {key}")]
    NotFound { key: String },

    // Protocol layer
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Decode error: {0}")]
    Decode(String),

    // File engine
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Damaged image, or a log that could not be rolled back after a
    /// failed append.
    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Store is locked by another process")]
    Locked,
}

impl StoreError {
    /// Re-tag an engine error with the phase of the calling operation.
    pub fn in_phase(self, new_phase: Phase) -> Self {
        match self {
            StoreError::Connection { key, reason, .. } => StoreError::Connection {
                key,
                phase: new_phase,
                reason,
            },
            StoreError::Timeout { key, timeout, .. } => StoreError::Timeout {
                key,
                phase: new_phase,
                timeout,
            },
            StoreError::Rejected { key, reason, .. } => StoreError::Rejected {
                key,
                phase: new_phase,
                reason,
            },
            other => other,
        }
    }

    /// The phase recorded on the error, if it carries one.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            StoreError::Connection { phase, .. }
            | StoreError::Timeout { phase, .. }
            | StoreError::Rejected { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// Whether the write may or may not have committed.
    ///
    /// Only timeouts are ambiguous. Accumulate is not idempotent, so a caller
    /// retrying after one of these can append the same batch twice.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, StoreError::Timeout { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Deserialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_phase_retags_engine_errors() {
        let err = StoreError::Rejected {
            key: "test/obs/1".into(),
            phase: Phase::Operate,
            reason: "record too large".into(),
        };
        let err = err.in_phase(Phase::Accumulate);
        assert_eq!(err.phase(), Some(Phase::Accumulate));
        assert!(err.to_string().contains("accumulate"));
        assert!(err.to_string().contains("test/obs/1"));
    }

    #[test]
    fn test_in_phase_leaves_other_errors() {
        let err = StoreError::NotFound { key: "k".into() }.in_phase(Phase::ReadBounded);
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert_eq!(err.phase(), None);
    }

    #[test]
    fn test_only_timeouts_are_ambiguous() {
        let timeout = StoreError::Timeout {
            key: "k".into(),
            phase: Phase::Accumulate,
            timeout: Duration::from_millis(10),
        };
        assert!(timeout.is_ambiguous());
        assert!(!StoreError::Locked.is_ambiguous());
    }

    #[test]
    fn test_file_engine_errors_carry_no_phase() {
        let errors = [
            StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk")),
            StoreError::Corruption("log".into()),
            StoreError::InvalidFormat("magic".into()),
            StoreError::ChecksumMismatch { expected: 1, got: 2 },
            StoreError::Locked,
        ];
        for err in errors {
            let err = err.in_phase(Phase::Accumulate);
            assert_eq!(err.phase(), None, "{}", err);
            assert!(!err.is_ambiguous());
        }
    }
}
