//! Error types for strata.

use crate::types::Timestamp;
use thiserror::Error;

/// Result type alias using StrataError.
pub type Result<T> = std::result::Result<T, StrataError>;

/// Errors that can occur in strata operations.
#[derive(Debug, Error)]
pub enum StrataError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Write-order errors
    #[error("Out of order insert: {attempted} is before {previous}")]
    OutOfOrderInsert { previous: i64, attempted: i64 },

    #[error("Invalid interval: start {start} is after end {end}")]
    InvalidInterval { start: Timestamp, end: Timestamp },

    #[error("Time {time} is outside of range [{start}, {end}]")]
    TimeOutOfRange {
        time: Timestamp,
        start: Timestamp,
        end: Timestamp,
    },

    #[error("History tree is closed for writing")]
    TreeClosed,

    // Serialization errors
    #[error("Serialization overflow: need {needed} bytes, {available} available")]
    SerializationOverflow { needed: usize, available: usize },

    #[error("Truncated buffer: need {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("Node full, unable to insert interval")]
    NodeFull,

    // Validity errors
    #[error("Stale history tree: {0}")]
    StaleTree(String),

    #[error("Stale checkpoint index: {0}")]
    StaleIndex(String),

    #[error("Node corrupted: {seq}, reason: {reason}")]
    CorruptNode { seq: u32, reason: String },

    #[error("Record corrupted: {index}, reason: {reason}")]
    CorruptRecord { index: u64, reason: String },

    #[error("Node not found: {seq}")]
    NodeNotFound { seq: u32 },

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StrataError {
    /// Returns true if the on-disk structure must be discarded and rebuilt.
    ///
    /// Stale and corrupt files are handled the same way: nothing is repaired
    /// in place, the producer replays its source from the beginning.
    pub fn requires_rebuild(&self) -> bool {
        matches!(
            self,
            StrataError::StaleTree(_)
                | StrataError::StaleIndex(_)
                | StrataError::CorruptNode { .. }
                | StrataError::CorruptRecord { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: StrataError = io_err.into();
        assert!(matches!(err, StrataError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_out_of_order_display() {
        let err = StrataError::OutOfOrderInsert {
            previous: 20,
            attempted: 10,
        };
        assert_eq!(err.to_string(), "Out of order insert: 10 is before 20");
    }

    #[test]
    fn test_serialization_overflow_display() {
        let err = StrataError::SerializationOverflow {
            needed: 12,
            available: 4,
        };
        assert_eq!(
            err.to_string(),
            "Serialization overflow: need 12 bytes, 4 available"
        );
    }

    #[test]
    fn test_corrupt_node_display() {
        let err = StrataError::CorruptNode {
            seq: 7,
            reason: "checksum mismatch".to_string(),
        };
        assert_eq!(err.to_string(), "Node corrupted: 7, reason: checksum mismatch");
    }

    #[test]
    fn test_time_out_of_range_display() {
        let err = StrataError::TimeOutOfRange {
            time: 5,
            start: 10,
            end: 20,
        };
        assert_eq!(err.to_string(), "Time 5 is outside of range [10, 20]");
    }

    #[test]
    fn test_requires_rebuild() {
        assert!(StrataError::StaleTree("provider version".to_string()).requires_rebuild());
        assert!(StrataError::StaleIndex("event count".to_string()).requires_rebuild());
        assert!(StrataError::CorruptNode {
            seq: 1,
            reason: "bad type".to_string()
        }
        .requires_rebuild());
        assert!(StrataError::CorruptRecord {
            index: 3,
            reason: "short read".to_string()
        }
        .requires_rebuild());

        assert!(!StrataError::NodeFull.requires_rebuild());
        assert!(!StrataError::TreeClosed.requires_rebuild());
        let io: StrataError = IoError::new(ErrorKind::Other, "disk").into();
        assert!(!io.requires_rebuild());
    }

    #[test]
    fn test_config_errors_display() {
        let err = StrataError::ConfigError("block size too small".to_string());
        assert_eq!(err.to_string(), "Configuration error: block size too small");

        let err = StrataError::InvalidParameter {
            name: "max_children".to_string(),
            value: "1".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid parameter: max_children = 1");
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(StrataError::Internal("test".to_string()))
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<StrataError>();
    }
}
