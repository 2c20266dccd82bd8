//! Error types for arbor.

use thiserror::Error;

/// Result type alias using ArborError.
pub type Result<T> = std::result::Result<T, ArborError>;

/// Errors that can occur in arbor operations.
#[derive(Debug, Error)]
pub enum ArborError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad index file signature")]
    BadSignature,

    #[error("short read at offset {offset}")]
    ShortRead { offset: u64 },

    #[error("write failed at offset {offset}: {source}")]
    WriteFailed {
        offset: u64,
        #[source]
        source: std::io::Error,
    },

    // Structural errors
    #[error("index corrupted at offset {offset}: {reason}")]
    Corruption { offset: u64, reason: String },

    // Cache errors
    #[error("node cache full, every entry is pinned")]
    CacheFull,

    #[error("deferred node flush failed: {0}")]
    FlushFailed(String),

    // Contract errors
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("invalid parameter: {name} = {value}")]
    InvalidParameter { name: &'static str, value: String },
}

impl ArborError {
    /// Builds a corruption error for the given stream offset.
    pub fn corrupt(offset: u64, reason: impl Into<String>) -> Self {
        ArborError::Corruption {
            offset,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: ArborError = io_err.into();
        assert!(matches!(err, ArborError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_bad_signature_display() {
        assert_eq!(
            ArborError::BadSignature.to_string(),
            "bad index file signature"
        );
    }

    #[test]
    fn test_short_read_display() {
        let err = ArborError::ShortRead { offset: 36 };
        assert_eq!(err.to_string(), "short read at offset 36");
    }

    #[test]
    fn test_write_failed_display() {
        let err = ArborError::WriteFailed {
            offset: 1024,
            source: IoError::new(ErrorKind::Other, "disk full"),
        };
        assert_eq!(err.to_string(), "write failed at offset 1024: disk full");
    }

    #[test]
    fn test_corruption_display() {
        let err = ArborError::corrupt(99, "leaf marker mismatch");
        assert_eq!(
            err.to_string(),
            "index corrupted at offset 99: leaf marker mismatch"
        );
    }

    #[test]
    fn test_cache_full_display() {
        assert_eq!(
            ArborError::CacheFull.to_string(),
            "node cache full, every entry is pinned"
        );
    }

    #[test]
    fn test_not_implemented_display() {
        let err = ArborError::NotImplemented("erase");
        assert_eq!(err.to_string(), "not implemented: erase");
    }

    #[test]
    fn test_invalid_parameter_display() {
        let err = ArborError::InvalidParameter {
            name: "cache_capacity",
            value: "0".to_string(),
        };
        assert_eq!(err.to_string(), "invalid parameter: cache_capacity = 0");
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(ArborError::BadSignature)
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ArborError>();
    }
}
