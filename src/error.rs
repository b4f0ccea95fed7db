//! Error types for slatecache
//!
//! Every error carries a numeric code. Codes at or above [`PROTO_ERROR_BASE`]
//! belong to the protocol handler's own error space; the connection loop
//! routes those back through `process_error` instead of emitting a generic
//! server error (see `conn::Connection::report_error`).

use thiserror::Error;

/// First code of the range reserved for protocol-space errors.
pub const PROTO_ERROR_BASE: u16 = 0x0100;

/// Main error type for slatecache
#[derive(Error, Debug)]
pub enum SlateError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SlateError {
    /// Numeric code used by the connection loop's error routing.
    pub fn code(&self) -> u16 {
        match self {
            Self::Protocol(e) => PROTO_ERROR_BASE + e.code(),
            Self::Storage(e) => e.code(),
            Self::Io(_) => 0x00f0,
            Self::Config(_) => 0x00f1,
        }
    }
}

/// Protocol parsing and framing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid flags")]
    InvalidFlags,

    #[error("Invalid exptime")]
    InvalidExptime,

    #[error("Invalid bytes length")]
    InvalidBytesLength,

    #[error("Invalid numeric argument")]
    InvalidNumericValue,

    #[error("Key too long (max 250 bytes)")]
    KeyTooLong,

    #[error("Value too large")]
    ValueTooLarge,

    #[error("Bad data chunk")]
    BadDataChunk,

    #[error("Request line too long")]
    LineTooLong,
}

impl ProtocolError {
    /// Code within the protocol error space (added to [`PROTO_ERROR_BASE`]).
    pub fn code(&self) -> u16 {
        match self {
            Self::InvalidCommand(_) => 1,
            Self::InvalidKey(_) => 2,
            Self::InvalidFlags => 3,
            Self::InvalidExptime => 4,
            Self::InvalidBytesLength => 5,
            Self::InvalidNumericValue => 6,
            Self::KeyTooLong => 7,
            Self::ValueTooLarge => 8,
            Self::BadDataChunk => 9,
            Self::LineTooLong => 10,
        }
    }

    /// True when the byte stream's framing can no longer be trusted and the
    /// connection must be closed without a reply.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::LineTooLong)
    }
}

/// Storage layer errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rust_rocksdb::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Value encoding error: {0}")]
    Encoding(String),

    #[error("Value decoding error: {0}")]
    Decoding(String),

    #[error("Key not found")]
    NotFound,

    #[error("Key already exists")]
    AlreadyExists,

    #[error("Not a numeric value")]
    NotNumeric,

    #[error("Numeric overflow")]
    NumericOverflow,
}

impl StorageError {
    /// Numeric code; storage codes stay below [`PROTO_ERROR_BASE`].
    pub fn code(&self) -> u16 {
        match self {
            Self::RocksDb(_) => 1,
            Self::Internal(_) => 2,
            Self::Encoding(_) => 3,
            Self::Decoding(_) => 4,
            Self::NotFound => 5,
            Self::AlreadyExists => 6,
            Self::NotNumeric => 7,
            Self::NumericOverflow => 8,
        }
    }
}

pub type Result<T> = std::result::Result<T, SlateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_codes_land_in_reserved_range() {
        let err = SlateError::from(ProtocolError::InvalidFlags);
        assert!(err.code() >= PROTO_ERROR_BASE);
        assert_eq!(err.code() - PROTO_ERROR_BASE, ProtocolError::InvalidFlags.code());
    }

    #[test]
    fn storage_codes_stay_below_reserved_range() {
        let err = SlateError::from(StorageError::NotFound);
        assert!(err.code() < PROTO_ERROR_BASE);
    }

    #[test]
    fn only_framing_errors_are_fatal() {
        assert!(ProtocolError::LineTooLong.is_fatal());
        assert!(!ProtocolError::ValueTooLarge.is_fatal());
        assert!(!ProtocolError::InvalidKey("x".into()).is_fatal());
    }
}
