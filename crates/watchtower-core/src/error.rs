//! Error types shared across the Watchtower pipeline.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the core codec and registry layers.
#[derive(Error, Debug)]
pub enum Error {
    /// Envelope frame shorter than the 5-byte header.
    #[error("frame too short: expected at least 5 bytes, got {0}")]
    ShortFrame(usize),

    /// Envelope frame does not start with the 0x00 magic byte.
    #[error("invalid magic byte: expected 0x00, got 0x{0:02x}")]
    BadMagic(u8),

    /// Protobuf payload failed to decode.
    #[error("payload decode error: {0}")]
    PayloadDecode(String),

    /// Protobuf payload failed to encode.
    #[error("payload encode error: {0}")]
    PayloadEncode(String),

    /// The schema registry has no schema for the requested subject.
    #[error("no schema registered for subject {0}")]
    SchemaMissing(String),

    /// The schema registry could not be reached.
    #[error("schema registry unavailable: {0}")]
    RegistryUnavailable(String),

    /// Unexpected response from the schema registry.
    #[error("schema registry error: {0}")]
    Registry(String),
}
