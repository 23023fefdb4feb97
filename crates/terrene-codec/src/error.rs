//! Codec error types.

use thiserror::Error;

/// Wire-level decode failure.
///
/// These surface only when the byte stream itself cannot be read further.
/// Semantic problems inside a readable record (unknown component types,
/// unknown fields) degrade per-record with a logged warning instead.
#[derive(Debug, Error)]
pub enum CodecError {
    /// IO error from the underlying reader or writer.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A varint ran past its maximum width.
    #[error("varint too large")]
    VarIntTooLarge,

    /// A value carried an unknown tag byte.
    #[error("invalid value tag: {0}")]
    InvalidValueTag(u8),

    /// A field or type key carried an unknown tag byte.
    #[error("invalid key tag: {0}")]
    InvalidKeyTag(u8),

    /// A string was not valid UTF-8.
    #[error("invalid utf-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// An unknown scope discriminant.
    #[error("invalid scope: {0}")]
    InvalidScope(u8),

    /// A length prefix exceeded the sanity limit.
    #[error("length {len} exceeds limit {max}")]
    LengthLimit { len: usize, max: usize },

    /// Structurally inconsistent record.
    #[error("malformed record: {0}")]
    Malformed(&'static str),

    /// The stream does not start with the snapshot magic.
    #[error("not a terrene snapshot")]
    BadMagic,

    /// A snapshot from a newer format version.
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u8),
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;
