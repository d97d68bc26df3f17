//! Error types for the codec.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by encode, restore, and verify operations.
///
/// Every failure is reported as one of these kinds; nothing is swallowed and
/// no bare status codes cross the API boundary.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The input path given to encode does not exist or is not a regular file.
    #[error("input not found: {0}")]
    InputNotFound(PathBuf),

    /// A dictionary or manifest failed validation: a checksum did not match,
    /// a record was malformed, or the dictionaries do not pair with the
    /// encoded stream they were asked to restore.
    #[error("dictionary corrupt: {0}")]
    DictionaryCorrupt(String),

    /// An encoded shard ended before its end marker, a unit record was cut
    /// short, or the expanded byte total disagrees with the manifest.
    #[error("encoded stream truncated: {0}")]
    EncodedStreamTruncated(String),

    /// The on-disk format version is not one this build can read.
    #[error("format version mismatch: found {found}, supported {supported}")]
    VersionMismatch { found: u32, supported: u32 },

    /// A write to a stage directory or the output file failed.
    #[error("disk write failure: {0}")]
    DiskWriteFailure(#[source] std::io::Error),

    /// A configured memory or code-space limit was exceeded mid-operation.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The configuration was rejected before any work started.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A read-path OS error that carries no more specific meaning.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;
