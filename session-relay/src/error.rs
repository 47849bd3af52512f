//! Typed errors for the relay's building blocks.
//!
//! Application edges (the relay loop, the client, `main`) wrap these in
//! `anyhow::Error`; the library layers keep them typed so the connection
//! loop can tell a discarded frame apart from a dead connection.

use std::io;

use thiserror::Error;

/// Failures while decoding or encoding the `type:size:source:data` envelope.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed envelope: expected 3 delimiters, found {found}")]
    MalformedEnvelope { found: usize },

    #[error("invalid {field} field: {value:?} is not a decimal integer")]
    InvalidNumber { field: &'static str, value: String },

    #[error("unknown message type {0}")]
    UnknownType(u32),

    #[error("{field} field is {len} bytes, limit is {limit}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        limit: usize,
    },

    #[error("source must not contain the ':' delimiter")]
    DelimiterInSource,

    #[error("envelope is not valid UTF-8")]
    InvalidUtf8,
}

/// Failures while splitting a byte stream into frames.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame of {len} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { len: usize, limit: usize },

    #[error("unsupported frame version {0}")]
    UnsupportedVersion(u8),

    #[error("connection closed in the middle of a frame ({buffered} bytes buffered)")]
    Truncated { buffered: usize },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl FrameError {
    /// Whether the connection can no longer be read after this error.
    ///
    /// An unsupported version still carries a trustworthy length, so the
    /// decoder has already skipped past it and the stream stays in sync.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FrameError::UnsupportedVersion(_))
    }
}

/// Failures reported by the account file.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("username '{0}' is already registered")]
    AlreadyExists(String),

    #[error("username '{0}' is reserved")]
    ReservedName(String),

    #[error("{0} must be non-empty and contain no whitespace")]
    InvalidField(&'static str),

    #[error("account store I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Failures reported by the session registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("session '{0}' already exists")]
    AlreadyExists(String),

    #[error("session name must not be empty")]
    EmptyName,

    #[error("no such session")]
    UnknownSession,
}
