// src/error.rs
use std::fmt;

/// Failure categories reported to the application.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgs,
    NfcUnavailable,
    ConnectionError,
    TagError,
    SizeError,
    ReadError,
    WriteError,
    FormatError,
    UnknownError,
}

impl ErrorKind {
    /// Error code used on the wire.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::InvalidArgs => "invalid_args",
            ErrorKind::NfcUnavailable => "nfc_not_available",
            ErrorKind::ConnectionError => "connection_error",
            ErrorKind::TagError => "tag_error",
            ErrorKind::SizeError => "size_error",
            ErrorKind::ReadError => "read_error",
            ErrorKind::WriteError => "write_error",
            ErrorKind::FormatError => "format_error",
            ErrorKind::UnknownError => "unknown_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// An error surfaced to the caller of the bridge.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct NfcError {
    pub kind: ErrorKind,
    pub message: String,
}

impl NfcError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgs, message)
    }
}

/// Malformed NDEF or TLV bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("unexpected end of data, needed {needed} more bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },

    #[error("chunked records are not supported")]
    Chunked,

    #[error("{0} field is longer than the record format allows")]
    FieldTooLong(&'static str),

    #[error("message has no records")]
    EmptyMessage,

    #[error("message of {0} bytes does not fit in a TLV")]
    TooLong(usize),
}

/// Pre-transfer checks on a tag.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriteCheckError {
    #[error("Tag is not writable")]
    NotWritable,

    #[error("Message too large ({encoded} bytes) for tag capacity ({capacity} bytes)")]
    TooLarge { encoded: usize, capacity: usize },
}

impl WriteCheckError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WriteCheckError::NotWritable => ErrorKind::TagError,
            WriteCheckError::TooLarge { .. } => ErrorKind::SizeError,
        }
    }
}

impl From<WriteCheckError> for NfcError {
    fn from(err: WriteCheckError) -> Self {
        NfcError::new(err.kind(), err.to_string())
    }
}

/// Low level failure talking to a tag.
#[derive(Debug, thiserror::Error)]
pub enum TagIoError {
    #[error("Transmit Error: {0}")]
    Transmit(#[from] pcsc::Error),

    #[error("{command} failed with status {sw1:02X} {sw2:02X}")]
    Status {
        command: &'static str,
        sw1: u8,
        sw2: u8,
    },

    #[error("Could not authenticate sector at block {0}")]
    Auth(u8),

    #[error("tag is not connected")]
    NotConnected,

    #[error("{0}")]
    Unsupported(&'static str),

    #[error("invalid NDEF data: {0}")]
    Codec(#[from] CodecError),

    #[error("{0}")]
    Other(String),
}
