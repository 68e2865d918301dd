//! HTTP/2 error types
//!
//! This module defines error types for HTTP/2 operations, mapping to
//! the error codes defined in RFC 7540 Section 7.
//!
//! Errors carry their scope: a connection error tears down the whole
//! connection with GOAWAY, a stream error only resets the offending stream.

use std::fmt;

/// HTTP/2 errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport error from the session layer
    #[error("Transport error: {0}")]
    Transport(#[from] crate::http::Error),

    /// Protocol error detected (RFC 7540 Section 7 - Error code 0x1)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Internal error (RFC 7540 Section 7 - Error code 0x2)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Flow control error (RFC 7540 Section 7 - Error code 0x3)
    #[error("Flow control error: {0}")]
    FlowControl(String),

    /// Settings timeout (RFC 7540 Section 7 - Error code 0x4)
    #[error("Settings timeout")]
    SettingsTimeout,

    /// Frame size error (RFC 7540 Section 7 - Error code 0x6)
    #[error("Frame size error: {0}")]
    FrameSize(String),

    /// Compression error (RFC 7540 Section 7 - Error code 0x9)
    #[error("Compression error: {0}")]
    Compression(String),

    /// Invalid settings value; carries the code the value maps to
    #[error("Invalid settings value: {reason}")]
    InvalidSettings { code: ErrorCode, reason: String },

    /// Error confined to a single stream, answered with RST_STREAM
    #[error("Stream {stream_id} error {code}: {reason}")]
    StreamError {
        stream_id: u32,
        code: ErrorCode,
        reason: String,
    },

    /// The stream was torn down before it completed
    #[error("Stream {stream_id} cancelled: {code}")]
    Cancelled { stream_id: u32, code: ErrorCode },

    /// Peer sent GOAWAY; no new streams may be opened
    #[error("Connection going away (last stream {last_stream_id}, {code})")]
    GoingAway { last_stream_id: u32, code: ErrorCode },

    /// Stream not found
    #[error("Stream not found: {0}")]
    StreamNotFound(u32),

    /// Stream cannot carry the requested frame in its current state
    #[error("Stream closed: {0}")]
    StreamClosed(u32),

    /// Too many streams
    #[error("Too many concurrent streams")]
    TooManyStreams,

    /// Connection not ready
    #[error("Connection not ready")]
    NotReady,

    /// Timeout waiting for operation
    #[error("Timeout")]
    Timeout,

    /// Connection closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Missing or malformed connection preface
    #[error("Missing connection preface")]
    MissingPreface,
}

impl Error {
    /// Shorthand for a stream-scoped error
    pub fn stream(stream_id: u32, code: ErrorCode, reason: impl Into<String>) -> Self {
        Error::StreamError {
            stream_id,
            code,
            reason: reason.into(),
        }
    }

    /// The RFC 7540 error code this error is reported with on the wire
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Protocol(_) | Error::MissingPreface => ErrorCode::ProtocolError,
            Error::FlowControl(_) => ErrorCode::FlowControlError,
            Error::SettingsTimeout => ErrorCode::SettingsTimeout,
            Error::FrameSize(_) => ErrorCode::FrameSizeError,
            Error::Compression(_) => ErrorCode::CompressionError,
            Error::InvalidSettings { code, .. } => *code,
            Error::StreamError { code, .. } => *code,
            Error::Cancelled { code, .. } => *code,
            Error::GoingAway { code, .. } => *code,
            Error::StreamClosed(_) => ErrorCode::StreamClosed,
            Error::TooManyStreams => ErrorCode::RefusedStream,
            Error::ConnectionClosed => ErrorCode::NoError,
            Error::Io(_)
            | Error::Transport(_)
            | Error::Internal(_)
            | Error::StreamNotFound(_)
            | Error::NotReady
            | Error::Timeout => ErrorCode::InternalError,
        }
    }

    /// Whether the error must close the whole connection
    ///
    /// Stream errors, cancellations and local API misuse leave the
    /// connection usable.
    pub fn is_connection_error(&self) -> bool {
        !matches!(
            self,
            Error::StreamError { .. }
                | Error::Cancelled { .. }
                | Error::StreamNotFound(_)
                | Error::StreamClosed(_)
                | Error::TooManyStreams
                | Error::NotReady
                | Error::Timeout
        )
    }
}

/// HTTP/2 error codes as defined in RFC 7540 Section 7
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    /// Graceful shutdown
    NoError = 0x0,
    /// Protocol error detected
    ProtocolError = 0x1,
    /// Implementation fault
    InternalError = 0x2,
    /// Flow-control limits exceeded
    FlowControlError = 0x3,
    /// Settings not acknowledged
    SettingsTimeout = 0x4,
    /// Frame received for closed stream
    StreamClosed = 0x5,
    /// Frame size incorrect
    FrameSizeError = 0x6,
    /// Stream not processed
    RefusedStream = 0x7,
    /// Stream cancelled
    Cancel = 0x8,
    /// Compression state not updated
    CompressionError = 0x9,
    /// TCP connection error for CONNECT method
    ConnectError = 0xa,
    /// Processing capacity exceeded
    EnhanceYourCalm = 0xb,
    /// Negotiated TLS parameters not acceptable
    InadequateSecurity = 0xc,
    /// Use HTTP/1.1 for the request
    Http11Required = 0xd,
}

impl ErrorCode {
    /// Convert error code to u32
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Create error code from u32
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            0x0 => Some(ErrorCode::NoError),
            0x1 => Some(ErrorCode::ProtocolError),
            0x2 => Some(ErrorCode::InternalError),
            0x3 => Some(ErrorCode::FlowControlError),
            0x4 => Some(ErrorCode::SettingsTimeout),
            0x5 => Some(ErrorCode::StreamClosed),
            0x6 => Some(ErrorCode::FrameSizeError),
            0x7 => Some(ErrorCode::RefusedStream),
            0x8 => Some(ErrorCode::Cancel),
            0x9 => Some(ErrorCode::CompressionError),
            0xa => Some(ErrorCode::ConnectError),
            0xb => Some(ErrorCode::EnhanceYourCalm),
            0xc => Some(ErrorCode::InadequateSecurity),
            0xd => Some(ErrorCode::Http11Required),
            _ => None,
        }
    }

    /// Decode a code received on the wire
    ///
    /// Unknown codes must not trigger special behavior (RFC 7540 Section 7),
    /// so they are treated as INTERNAL_ERROR.
    pub fn from_wire(code: u32) -> Self {
        Self::from_u32(code).unwrap_or(ErrorCode::InternalError)
    }

    /// Get error name
    pub fn name(&self) -> &'static str {
        match self {
            ErrorCode::NoError => "NO_ERROR",
            ErrorCode::ProtocolError => "PROTOCOL_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::FlowControlError => "FLOW_CONTROL_ERROR",
            ErrorCode::SettingsTimeout => "SETTINGS_TIMEOUT",
            ErrorCode::StreamClosed => "STREAM_CLOSED",
            ErrorCode::FrameSizeError => "FRAME_SIZE_ERROR",
            ErrorCode::RefusedStream => "REFUSED_STREAM",
            ErrorCode::Cancel => "CANCEL",
            ErrorCode::CompressionError => "COMPRESSION_ERROR",
            ErrorCode::ConnectError => "CONNECT_ERROR",
            ErrorCode::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            ErrorCode::InadequateSecurity => "INADEQUATE_SECURITY",
            ErrorCode::Http11Required => "HTTP_1_1_REQUIRED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u32())
    }
}

/// Result type for HTTP/2 operations
pub type Result<T> = std::result::Result<T, Error>;
