//! Error types and HTTP/3 error code mappings per RFC 9114 Section 8.
//!
//! Stream-engine failures fall into four groups: input validity
//! (`InvalidArgument`), flow control (`WouldBlock`), user-callback failures
//! (`CallbackFailure`), and protocol violations (`Protocol` with an
//! [`ErrorCode`]). The embedding connection decides whether a protocol error
//! closes the stream or the whole connection via
//! [`Error::is_connection_error`].

use std::fmt;
use thiserror::Error;

/// HTTP/3 error codes as defined in RFC 9114 Section 8.1.
///
/// Carried in `Error::Protocol` and used as the QUIC application error code
/// when a stream is reset or the connection is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum ErrorCode {
    /// H3_NO_ERROR (0x0100): graceful close with nothing to signal.
    NoError = 0x0100,

    /// H3_GENERAL_PROTOCOL_ERROR (0x0101): peer violated protocol
    /// requirements in a way without a more specific code.
    GeneralProtocolError = 0x0101,

    /// H3_INTERNAL_ERROR (0x0102): an internal error in the HTTP stack,
    /// e.g. events delivered to a stream whose receive state was never
    /// initialized.
    InternalError = 0x0102,

    /// H3_STREAM_CREATION_ERROR (0x0103): peer created a stream that will
    /// not be accepted.
    StreamCreationError = 0x0103,

    /// H3_CLOSED_CRITICAL_STREAM (0x0104): a stream required by the
    /// connection was closed or reset.
    ClosedCriticalStream = 0x0104,

    /// H3_FRAME_UNEXPECTED (0x0105): a frame not permitted in the current
    /// state or on the current stream.
    FrameUnexpected = 0x0105,

    /// H3_FRAME_ERROR (0x0106): a frame that fails layout requirements.
    FrameError = 0x0106,

    /// H3_ID_ERROR (0x0108): a stream or push ID used incorrectly.
    IdError = 0x0108,

    /// H3_SETTINGS_ERROR (0x0109): error in a SETTINGS frame payload.
    SettingsError = 0x0109,

    /// H3_MESSAGE_ERROR (0x010e): malformed HTTP message.
    MessageError = 0x010e,
}

impl ErrorCode {
    /// Numeric code for use as a QUIC application error code.
    pub fn to_code(self) -> u64 {
        self as u64
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0x0100 => Some(Self::NoError),
            0x0101 => Some(Self::GeneralProtocolError),
            0x0102 => Some(Self::InternalError),
            0x0103 => Some(Self::StreamCreationError),
            0x0104 => Some(Self::ClosedCriticalStream),
            0x0105 => Some(Self::FrameUnexpected),
            0x0106 => Some(Self::FrameError),
            0x0108 => Some(Self::IdError),
            0x0109 => Some(Self::SettingsError),
            0x010e => Some(Self::MessageError),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::NoError => "H3_NO_ERROR",
            Self::GeneralProtocolError => "H3_GENERAL_PROTOCOL_ERROR",
            Self::InternalError => "H3_INTERNAL_ERROR",
            Self::StreamCreationError => "H3_STREAM_CREATION_ERROR",
            Self::ClosedCriticalStream => "H3_CLOSED_CRITICAL_STREAM",
            Self::FrameUnexpected => "H3_FRAME_UNEXPECTED",
            Self::FrameError => "H3_FRAME_ERROR",
            Self::IdError => "H3_ID_ERROR",
            Self::SettingsError => "H3_SETTINGS_ERROR",
            Self::MessageError => "H3_MESSAGE_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result type for stream-engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Stream-engine error type.
#[derive(Debug, Error)]
pub enum Error {
    /// The operation cannot make progress right now; retry after the
    /// blocking condition clears. Serializers convert this into the
    /// stream's `read_data_blocked` flag rather than surfacing it.
    #[error("operation would block")]
    WouldBlock,

    /// Malformed input to a codec or accounting operation.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A user-supplied callback returned an error. The stream must not be
    /// driven for serialization again.
    #[error("user callback failure")]
    CallbackFailure,

    /// Protocol violation with a specific HTTP/3 error code.
    #[error("protocol error ({code}): {message}")]
    Protocol { code: ErrorCode, message: String },
}

impl Error {
    /// Create a protocol error with a specific error code.
    pub fn protocol(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Protocol {
            code,
            message: message.into(),
        }
    }

    /// The HTTP/3 error code to use when aborting due to this error.
    pub fn to_error_code(&self) -> ErrorCode {
        match self {
            Self::Protocol { code, .. } => *code,
            Self::WouldBlock => ErrorCode::NoError,
            Self::InvalidArgument(_) => ErrorCode::FrameError,
            Self::CallbackFailure => ErrorCode::InternalError,
        }
    }

    /// Whether this error requires a connection-level abort rather than a
    /// stream reset.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Protocol { code, .. } => matches!(
                code,
                ErrorCode::GeneralProtocolError
                    | ErrorCode::InternalError
                    | ErrorCode::StreamCreationError
                    | ErrorCode::ClosedCriticalStream
                    | ErrorCode::FrameUnexpected
                    | ErrorCode::IdError
                    | ErrorCode::SettingsError
            ),
            Self::CallbackFailure => true,
            Self::WouldBlock | Self::InvalidArgument(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_round_trip() {
        let codes = [
            ErrorCode::NoError,
            ErrorCode::GeneralProtocolError,
            ErrorCode::InternalError,
            ErrorCode::FrameUnexpected,
            ErrorCode::MessageError,
        ];

        for code in codes {
            assert_eq!(ErrorCode::from_code(code.to_code()), Some(code));
        }
        assert_eq!(ErrorCode::from_code(0x0abc), None);
    }

    #[test]
    fn test_error_classification() {
        let err = Error::protocol(ErrorCode::FrameUnexpected, "HEADERS after trailers");
        assert_eq!(err.to_error_code(), ErrorCode::FrameUnexpected);
        assert!(err.is_connection_error());

        let err = Error::protocol(ErrorCode::MessageError, "bad content-length");
        assert!(!err.is_connection_error());

        assert!(!Error::WouldBlock.is_connection_error());
        assert!(Error::CallbackFailure.is_connection_error());
    }

    #[test]
    fn test_display() {
        assert_eq!(ErrorCode::GeneralProtocolError.to_string(), "H3_GENERAL_PROTOCOL_ERROR");
        let err = Error::protocol(ErrorCode::FrameError, "short varint");
        assert_eq!(err.to_string(), "protocol error (H3_FRAME_ERROR): short varint");
    }
}
