//! Error types for WebSocket connection operations.
//!
//! Every failure eventually funnels into the connection's single close path.
//! The first error to reach it becomes the connection-level cause, which is
//! what [`Error::Closed`] carries for every later operation.

use bytes::Bytes;
use thiserror::Error;

use crate::cancel::CancelReason;
use crate::message::{CloseCode, CloseError};

/// Result type alias for WebSocket operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during WebSocket operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The connection has finished closing. Carries the recorded close cause.
    #[error("connection closed: {0}")]
    Closed(Box<Error>),

    /// A caller-supplied cancellation fired before the operation completed.
    #[error("{op} cancelled: {reason}")]
    Cancelled {
        /// What was being waited on.
        op: &'static str,
        /// Why the cancellation fired.
        reason: CancelReason,
    },

    /// The read deadline expired.
    #[error("read timed out: {0}")]
    ReadTimeout(CancelReason),

    /// The write deadline expired.
    #[error("write timed out: {0}")]
    WriteTimeout(CancelReason),

    /// I/O error from the underlying transport.
    #[error("I/O error: {0}")]
    Io(String),

    /// The last handle was dropped while the connection was still open.
    #[error("connection dropped while still open")]
    Dropped,

    /// Closed locally without a more specific cause.
    #[error("connection closed by local endpoint")]
    LocalClose,

    /// A close frame was sent to the peer.
    #[error("sent close frame: {0}")]
    SentClose(CloseError),

    /// A close frame was received from the peer.
    #[error("received close frame: {0}")]
    ReceivedClose(CloseError),

    /// Protocol violation detected.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Message size exceeds configured maximum.
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Size seen so far.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Control frame payload too large (>125 bytes).
    #[error("control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),

    /// Invalid close code.
    #[error("invalid close code: {0}")]
    InvalidCloseCode(u16),

    /// Reserved or unknown opcode.
    #[error("reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// Invalid UTF-8 in a text message or close reason.
    #[error("invalid UTF-8 in text payload")]
    InvalidUtf8,

    /// Frame uses an extension this connection cannot decode.
    #[error("unsupported frame: {0}")]
    Unsupported(&'static str),

    /// A ping with this payload is already waiting for its pong.
    #[error("ping {0:?} already in flight")]
    PingInFlight(Bytes),

    /// An operation failed; `source` says why.
    #[error("failed to {op}: {source}")]
    Failed {
        /// The operation that failed.
        op: &'static str,
        /// The underlying error.
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn failed(op: &'static str, source: Error) -> Self {
        Error::Failed {
            op,
            source: Box::new(source),
        }
    }

    pub(crate) fn cancelled(op: &'static str, reason: CancelReason) -> Self {
        Error::Cancelled { op, reason }
    }

    /// Strip [`Error::Failed`] context and return the underlying error.
    #[must_use]
    pub fn root(&self) -> &Error {
        match self {
            Error::Failed { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the operation failed because the connection is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self.root(), Error::Closed(_))
    }

    /// Whether the operation failed because its cancellation fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Error::Cancelled { .. })
    }

    /// The close status carried by this error, if any.
    ///
    /// Looks through [`Error::Failed`] and [`Error::Closed`] for a sent or
    /// received close frame.
    #[must_use]
    pub fn close_status(&self) -> Option<CloseCode> {
        match self.root() {
            Error::Closed(cause) => cause.close_status(),
            Error::SentClose(ce) | Error::ReceivedClose(ce) => Some(ce.code),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::InvalidUtf8
    }
}
