//! Connection configuration.

use std::fmt;
use std::time::Duration;

use crate::compression::CompressionOptions;

/// Which side of the handshake this endpoint was.
///
/// Determines masking behavior per RFC 6455.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Initiated the handshake; masks every outgoing frame.
    Client,
    /// Accepted the handshake; never masks.
    Server,
}

impl Role {
    /// Whether outgoing frames must carry a masking key.
    #[inline]
    #[must_use]
    pub const fn must_mask(&self) -> bool {
        matches!(self, Role::Client)
    }

    /// Whether incoming frames must carry a masking key.
    #[inline]
    #[must_use]
    pub const fn expects_masked(&self) -> bool {
        matches!(self, Role::Server)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => write!(f, "client"),
            Role::Server => write!(f, "server"),
        }
    }
}

/// Connection configuration. Immutable once the connection is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Side of the handshake.
    pub role: Role,

    /// Negotiated subprotocol. Empty means none.
    pub subprotocol: String,

    /// Negotiated compression, or `None` when compression is off.
    pub compression: Option<CompressionOptions>,

    /// Messages at least this large get compressed.
    ///
    /// `0` derives it from `compression`: 128 bytes if the writer keeps its
    /// context across messages, 512 otherwise.
    pub flate_threshold: usize,

    /// Read buffer size (in bytes).
    ///
    /// Default: 4 KB
    pub read_buffer_size: usize,

    /// Write buffer size (in bytes).
    ///
    /// Default: 4 KB
    pub write_buffer_size: usize,

    /// Largest message `read` will assemble.
    ///
    /// Default: 32 KB
    pub max_message_size: usize,

    /// Upper bound on writing a single control frame.
    ///
    /// Default: 5 seconds
    pub control_timeout: Duration,

    /// How long `close` waits for the peer's close frame.
    ///
    /// Default: 5 seconds
    pub close_timeout: Duration,

    /// After a read timeout, how long the connection may stay open waiting
    /// for the peer to finish the close handshake. `None` waits indefinitely.
    ///
    /// Default: 5 seconds
    pub read_timeout_grace: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            role: Role::Server,
            subprotocol: String::new(),
            compression: None,
            flate_threshold: 0,
            read_buffer_size: 4096,
            write_buffer_size: 4096,
            max_message_size: 32 * 1024,
            control_timeout: Duration::from_secs(5),
            close_timeout: Duration::from_secs(5),
            read_timeout_grace: Some(Duration::from_secs(5)),
        }
    }
}

impl Config {
    /// Configuration for the initiating side.
    #[must_use]
    pub fn client() -> Self {
        Self {
            role: Role::Client,
            ..Default::default()
        }
    }

    /// Configuration for the accepting side.
    #[must_use]
    pub fn server() -> Self {
        Self {
            role: Role::Server,
            ..Default::default()
        }
    }

    /// Set the negotiated subprotocol.
    #[must_use]
    pub fn with_subprotocol(mut self, subprotocol: impl Into<String>) -> Self {
        self.subprotocol = subprotocol.into();
        self
    }

    /// Enable compression with the negotiated options.
    #[must_use]
    pub const fn with_compression(mut self, compression: CompressionOptions) -> Self {
        self.compression = Some(compression);
        self
    }

    /// Set the compression threshold. `0` derives it.
    #[must_use]
    pub const fn with_flate_threshold(mut self, threshold: usize) -> Self {
        self.flate_threshold = threshold;
        self
    }

    /// Set read buffer size.
    #[must_use]
    pub const fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set write buffer size.
    #[must_use]
    pub const fn with_write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }

    /// Set the maximum assembled message size.
    #[must_use]
    pub const fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set the control frame write bound.
    #[must_use]
    pub const fn with_control_timeout(mut self, timeout: Duration) -> Self {
        self.control_timeout = timeout;
        self
    }

    /// Set how long `close` waits for the peer.
    #[must_use]
    pub const fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Set the grace period after a read timeout.
    #[must_use]
    pub const fn with_read_timeout_grace(mut self, grace: Option<Duration>) -> Self {
        self.read_timeout_grace = grace;
        self
    }

    /// The effective compression threshold.
    #[must_use]
    pub fn resolved_flate_threshold(&self) -> usize {
        match self.compression {
            Some(copts) if self.flate_threshold == 0 => copts.default_threshold(self.role),
            _ => self.flate_threshold,
        }
    }
}
