//! Negotiated permessage-deflate parameters (RFC 7692).
//!
//! Negotiation happens during the handshake, outside this crate. The
//! connection only needs to know whether compression is on and how large a
//! message must be before compressing it is worthwhile.

use crate::config::Role;

/// Threshold used when the writer keeps its compression context between
/// messages.
pub const CONTEXT_TAKEOVER_THRESHOLD: usize = 128;

/// Threshold used when every message starts from a fresh context.
pub const NO_CONTEXT_TAKEOVER_THRESHOLD: usize = 512;

/// Result of a successful permessage-deflate negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompressionOptions {
    /// The client resets its compression context after each message.
    pub client_no_context_takeover: bool,
    /// The server resets its compression context after each message.
    pub server_no_context_takeover: bool,
}

impl CompressionOptions {
    /// Options with context takeover on both sides.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            client_no_context_takeover: false,
            server_no_context_takeover: false,
        }
    }

    /// Set `client_no_context_takeover`.
    #[must_use]
    pub const fn client_no_context_takeover(mut self, value: bool) -> Self {
        self.client_no_context_takeover = value;
        self
    }

    /// Set `server_no_context_takeover`.
    #[must_use]
    pub const fn server_no_context_takeover(mut self, value: bool) -> Self {
        self.server_no_context_takeover = value;
        self
    }

    /// Whether the writer on the `role` side keeps its context across
    /// messages.
    #[must_use]
    pub const fn writer_context_takeover(&self, role: Role) -> bool {
        match role {
            Role::Client => !self.client_no_context_takeover,
            Role::Server => !self.server_no_context_takeover,
        }
    }

    /// Smallest message worth compressing when no threshold was configured.
    #[must_use]
    pub const fn default_threshold(&self, role: Role) -> usize {
        if self.writer_context_takeover(role) {
            CONTEXT_TAKEOVER_THRESHOLD
        } else {
            NO_CONTEXT_TAKEOVER_THRESHOLD
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_follows_writer_side() {
        let copts = CompressionOptions::new().client_no_context_takeover(true);
        assert_eq!(copts.default_threshold(Role::Client), 512);
        assert_eq!(copts.default_threshold(Role::Server), 128);

        let copts = CompressionOptions::new().server_no_context_takeover(true);
        assert_eq!(copts.default_threshold(Role::Client), 128);
        assert_eq!(copts.default_threshold(Role::Server), 512);
    }
}
