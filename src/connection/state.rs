//! Observable lifecycle state of a connection.

/// WebSocket connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Open for reading and writing.
    Open,
    /// A close frame was sent; waiting for the connection to finish closing.
    Closing,
    /// Closed. Every operation fails with the recorded close error.
    Closed,
}

impl ConnectionState {
    pub(crate) const fn from_flags(closed: bool, wrote_close: bool) -> Self {
        match (closed, wrote_close) {
            (true, _) => ConnectionState::Closed,
            (false, true) => ConnectionState::Closing,
            (false, false) => ConnectionState::Open,
        }
    }

    /// Whether data messages may still be written.
    #[must_use]
    #[inline]
    pub const fn can_send(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Open => write!(f, "Open"),
            ConnectionState::Closing => write!(f, "Closing"),
            ConnectionState::Closed => write!(f, "Closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_flags() {
        assert_eq!(ConnectionState::from_flags(false, false), ConnectionState::Open);
        assert_eq!(ConnectionState::from_flags(false, true), ConnectionState::Closing);
        assert_eq!(ConnectionState::from_flags(true, false), ConnectionState::Closed);
        assert_eq!(ConnectionState::from_flags(true, true), ConnectionState::Closed);
    }

    #[test]
    fn test_can_send() {
        assert!(ConnectionState::Open.can_send());
        assert!(!ConnectionState::Closing.can_send());
        assert!(!ConnectionState::Closed.can_send());
    }
}
