//! WebSocket connection core.
//!
//! A [`Connection`] owns a transport split into a read half and a write
//! half, each behind a cancellable lock. Everything that can end the
//! connection funnels into one close routine that records the first cause,
//! fires the closed signal and releases the transport.
//!
//! ## Connection Lifecycle
//!
//! 1. **Open** - Initial state after the opening handshake
//! 2. **Closing** - Close frame sent, waiting for the peer
//! 3. **Closed** - Closed signal fired; every operation fails with the
//!    recorded cause

#[allow(clippy::module_inception)]
mod connection;
mod mutex;
mod ping;
mod read;
mod state;
mod watchdog;
mod write;

pub use connection::Connection;
pub use state::ConnectionState;
