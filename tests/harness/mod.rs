//! Test harness utilities for connection tests.
//!
//! Connections run over in-memory duplex pipes. [`pair`] wires two
//! connections together; [`RawPeer`] speaks raw frames so tests can send
//! what a well-behaved endpoint never would.

#![allow(dead_code)]

mod peer;

pub use peer::RawPeer;

use std::sync::Arc;

use tokio::io::duplex;
use wsconn::{Config, Connection};

/// Pipe capacity used unless a test needs backpressure.
pub const PIPE_CAPACITY: usize = 64 * 1024;

/// A client and a server connected to each other.
pub fn pair() -> (Arc<Connection>, Arc<Connection>) {
    pair_with(Config::client(), Config::server(), PIPE_CAPACITY)
}

pub fn pair_with(
    client: Config,
    server: Config,
    capacity: usize,
) -> (Arc<Connection>, Arc<Connection>) {
    let (a, b) = duplex(capacity);
    (
        Arc::new(Connection::new(a, client)),
        Arc::new(Connection::new(b, server)),
    )
}
