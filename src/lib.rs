//! # wsconn - WebSocket connection core
//!
//! `wsconn` manages a WebSocket connection after the opening handshake: the
//! lifecycle of the underlying stream, concurrent access to its read and
//! write halves, ping/pong correlation, deadline enforcement and the close
//! protocol.
//!
//! ## Features
//!
//! - **Concurrent use** through `&self`: one reader and one writer at a time,
//!   each behind a lock that callers can stop waiting for
//! - **Caller-controlled cancellation** with [`Cancel`] on every operation
//! - **Single close path**: the first recorded cause wins and every later
//!   operation reports it
//! - **Ping/pong correlation** with concurrent pings
//! - **Close handshake** per RFC 6455 Section 7
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use wsconn::{Cancel, CloseCode, Config, Connection, MessageType};
//!
//! let conn = Connection::new(stream, Config::client());
//! let cancel = Cancel::with_timeout(Duration::from_secs(5));
//!
//! conn.write(&cancel, MessageType::Text, b"hello").await?;
//! let (typ, data) = conn.read(&cancel).await?;
//! conn.close(CloseCode::Normal, "done").await?;
//! ```

pub mod cancel;
pub mod compression;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod protocol;

pub use cancel::{Cancel, CancelReason};
pub use compression::CompressionOptions;
pub use config::{Config, Role};
pub use connection::{Connection, ConnectionState};
pub use error::{Error, Result};
pub use message::{CloseCode, CloseError, MessageType};
pub use protocol::OpCode;
