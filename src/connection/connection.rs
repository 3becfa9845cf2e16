use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncRead, AsyncWrite, BufReader, BufWriter};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use super::mutex::Lifecycle;
use super::ping::PingTracker;
use super::read::{BoxedRead, MsgReader};
use super::state::ConnectionState;
use super::watchdog;
use super::write::{BoxedWrite, MsgWriter};
use crate::cancel::Cancel;
use crate::config::{Config, Role};
use crate::error::{Error, Result};
use crate::message::{CloseCode, MessageType};
use crate::protocol::{MAX_CONTROL_PAYLOAD, OpCode};

type PingCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// A WebSocket connection over an async byte stream whose opening handshake
/// already completed.
///
/// All methods take `&self`; reads, writes, pings and close may be issued
/// concurrently from different tasks. One reader and one writer are inside
/// the transport at a time.
///
/// Every call takes a [`Cancel`]. When it fires while waiting for the read or
/// write lock, or while a frame is being transferred, the connection is
/// closed: an interrupted frame leaves the stream in an unknown state.
///
/// ## Example
///
/// ```rust,ignore
/// use std::time::Duration;
/// use wsconn::{Cancel, CloseCode, Config, Connection, MessageType};
///
/// let conn = Connection::new(stream, Config::client());
///
/// let cancel = Cancel::with_timeout(Duration::from_secs(5));
/// conn.write(&cancel, MessageType::Text, b"hello").await?;
/// let (typ, data) = conn.read(&cancel).await?;
/// conn.ping(&cancel).await?;
///
/// conn.close(CloseCode::Normal, "bye").await?;
/// ```
///
/// Dropping a `Connection` while it is open closes it with
/// [`Error::Dropped`].
pub struct Connection {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    pub(super) config: Config,
    flate_threshold: usize,
    pub(super) closed: CancellationToken,
    pub(super) close_state: Mutex<CloseState>,
    pub(super) read_deadline: watch::Sender<Option<Cancel>>,
    pub(super) write_deadline: watch::Sender<Option<Cancel>>,
    pub(super) reader: Arc<MsgReader>,
    pub(super) writer: Arc<MsgWriter>,
    pub(super) pings: PingTracker,
    pub(super) on_ping: RwLock<Option<PingCallback>>,
    tasks: TaskTracker,
    runtime: Handle,
}

#[derive(Debug, Default)]
pub(crate) struct CloseState {
    /// First recorded cause wins.
    pub(super) err: Option<Error>,
    pub(super) wrote_close: bool,
}

impl CloseState {
    pub(super) fn record(&mut self, err: Error) {
        if self.err.is_none() {
            self.err = Some(err);
        }
    }
}

impl Connection {
    /// Wrap `io` and start the connection's background tasks.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new<T>(io: T, config: Config) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(io);
        let read_half: BoxedRead = Box::new(read_half);
        let write_half: BoxedWrite = Box::new(write_half);

        let (read_tx, read_rx) = watch::channel(None);
        let (write_tx, write_rx) = watch::channel(None);

        let shared = Arc::new(Shared {
            reader: Arc::new(MsgReader::new(BufReader::with_capacity(
                config.read_buffer_size,
                read_half,
            ))),
            writer: Arc::new(MsgWriter::new(
                BufWriter::with_capacity(config.write_buffer_size, write_half),
                config.role,
            )),
            flate_threshold: config.resolved_flate_threshold(),
            closed: CancellationToken::new(),
            close_state: Mutex::new(CloseState::default()),
            read_deadline: read_tx,
            write_deadline: write_tx,
            pings: PingTracker::new(),
            on_ping: RwLock::new(None),
            tasks: TaskTracker::new(),
            runtime: Handle::current(),
            config,
        });

        shared.spawn(watchdog::run(Arc::clone(&shared), read_rx, write_rx));
        debug!(
            role = %shared.config.role,
            subprotocol = %shared.config.subprotocol,
            compression = shared.config.compression.is_some(),
            "connection established"
        );

        Self { shared }
    }

    /// The negotiated subprotocol. Empty if none.
    pub fn subprotocol(&self) -> &str {
        &self.shared.config.subprotocol
    }

    pub fn role(&self) -> Role {
        self.shared.config.role
    }

    /// Whether compression was negotiated.
    pub fn compression_enabled(&self) -> bool {
        self.shared.config.compression.is_some()
    }

    /// Messages at least this large would be compressed.
    pub fn flate_threshold(&self) -> usize {
        self.shared.flate_threshold
    }

    pub fn state(&self) -> ConnectionState {
        let wrote_close = self.shared.close_state.lock().wrote_close;
        ConnectionState::from_flags(self.shared.is_closed(), wrote_close)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// The recorded close cause, once the connection is closed.
    pub fn close_error(&self) -> Option<Error> {
        if !self.shared.is_closed() {
            return None;
        }
        self.shared.close_state.lock().err.clone()
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        self.shared.closed.cancelled().await;
    }

    /// Run `callback` with the payload of every ping received, before the
    /// pong is sent.
    pub fn set_ping_callback<F>(&self, callback: F)
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        *self.shared.on_ping.write() = Some(Arc::new(callback));
    }

    /// Send a ping and wait for the matching pong.
    ///
    /// A read must be in progress (see [`Connection::read`] and
    /// [`Connection::close_read`]) for the pong to be seen.
    ///
    /// # Errors
    ///
    /// - [`Error::Closed`] if the connection is or becomes closed
    /// - [`Error::Cancelled`] if `cancel` fires first. The connection is
    ///   closed with that error
    pub async fn ping(&self, cancel: &Cancel) -> Result<()> {
        let payload = self.shared.pings.next_payload();
        self.shared
            .ping(cancel, payload)
            .await
            .map_err(|err| Error::failed("ping", err))
    }

    /// Like [`Connection::ping`] with a caller-chosen payload.
    ///
    /// # Errors
    ///
    /// As [`Connection::ping`], plus [`Error::PingInFlight`] when a ping
    /// with the same payload is still waiting and
    /// [`Error::ControlFrameTooLarge`] for payloads over 125 bytes.
    pub async fn ping_with_payload(&self, cancel: &Cancel, payload: impl Into<Bytes>) -> Result<()> {
        self.shared
            .ping(cancel, payload.into())
            .await
            .map_err(|err| Error::failed("ping", err))
    }

    /// Send an unsolicited pong.
    pub async fn pong(&self, cancel: &Cancel, payload: &[u8]) -> Result<()> {
        self.shared
            .write_control(cancel, OpCode::Pong, payload)
            .await
            .map_err(|err| Error::failed("pong", err))
    }

    /// Read the next data message, handling control frames on the way.
    ///
    /// When `cancel` fires mid-read the peer is sent a policy violation
    /// close frame and the read keeps waiting for the peer's close frame.
    pub async fn read(&self, cancel: &Cancel) -> Result<(MessageType, Bytes)> {
        self.shared.read_message(cancel).await
    }

    /// Write one data message as a single frame.
    ///
    /// Like every failure, writing after our close frame went out closes the
    /// connection.
    pub async fn write(&self, cancel: &Cancel, typ: MessageType, payload: &[u8]) -> Result<()> {
        self.shared
            .write_message(cancel, typ, payload)
            .await
            .map_err(|err| Error::failed("write message", err))
    }

    /// Read in the background for callers that only write.
    ///
    /// Control frames keep being handled. A data message from the peer is a
    /// policy violation and closes the connection. The returned token is
    /// cancelled when the background reader stops.
    pub fn close_read(&self) -> CancellationToken {
        let done = CancellationToken::new();
        let guard = done.clone().drop_guard();
        let shared = Arc::clone(&self.shared);

        self.shared.spawn(async move {
            let _guard = guard;
            match shared.read_message(&Cancel::new()).await {
                Ok((typ, _)) => {
                    let err = Error::ProtocolViolation(format!(
                        "unexpected {typ:?} message after close_read"
                    ));
                    shared.fail(CloseCode::PolicyViolation, err).await;
                }
                Err(err) => debug!(error = %err, "background reader stopped"),
            }
        });

        done
    }

    /// Close with the WebSocket close handshake.
    ///
    /// Sends a close frame, waits up to [`Config::close_timeout`] for the
    /// peer's close frame, then releases the transport.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidCloseCode`] for codes that may not be sent; the
    ///   connection is left untouched
    /// - [`Error::Closed`] if the connection was already closed
    /// - any error that prevented the handshake; the connection is closed
    ///   regardless
    pub async fn close(&self, code: CloseCode, reason: &str) -> Result<()> {
        if code != CloseCode::NoStatusReceived && !code.is_valid() {
            return Err(Error::InvalidCloseCode(code.as_u16()));
        }
        if self.shared.is_closed() {
            return Err(Error::failed("close connection", self.shared.closed_error()));
        }

        let res = self.shared.close_handshake(code, reason).await;
        self.shared.close(None);
        self.shared.wait_tasks().await;
        res.map_err(|err| Error::failed("close connection", err))
    }

    /// Close without the handshake.
    ///
    /// # Errors
    ///
    /// [`Error::Closed`] if the connection was already closed.
    pub async fn close_now(&self) -> Result<()> {
        if !self.shared.close(None) {
            return Err(Error::failed("close connection", self.shared.closed_error()));
        }
        self.shared.wait_tasks().await;
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.shared.close(Some(Error::Dropped)) {
            warn!(role = %self.shared.config.role, "connection dropped while open");
        }
    }
}

impl Shared {
    /// Transition to closed. Returns whether this call did it.
    ///
    /// Records `err` (or [`Error::LocalClose`]) unless a cause was already
    /// recorded, fires the closed signal and tears down the transport in the
    /// background.
    pub(super) fn close(&self, err: Option<Error>) -> bool {
        let mut state = self.close_state.lock();
        if self.closed.is_cancelled() {
            return false;
        }
        state.record(err.unwrap_or(Error::LocalClose));
        self.closed.cancel();
        if let Some(cause) = &state.err {
            debug!(
                role = %self.config.role,
                %cause,
                pending_pings = self.pings.outstanding(),
                "connection closed"
            );
        }
        drop(state);

        let (writer, reader) = (Arc::clone(&self.writer), Arc::clone(&self.reader));
        self.spawn(async move {
            writer.close().await;
            reader.close().await;
        });
        true
    }

    /// Record a close cause without closing.
    pub(super) fn set_close_err(&self, err: Error) {
        self.close_state.lock().record(err);
    }

    pub(super) fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn_on(task, &self.runtime);
    }

    async fn wait_tasks(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }

    pub(super) async fn ping(&self, cancel: &Cancel, payload: Bytes) -> Result<()> {
        if payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(Error::ControlFrameTooLarge(payload.len()));
        }
        let registration = self.pings.register(payload)?;
        self.write_control(cancel, OpCode::Ping, registration.payload())
            .await?;

        tokio::select! {
            biased;
            () = registration.pong() => Ok(()),
            () = self.closed.cancelled() => Err(self.closed_error()),
            reason = cancel.fired() => {
                let err = Error::cancelled("wait for pong", reason);
                self.close(Some(err.clone()));
                Err(err)
            }
        }
    }

    async fn close_handshake(&self, code: CloseCode, reason: &str) -> Result<()> {
        let wrote = self.write_close(code, reason).await;
        let cancel = Cancel::with_timeout(self.config.close_timeout);
        let waited = self.wait_close_frame(&cancel).await;
        wrote?;

        match waited {
            Err(err) if err.is_closed() || matches!(err.root(), Error::ReceivedClose(_)) => Ok(()),
            res => res,
        }
    }
}

impl Lifecycle for Shared {
    fn closed_signal(&self) -> &CancellationToken {
        &self.closed
    }

    fn close_with(&self, err: Error) {
        self.close(Some(err));
    }

    fn closed_error(&self) -> Error {
        let cause = self.close_state.lock().err.clone();
        Error::Closed(Box::new(cause.unwrap_or(Error::LocalClose)))
    }
}
