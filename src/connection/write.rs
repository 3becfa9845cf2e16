//! Write path: frame serialization under the write lock, control frames and
//! close frames.

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, trace};

use super::connection::Shared;
use super::mutex::{Lifecycle, Mu};
use crate::cancel::Cancel;
use crate::config::Role;
use crate::error::{Error, Result};
use crate::message::{CloseCode, CloseError, MessageType};
use crate::protocol::frame::{MAX_HEADER_LEN, MaskGen};
use crate::protocol::{FrameHeader, MAX_CONTROL_PAYLOAD, OpCode, apply_mask};

pub(crate) type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Bound on shutting down the write half during teardown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Owner of the write half. All frames go through [`MsgWriter::frame`].
pub(crate) struct MsgWriter {
    pub(super) frame: Mu<FrameSink>,
}

pub(crate) struct FrameSink {
    bw: Option<BufWriter<BoxedWrite>>,
    buf: BytesMut,
    masks: MaskGen,
    role: Role,
}

impl MsgWriter {
    pub(crate) fn new(bw: BufWriter<BoxedWrite>, role: Role) -> Self {
        Self {
            frame: Mu::new(FrameSink {
                bw: Some(bw),
                buf: BytesMut::with_capacity(MAX_HEADER_LEN),
                masks: MaskGen::new(),
                role,
            }),
        }
    }

    /// Shut down and release the write half.
    ///
    /// Runs after the closed signal fired, so every writer is either gone or
    /// about to observe the closure and release the lock.
    pub(crate) async fn close(&self) {
        let mut sink = match self.frame.try_lock() {
            Some(sink) => sink,
            None => {
                trace!("waiting for in-flight frame before releasing write half");
                self.frame.force_lock().await
            }
        };
        // Bytes still buffered belong to a frame cut off by the closure and
        // must not reach the peer, so only the inner stream is shut down.
        if let Some(mut bw) = sink.bw.take() {
            let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, bw.get_mut().shutdown()).await;
        }
        sink.buf = BytesMut::new();
    }
}

impl FrameSink {
    async fn write_frame(&mut self, fin: bool, opcode: OpCode, payload: &[u8]) -> Result<()> {
        let bw = self
            .bw
            .as_mut()
            .ok_or_else(|| Error::Io("write half already released".into()))?;

        let mask = self.role.must_mask().then(|| self.masks.next_key());
        self.buf.clear();
        FrameHeader::new(fin, opcode, payload.len(), mask).encode(&mut self.buf);

        match mask {
            Some(mask) => {
                let start = self.buf.len();
                self.buf.extend_from_slice(payload);
                apply_mask(&mut self.buf[start..], mask);
                bw.write_all(&self.buf).await?;
            }
            None => {
                bw.write_all(&self.buf).await?;
                bw.write_all(payload).await?;
            }
        }

        if fin {
            bw.flush().await?;
        }
        Ok(())
    }
}

impl Shared {
    /// Write one frame under the write lock with `cancel` installed as the
    /// write deadline.
    ///
    /// Any failure closes the connection.
    pub(super) async fn write_frame(
        &self,
        cancel: &Cancel,
        fin: bool,
        opcode: OpCode,
        payload: &[u8],
    ) -> Result<()> {
        let mut sink = self.writer.frame.lock(self, cancel).await?;
        self.write_deadline.send_replace(Some(cancel.clone()));
        trace!(%opcode, len = payload.len(), fin, "writing frame");

        let res = tokio::select! {
            biased;
            () = self.closed.cancelled() => Err(self.closed_error()),
            res = sink.write_frame(fin, opcode, payload) => res,
        };

        self.write_deadline.send_replace(None);
        drop(sink);

        res.map_err(|err| {
            let err = if self.is_closed() {
                self.closed_error()
            } else {
                self.close(Some(err.clone()));
                err
            };
            Error::failed("write frame", err)
        })
    }

    /// Write a single control frame, bounded by the configured control
    /// timeout.
    pub(super) async fn write_control(
        &self,
        cancel: &Cancel,
        opcode: OpCode,
        payload: &[u8],
    ) -> Result<()> {
        if payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(Error::ControlFrameTooLarge(payload.len()));
        }
        let cancel = cancel.child_with_timeout(self.config.control_timeout);
        self.write_frame(&cancel, true, opcode, payload)
            .await
            .map_err(|err| Error::failed("write control frame", err))
    }

    /// Send our close frame. Only the first call sends anything.
    pub(super) async fn write_close(&self, code: CloseCode, reason: &str) -> Result<()> {
        let ce = CloseError::new(code, reason);
        let payload = ce.encode()?;

        {
            let mut state = self.close_state.lock();
            if std::mem::replace(&mut state.wrote_close, true) {
                return Ok(());
            }
            state.record(Error::SentClose(ce.clone()));
        }

        debug!(role = %self.config.role, %ce, "sending close frame");
        self.write_control(&Cancel::new(), OpCode::Close, &payload)
            .await
    }

    /// Record `err` and tell the peer about it. Delivery is best effort.
    pub(super) async fn write_error(&self, code: CloseCode, err: Error) {
        self.set_close_err(err.clone());
        if let Err(send_err) = self.write_close(code, &err.to_string()).await {
            debug!(error = %send_err, "failed to send close frame");
        }
    }

    pub(super) async fn write_message(
        &self,
        cancel: &Cancel,
        typ: MessageType,
        payload: &[u8],
    ) -> Result<()> {
        if self.close_state.lock().wrote_close && !self.is_closed() {
            let err = Error::ProtocolViolation("cannot write data after sending a close frame".into());
            self.close(Some(err.clone()));
            return Err(err);
        }
        self.write_frame(cancel, true, typ.opcode(), payload).await
    }
}
