//! Read path: frame validation, control frame handling and message assembly.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tracing::{debug, trace, warn};

use super::connection::Shared;
use super::mutex::{Lifecycle, Mu};
use crate::cancel::Cancel;
use crate::error::{Error, Result};
use crate::message::{CloseCode, CloseError, MessageType};
use crate::protocol::{FrameHeader, MAX_CONTROL_PAYLOAD, OpCode, apply_mask};

pub(crate) type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;

/// Owner of the read half. All frames come through [`MsgReader::source`].
pub(crate) struct MsgReader {
    pub(super) source: Mu<FrameSource>,
}

pub(crate) struct FrameSource {
    br: Option<BufReader<BoxedRead>>,
    /// Message being reassembled from fragments.
    partial: Option<(MessageType, BytesMut)>,
    /// Set once the peer's close frame was read; later reads return it.
    close_frame_err: Option<Error>,
}

impl MsgReader {
    pub(crate) fn new(br: BufReader<BoxedRead>) -> Self {
        Self {
            source: Mu::new(FrameSource {
                br: Some(br),
                partial: None,
                close_frame_err: None,
            }),
        }
    }

    /// Release the read half.
    pub(crate) async fn close(&self) {
        let mut source = self.source.force_lock().await;
        source.br = None;
        source.partial = None;
    }
}

fn released() -> Error {
    Error::Io("read half already released".into())
}

impl FrameSource {
    async fn read_header(&mut self) -> Result<FrameHeader> {
        let br = self.br.as_mut().ok_or_else(released)?;
        FrameHeader::read_from(br).await
    }

    async fn read_payload(&mut self, header: &FrameHeader) -> Result<BytesMut> {
        let br = self.br.as_mut().ok_or_else(released)?;
        // Lengths were checked against the configured limits before this.
        let len = usize::try_from(header.payload_len)
            .map_err(|_| Error::ProtocolViolation("frame length overflows usize".into()))?;
        let mut payload = BytesMut::zeroed(len);
        br.read_exact(&mut payload).await?;
        if let Some(mask) = header.mask {
            apply_mask(&mut payload, mask);
        }
        Ok(payload)
    }

    fn partial_len(&self) -> usize {
        self.partial.as_ref().map_or(0, |(_, buf)| buf.len())
    }
}

impl Shared {
    /// Read the next data message under the read lock with `cancel`
    /// installed as the read deadline.
    pub(super) async fn read_message(&self, cancel: &Cancel) -> Result<(MessageType, Bytes)> {
        let mut source = self.reader.source.lock(self, cancel).await?;
        if let Some(err) = source.close_frame_err.clone() {
            return Err(err);
        }

        self.read_deadline.send_replace(Some(cancel.clone()));
        let res = tokio::select! {
            biased;
            () = self.closed.cancelled() => Err(self.closed_error()),
            res = self.next_message(&mut source) => res,
        };
        self.read_deadline.send_replace(None);
        res
    }

    /// Read frames until a complete data message is assembled. Control
    /// frames are handled on the way.
    pub(super) async fn next_message(
        &self,
        source: &mut FrameSource,
    ) -> Result<(MessageType, Bytes)> {
        loop {
            let header = match source.read_header().await {
                Ok(header) => header,
                Err(err @ Error::Io(_)) => return Err(self.transport_failed(err)),
                Err(err) => return Err(self.fail(CloseCode::ProtocolError, err).await),
            };
            trace!(opcode = %header.opcode, len = header.payload_len, fin = header.fin, "read frame header");

            let checked = self.check_header(&header, source);
            if let Err((code, err)) = checked {
                return Err(self.fail(code, err).await);
            }

            let payload = match source.read_payload(&header).await {
                Ok(payload) => payload,
                Err(err) => return Err(self.transport_failed(err)),
            };

            if header.opcode.is_control() {
                self.handle_control(source, header.opcode, payload.freeze())
                    .await?;
                continue;
            }

            match header.opcode {
                OpCode::Continuation => {
                    if let Some((_, buf)) = source.partial.as_mut() {
                        buf.extend_from_slice(&payload);
                    }
                }
                OpCode::Text => source.partial = Some((MessageType::Text, payload)),
                _ => source.partial = Some((MessageType::Binary, payload)),
            }

            if !header.fin {
                continue;
            }
            let Some((typ, data)) = source.partial.take() else {
                continue;
            };
            if typ == MessageType::Text && std::str::from_utf8(&data).is_err() {
                return Err(self.fail(CloseCode::InvalidPayload, Error::InvalidUtf8).await);
            }
            return Ok((typ, data.freeze()));
        }
    }

    fn check_header(
        &self,
        header: &FrameHeader,
        source: &FrameSource,
    ) -> std::result::Result<(), (CloseCode, Error)> {
        let protocol = |msg: &str| (CloseCode::ProtocolError, Error::ProtocolViolation(msg.into()));

        if header.rsv2 || header.rsv3 {
            return Err(protocol("reserved bits set"));
        }
        if header.rsv1 {
            let compressible = matches!(header.opcode, OpCode::Text | OpCode::Binary);
            if compressible && self.config.compression.is_some() {
                return Err((
                    CloseCode::UnsupportedData,
                    Error::Unsupported("reading compressed messages"),
                ));
            }
            return Err(protocol("reserved bits set"));
        }

        if header.mask.is_some() != self.config.role.expects_masked() {
            return Err(if header.mask.is_some() {
                protocol("received masked frame from server")
            } else {
                protocol("received unmasked frame from client")
            });
        }

        if header.opcode.is_control() {
            if !header.fin {
                return Err(protocol("fragmented control frame"));
            }
            if header.payload_len > MAX_CONTROL_PAYLOAD as u64 {
                return Err((
                    CloseCode::ProtocolError,
                    Error::ControlFrameTooLarge(header.payload_len as usize),
                ));
            }
            return Ok(());
        }

        match (header.opcode, source.partial.is_some()) {
            (OpCode::Continuation, false) => return Err(protocol("unexpected continuation frame")),
            (OpCode::Text | OpCode::Binary, true) => {
                return Err(protocol("expected continuation frame"));
            }
            _ => {}
        }

        let max = self.config.max_message_size;
        let size = (source.partial_len() as u64).saturating_add(header.payload_len);
        if size > max as u64 {
            return Err((
                CloseCode::MessageTooBig,
                Error::MessageTooLarge {
                    size: usize::try_from(size).unwrap_or(usize::MAX),
                    max,
                },
            ));
        }
        Ok(())
    }

    async fn handle_control(
        &self,
        source: &mut FrameSource,
        opcode: OpCode,
        payload: Bytes,
    ) -> Result<()> {
        match opcode {
            OpCode::Ping => {
                let callback = self.on_ping.read().clone();
                if let Some(callback) = callback {
                    callback(&payload[..]);
                }
                self.write_control(&Cancel::new(), OpCode::Pong, &payload)
                    .await
            }
            OpCode::Pong => {
                if !self.pings.resolve(&payload) {
                    trace!("ignoring unsolicited pong");
                }
                Ok(())
            }
            OpCode::Close => {
                let ce = match CloseError::parse(&payload) {
                    Ok(ce) => ce,
                    Err(err) => {
                        let err = Error::failed("parse close frame", err);
                        return Err(self.fail(CloseCode::ProtocolError, err).await);
                    }
                };
                debug!(role = %self.config.role, %ce, "received close frame");

                let err = Error::ReceivedClose(ce.clone());
                source.close_frame_err = Some(err.clone());
                self.set_close_err(err.clone());
                if let Err(send_err) = self.write_close(ce.code, &ce.reason).await {
                    debug!(error = %send_err, "failed to echo close frame");
                }
                self.close(Some(err.clone()));
                Err(err)
            }
            OpCode::Continuation | OpCode::Text | OpCode::Binary => Ok(()),
        }
    }

    fn transport_failed(&self, err: Error) -> Error {
        if self.is_closed() {
            return self.closed_error();
        }
        self.close(Some(err.clone()));
        err
    }

    /// Tell the peer why we are giving up, then close.
    pub(super) async fn fail(&self, code: CloseCode, err: Error) -> Error {
        warn!(role = %self.config.role, error = %err, %code, "closing connection on protocol error");
        self.write_error(code, err.clone()).await;
        self.close(Some(err.clone()));
        err
    }

    /// Read and discard until the peer's close frame arrives.
    pub(super) async fn wait_close_frame(&self, cancel: &Cancel) -> Result<()> {
        let mut source = self.reader.source.lock(self, cancel).await?;
        if source.close_frame_err.is_some() {
            return Ok(());
        }
        source.partial = None;

        tokio::select! {
            biased;
            () = self.closed.cancelled() => Err(self.closed_error()),
            reason = cancel.fired() => {
                let err = Error::cancelled("wait for close frame", reason);
                self.close(Some(err.clone()));
                Err(err)
            }
            res = self.drain(&mut source) => res,
        }
    }

    async fn drain(&self, source: &mut FrameSource) -> Result<()> {
        loop {
            let (typ, data) = self.next_message(source).await?;
            trace!(?typ, len = data.len(), "discarding message while closing");
        }
    }
}
