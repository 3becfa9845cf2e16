//! Frame-level peer for protocol tests.

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};
use wsconn::protocol::{FrameHeader, OpCode, apply_mask};
use wsconn::{CloseError, Config, Connection, Role};

use super::PIPE_CAPACITY;

/// The other end of a [`Connection`], driven frame by frame.
pub struct RawPeer {
    io: DuplexStream,
    role: Role,
}

impl RawPeer {
    /// Build a connection from `config` and a raw peer playing the opposite
    /// role.
    pub fn connect(config: Config) -> (Connection, RawPeer) {
        Self::connect_with_capacity(config, PIPE_CAPACITY)
    }

    /// Like [`RawPeer::connect`] over a pipe holding at most `capacity`
    /// unread bytes.
    pub fn connect_with_capacity(config: Config, capacity: usize) -> (Connection, RawPeer) {
        let role = match config.role {
            Role::Client => Role::Server,
            Role::Server => Role::Client,
        };
        let (a, b) = duplex(capacity);
        (Connection::new(a, config), RawPeer { io: b, role })
    }

    /// Send a frame, masked the way this peer's role requires.
    pub async fn send_frame(&mut self, fin: bool, opcode: OpCode, payload: &[u8]) {
        let mask = self.role.must_mask().then_some([0x37, 0xfa, 0x21, 0x3d]);
        self.send_raw(fin, opcode, payload, mask, false).await;
    }

    /// Send a frame with full control over masking and RSV1.
    pub async fn send_raw(
        &mut self,
        fin: bool,
        opcode: OpCode,
        payload: &[u8],
        mask: Option<[u8; 4]>,
        rsv1: bool,
    ) {
        let mut header = FrameHeader::new(fin, opcode, payload.len(), mask);
        header.rsv1 = rsv1;

        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        let start = buf.len();
        buf.extend_from_slice(payload);
        if let Some(mask) = mask {
            apply_mask(&mut buf[start..], mask);
        }
        self.io.write_all(&buf).await.unwrap();
    }

    pub async fn send_close(&mut self, ce: &CloseError) {
        let payload = ce.encode().unwrap();
        self.send_frame(true, OpCode::Close, &payload).await;
    }

    /// Read the next frame, unmasking the payload.
    pub async fn recv_frame(&mut self) -> (FrameHeader, Vec<u8>) {
        let header = FrameHeader::read_from(&mut self.io).await.unwrap();
        let mut payload = vec![0u8; header.payload_len as usize];
        self.io.read_exact(&mut payload).await.unwrap();
        if let Some(mask) = header.mask {
            apply_mask(&mut payload, mask);
        }
        (header, payload)
    }

    /// Read frames until a close frame arrives and return its contents.
    pub async fn recv_close(&mut self) -> CloseError {
        loop {
            let (header, payload) = self.recv_frame().await;
            if header.opcode == OpCode::Close {
                return CloseError::parse(&payload).unwrap();
            }
        }
    }

    /// Everything the connection writes until it releases its end.
    pub async fn read_all(&mut self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.io.read_to_end(&mut buf).await.unwrap();
        buf
    }

    /// Whether the connection released its end of the pipe.
    pub async fn at_eof(&mut self) -> bool {
        let mut buf = [0u8; 64];
        loop {
            match self.io.read(&mut buf).await {
                Ok(0) | Err(_) => return true,
                Ok(_) => continue,
            }
        }
    }
}
