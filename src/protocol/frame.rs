//! Frame header encoding and decoding (RFC 6455 Section 5.2).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |                     Masking key (if present)                  |
//! +---------------------------------------------------------------+
//! ```

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};
use crate::protocol::OpCode;

/// Maximum payload size for control frames.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Longest possible encoded header: 2 + 8 extended length + 4 mask.
pub(crate) const MAX_HEADER_LEN: usize = 14;

/// Decoded frame header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// Final fragment flag.
    pub fin: bool,
    /// Reserved bit 1 (per-message compression).
    pub rsv1: bool,
    /// Reserved bit 2.
    pub rsv2: bool,
    /// Reserved bit 3.
    pub rsv3: bool,
    /// Frame opcode.
    pub opcode: OpCode,
    /// Masking key, present on client-to-server frames.
    pub mask: Option<[u8; 4]>,
    /// Payload length in bytes.
    pub payload_len: u64,
}

impl FrameHeader {
    /// Header for an uncompressed frame.
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload_len: usize, mask: Option<[u8; 4]>) -> Self {
        Self {
            fin,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            mask,
            payload_len: payload_len as u64,
        }
    }

    /// Append the wire form of this header to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        let mut b0 = self.opcode.as_u8();
        if self.fin {
            b0 |= 0x80;
        }
        if self.rsv1 {
            b0 |= 0x40;
        }
        if self.rsv2 {
            b0 |= 0x20;
        }
        if self.rsv3 {
            b0 |= 0x10;
        }
        buf.put_u8(b0);

        let mask_bit = if self.mask.is_some() { 0x80 } else { 0 };
        match self.payload_len {
            len @ 0..=125 => buf.put_u8(mask_bit | len as u8),
            len @ 126..=0xFFFF => {
                buf.put_u8(mask_bit | 126);
                buf.put_u16(len as u16);
            }
            len => {
                buf.put_u8(mask_bit | 127);
                buf.put_u64(len);
            }
        }

        if let Some(mask) = self.mask {
            buf.put_slice(&mask);
        }
    }

    /// Read one header from `reader`.
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] if the stream fails or ends mid-header
    /// - [`Error::ReservedOpcode`] for reserved opcodes
    /// - [`Error::ProtocolViolation`] if the 64-bit length has its top bit set
    pub async fn read_from<R>(reader: &mut R) -> Result<Self>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut head = [0u8; 2];
        reader.read_exact(&mut head).await?;
        let [b0, b1] = head;

        let opcode = OpCode::from_u8(b0 & 0x0F)?;
        let payload_len = match b1 & 0x7F {
            126 => u64::from(reader.read_u16().await?),
            127 => reader.read_u64().await?,
            len => u64::from(len),
        };
        if payload_len >> 63 != 0 {
            return Err(Error::ProtocolViolation(
                "payload length has its most significant bit set".into(),
            ));
        }

        let mask = if b1 & 0x80 != 0 {
            let mut key = [0u8; 4];
            reader.read_exact(&mut key).await?;
            Some(key)
        } else {
            None
        };

        Ok(Self {
            fin: b0 & 0x80 != 0,
            rsv1: b0 & 0x40 != 0,
            rsv2: b0 & 0x20 != 0,
            rsv3: b0 & 0x10 != 0,
            opcode,
            mask,
            payload_len,
        })
    }
}

/// XOR `data` with the 4-byte masking key.
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Masking key source for client frames.
#[derive(Debug)]
pub(crate) struct MaskGen {
    state: u32,
}

impl MaskGen {
    pub(crate) fn new() -> Self {
        Self {
            state: random_seed(),
        }
    }

    pub(crate) fn next_key(&mut self) -> [u8; 4] {
        self.state = self.state.wrapping_add(0x9E37_79B9);
        let b = self.state.wrapping_mul(0x85EB_CA6B);
        let c = b ^ (b >> 13);
        c.wrapping_mul(0xC2B2_AE35).to_le_bytes()
    }
}

/// Falls back to the clock if the OS source is unavailable.
fn random_seed() -> u32 {
    let mut buf = [0u8; 4];
    if getrandom::getrandom(&mut buf).is_ok() {
        u32::from_le_bytes(buf)
    } else {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u32)
            .unwrap_or(0x1234_5678)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn decode(buf: &[u8]) -> Result<FrameHeader> {
        let mut rd = buf;
        FrameHeader::read_from(&mut rd).await
    }

    #[test]
    fn test_encode_small_unmasked() {
        let mut buf = BytesMut::new();
        FrameHeader::new(true, OpCode::Ping, 4, None).encode(&mut buf);
        assert_eq!(&buf[..], &[0x89, 0x04]);
    }

    #[test]
    fn test_encode_extended_lengths() {
        let mut buf = BytesMut::new();
        FrameHeader::new(false, OpCode::Binary, 300, None).encode(&mut buf);
        assert_eq!(&buf[..], &[0x02, 126, 0x01, 0x2c]);

        let mut buf = BytesMut::new();
        FrameHeader::new(true, OpCode::Binary, 70_000, Some([1, 2, 3, 4])).encode(&mut buf);
        assert_eq!(buf.len(), MAX_HEADER_LEN);
        assert_eq!(buf[1], 0x80 | 127);
        assert_eq!(&buf[10..], &[1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_read_masked_header() {
        let header = decode(&[0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d]).await.unwrap();
        assert!(header.fin);
        assert_eq!(header.opcode, OpCode::Text);
        assert_eq!(header.payload_len, 5);
        assert_eq!(header.mask, Some([0x37, 0xfa, 0x21, 0x3d]));
    }

    #[tokio::test]
    async fn test_read_rejects_reserved_opcode_and_huge_length() {
        assert_eq!(decode(&[0x83, 0x00]).await, Err(Error::ReservedOpcode(0x3)));

        let mut huge = vec![0x82, 127];
        huge.extend_from_slice(&u64::MAX.to_be_bytes());
        assert!(matches!(decode(&huge).await, Err(Error::ProtocolViolation(_))));
    }

    #[tokio::test]
    async fn test_read_truncated_header_is_io_error() {
        assert!(matches!(decode(&[0x81]).await, Err(Error::Io(_))));
    }

    #[test]
    fn test_apply_mask_is_involution() {
        // Masked "Hello" from RFC 6455 Section 5.7.
        let mut data = vec![0x7f, 0x9f, 0x4d, 0x51, 0x58];
        apply_mask(&mut data, [0x37, 0xfa, 0x21, 0x3d]);
        assert_eq!(data, b"Hello");
    }

    #[test]
    fn test_mask_keys_vary() {
        let mut masks = MaskGen::new();
        assert_ne!(masks.next_key(), masks.next_key());
    }
}
