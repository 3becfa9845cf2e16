//! Wire-level pieces of RFC 6455 used by the connection: opcodes and frame
//! headers.

pub mod frame;
pub mod opcode;

pub use frame::{FrameHeader, MAX_CONTROL_PAYLOAD, apply_mask};
pub use opcode::OpCode;
