//! Packet codec
//!
//! Framing of (sequence, timestamp, PCM payload) for both transports. The
//! payload is raw PCM; nothing here compresses or checksums it.

pub mod framing;
pub mod packet;

pub use framing::{encode_frame, FrameDecoder};
pub use packet::{decode, encode, sequence_delta, AudioPacket, HEADER_LEN};
