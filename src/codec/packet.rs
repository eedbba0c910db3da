//! Audio packet wire format
//!
//! Every packet is a fixed 12-byte header followed by raw PCM:
//!
//! ```text
//! ┌──────────────┬──────────────────────┬─────────────────────┐
//! │ sequence u32 │ timestamp_ms i64     │ payload (PCM bytes) │
//! │ big-endian   │ big-endian           │ rest of the unit    │
//! └──────────────┴──────────────────────┴─────────────────────┘
//! ```
//!
//! Over UDP one datagram carries one packet. Over TCP the packet sits inside
//! a length-prefixed frame (see [`crate::codec::framing`]).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::DecodeError;

/// Header length in bytes: 4-byte sequence + 8-byte timestamp
pub const HEADER_LEN: usize = 12;

/// A decoded audio packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPacket {
    /// Sender-assigned sequence number, wraps at 2^32
    pub sequence: u32,
    /// Capture time in milliseconds since the Unix epoch
    pub timestamp_ms: i64,
    /// Raw PCM bytes
    pub payload: Bytes,
}

impl AudioPacket {
    pub fn new(sequence: u32, timestamp_ms: i64, payload: Bytes) -> Self {
        Self {
            sequence,
            timestamp_ms,
            payload,
        }
    }

    /// Encoded size on the wire (without any TCP length prefix)
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    pub fn encode(&self) -> Bytes {
        encode(self.sequence, self.timestamp_ms, &self.payload)
    }
}

/// Signed distance from `reference` to `sequence`, wrap-aware.
///
/// Positive means `sequence` was emitted after `reference`.
#[inline]
pub fn sequence_delta(sequence: u32, reference: u32) -> i32 {
    sequence.wrapping_sub(reference) as i32
}

/// Encode a packet into a fresh buffer of `HEADER_LEN + payload.len()` bytes
pub fn encode(sequence: u32, timestamp_ms: i64, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    encode_into(&mut buf, sequence, timestamp_ms, payload);
    buf.freeze()
}

/// Append an encoded packet to `buf`
pub fn encode_into(buf: &mut BytesMut, sequence: u32, timestamp_ms: i64, payload: &[u8]) {
    buf.reserve(HEADER_LEN + payload.len());
    buf.put_u32(sequence);
    buf.put_i64(timestamp_ms);
    buf.put_slice(payload);
}

/// Decode a packet from a complete unit (datagram or TCP frame body)
pub fn decode(data: &[u8]) -> Result<AudioPacket, DecodeError> {
    decode_bytes(Bytes::copy_from_slice(data))
}

/// Decode without copying the payload out of `data`
pub fn decode_bytes(mut data: Bytes) -> Result<AudioPacket, DecodeError> {
    if data.len() < HEADER_LEN {
        return Err(DecodeError::Truncated {
            len: data.len(),
            needed: HEADER_LEN,
        });
    }

    let sequence = data.get_u32();
    let timestamp_ms = data.get_i64();

    Ok(AudioPacket {
        sequence,
        timestamp_ms,
        payload: data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_header_layout() {
        let encoded = encode(0x0102_0304, 0x1122_3344_5566_7788, &[0xAA, 0xBB]);

        assert_eq!(encoded.len(), HEADER_LEN + 2);
        assert_eq!(&encoded[0..4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(
            &encoded[4..12],
            &[0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]
        );
        assert_eq!(&encoded[12..], &[0xAA, 0xBB]);
    }

    #[test]
    fn test_truncated_header() {
        let err = decode(&[0u8; 11]).unwrap_err();
        assert_eq!(err, DecodeError::Truncated { len: 11, needed: 12 });

        assert!(decode(&[]).is_err());
    }

    #[test]
    fn test_sequence_delta_wraps() {
        assert_eq!(sequence_delta(5, 3), 2);
        assert_eq!(sequence_delta(3, 5), -2);
        assert_eq!(sequence_delta(1, u32::MAX), 2);
        assert_eq!(sequence_delta(u32::MAX, 1), -2);
    }

    #[test]
    fn test_empty_payload() {
        let packet = decode(&encode(7, -1, &[])).unwrap();
        assert_eq!(packet.sequence, 7);
        assert_eq!(packet.timestamp_ms, -1);
        assert!(packet.payload.is_empty());
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            seq in any::<u32>(),
            ts in any::<i64>(),
            payload in proptest::collection::vec(any::<u8>(), 0..4096),
        ) {
            let packet = decode(&encode(seq, ts, &payload)).unwrap();
            prop_assert_eq!(packet.sequence, seq);
            prop_assert_eq!(packet.timestamp_ms, ts);
            prop_assert_eq!(&packet.payload[..], &payload[..]);
        }
    }
}
