//! Length-prefixed framing for the TCP transport
//!
//! Each frame is a 4-byte big-endian length followed by exactly that many
//! bytes of encoded packet. A stream socket may hand us any slice of that,
//! so the decoder accumulates until a full frame is present.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::packet::{self, AudioPacket, HEADER_LEN};
use crate::error::DecodeError;

/// Size of the frame length prefix
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Default upper bound on a single frame body
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

/// Encode a packet as one length-prefixed frame
pub fn encode_frame(sequence: u32, timestamp_ms: i64, payload: &[u8]) -> Bytes {
    let body_len = HEADER_LEN + payload.len();
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_LEN + body_len);
    buf.put_u32(body_len as u32);
    packet::encode_into(&mut buf, sequence, timestamp_ms, payload);
    buf.freeze()
}

/// Incremental decoder for length-prefixed frames
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_frame_len: usize,
}

impl FrameDecoder {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(16 * 1024),
            max_frame_len,
        }
    }

    /// Buffer used as the read target, so socket reads land directly in it
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Append bytes received from the stream
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes held that do not yet form a complete frame
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial frame, used when the connection is replaced
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Pop the next complete frame body, if one is buffered.
    ///
    /// A length outside `HEADER_LEN..=max_frame_len` means the stream is out
    /// of sync; the caller must discard the connection.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, DecodeError> {
        if self.buffer.len() < LENGTH_PREFIX_LEN {
            return Ok(None);
        }

        let len = u32::from_be_bytes([
            self.buffer[0],
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
        ]) as usize;

        if len > self.max_frame_len {
            return Err(DecodeError::FrameTooLarge(len));
        }
        if len < HEADER_LEN {
            return Err(DecodeError::FrameTooShort(len));
        }

        if self.buffer.len() < LENGTH_PREFIX_LEN + len {
            self.buffer.reserve(LENGTH_PREFIX_LEN + len - self.buffer.len());
            return Ok(None);
        }

        self.buffer.advance(LENGTH_PREFIX_LEN);
        Ok(Some(self.buffer.split_to(len).freeze()))
    }

    /// Pop and decode the next complete packet
    pub fn next_packet(&mut self) -> Result<Option<AudioPacket>, DecodeError> {
        match self.next_frame()? {
            Some(frame) => packet::decode_bytes(frame).map(Some),
            None => Ok(None),
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_split_across_three_reads() {
        let payload: Vec<u8> = (0..200u16).map(|v| v as u8).collect();
        let frame = encode_frame(42, 1_700_000_000_000, &payload);
        let mut decoder = FrameDecoder::default();

        decoder.extend(&frame[..3]);
        assert!(decoder.next_packet().unwrap().is_none());

        decoder.extend(&frame[3..57]);
        assert!(decoder.next_packet().unwrap().is_none());

        decoder.extend(&frame[57..]);
        let packet = decoder.next_packet().unwrap().unwrap();
        assert_eq!(packet.sequence, 42);
        assert_eq!(packet.timestamp_ms, 1_700_000_000_000);
        assert_eq!(&packet.payload[..], &payload[..]);

        assert!(decoder.next_packet().unwrap().is_none());
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_multiple_frames_in_one_read() {
        let mut stream = BytesMut::new();
        stream.extend_from_slice(&encode_frame(1, 10, &[1, 1]));
        stream.extend_from_slice(&encode_frame(2, 20, &[2, 2, 2]));
        stream.extend_from_slice(&encode_frame(3, 30, &[])[..5]);

        let mut decoder = FrameDecoder::default();
        decoder.extend(&stream);

        assert_eq!(decoder.next_packet().unwrap().unwrap().sequence, 1);
        assert_eq!(decoder.next_packet().unwrap().unwrap().sequence, 2);
        assert!(decoder.next_packet().unwrap().is_none());
        assert_eq!(decoder.pending(), 5);
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut decoder = FrameDecoder::new(64);
        decoder.extend(&1000u32.to_be_bytes());
        assert_eq!(decoder.next_frame(), Err(DecodeError::FrameTooLarge(1000)));
    }

    #[test]
    fn test_short_length_rejected() {
        let mut decoder = FrameDecoder::default();
        decoder.extend(&4u32.to_be_bytes());
        decoder.extend(&[0, 0, 0, 0]);
        assert_eq!(decoder.next_frame(), Err(DecodeError::FrameTooShort(4)));
    }

    #[test]
    fn test_reset_discards_partial_frame() {
        let frame = encode_frame(9, 0, &[5; 32]);
        let mut decoder = FrameDecoder::default();
        decoder.extend(&frame[..10]);
        decoder.reset();
        decoder.extend(&frame);
        assert_eq!(decoder.next_packet().unwrap().unwrap().sequence, 9);
    }
}
