//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod convert;
pub mod device;
pub mod playback;
pub mod tone;
pub mod volume;

use bytes::{Bytes, BytesMut};
use std::sync::Arc;

use crate::config::AudioFormat;
use crate::error::AudioError;

pub use buffer::{PlayoutBuffer, SharedPlayout};
pub use capture::AudioCapture;
pub use device::{list_input_devices, list_output_devices};
pub use playback::AudioPlayback;
pub use tone::ToneSource;
pub use volume::VolumeControl;

/// Destination for captured PCM chunks.
///
/// Called from the capture context, so it must never block.
pub trait ChunkSink: Send + Sync {
    /// Hand over one chunk; `false` if it was dropped
    fn submit(&self, pcm: Bytes) -> bool;
}

/// Something that produces PCM chunks on its own thread
pub trait CaptureSource: Send {
    fn start(&mut self, sink: Arc<dyn ChunkSink>) -> Result<(), AudioError>;

    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// Accumulates interleaved f32 samples into fixed-size i16 PCM chunks
pub struct Chunker {
    chunk_bytes: usize,
    pending: BytesMut,
}

impl Chunker {
    pub fn new(format: &AudioFormat) -> Self {
        let chunk_bytes = format.bytes_per_chunk();
        Self {
            chunk_bytes,
            pending: BytesMut::with_capacity(chunk_bytes * 2),
        }
    }

    /// Append samples, calling `emit` for each completed chunk
    pub fn push(&mut self, samples: &[f32], mut emit: impl FnMut(Bytes)) {
        convert::f32_to_pcm_bytes(samples, &mut self.pending);
        while self.pending.len() >= self.chunk_bytes {
            emit(self.pending.split_to(self.chunk_bytes).freeze());
        }
    }

    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunker_emits_fixed_chunks() {
        let format = AudioFormat {
            sample_rate: 48000,
            channels: 2,
            frames_per_chunk: 4,
        };
        let mut chunker = Chunker::new(&format);
        let mut chunks = Vec::new();

        // 4 frames * 2 channels = 8 samples = 16 bytes per chunk
        chunker.push(&[0.0; 6], |c| chunks.push(c));
        assert!(chunks.is_empty());

        chunker.push(&[0.5; 12], |c| chunks.push(c));
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.len() == 16));
        assert_eq!(chunker.pending_bytes(), 4);
    }
}
