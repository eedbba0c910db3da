//! Synthetic sine source
//!
//! Paced at the real chunk rate so it behaves like a capture device. Used by
//! the sender's `--tone` mode and by tests on machines without audio input.

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use super::{CaptureSource, ChunkSink, Chunker};
use crate::config::AudioFormat;
use crate::error::AudioError;

pub struct ToneSource {
    format: AudioFormat,
    frequency: f32,
    amplitude: f32,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl ToneSource {
    pub fn new(format: AudioFormat, frequency: f32, amplitude: f32) -> Self {
        Self {
            format,
            frequency,
            amplitude: amplitude.clamp(0.0, 1.0),
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }
}

impl CaptureSource for ToneSource {
    fn start(&mut self, sink: Arc<dyn ChunkSink>) -> Result<(), AudioError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let running = self.running.clone();
        let format = self.format;
        let step = TAU * self.frequency / format.sample_rate as f32;
        let amplitude = self.amplitude;

        let handle = thread::Builder::new()
            .name("tone-source".to_string())
            .spawn(move || {
                let mut chunker = Chunker::new(&format);
                let mut samples = vec![0.0f32; format.samples_per_chunk()];
                let mut phase = 0.0f32;
                let channels = format.channels as usize;
                let period = format.chunk_duration();
                let mut next_deadline = Instant::now();

                while running.load(Ordering::Relaxed) {
                    for frame in samples.chunks_mut(channels) {
                        let value = phase.sin() * amplitude;
                        frame.iter_mut().for_each(|s| *s = value);
                        phase = (phase + step) % TAU;
                    }
                    chunker.push(&samples, |chunk| {
                        sink.submit(chunk);
                    });

                    next_deadline += period;
                    let now = Instant::now();
                    if next_deadline > now {
                        thread::sleep(next_deadline - now);
                    } else {
                        // Fell behind; do not try to burst-catch-up
                        next_deadline = now;
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for ToneSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct CollectingSink(Mutex<Vec<Bytes>>);

    impl ChunkSink for CollectingSink {
        fn submit(&self, pcm: Bytes) -> bool {
            self.0.lock().push(pcm);
            true
        }
    }

    #[test]
    fn test_tone_produces_full_chunks() {
        let format = AudioFormat {
            sample_rate: 48000,
            channels: 2,
            frames_per_chunk: 480,
        };
        let sink = Arc::new(CollectingSink::default());
        let mut tone = ToneSource::new(format, 440.0, 0.5);

        tone.start(sink.clone()).unwrap();
        thread::sleep(Duration::from_millis(60));
        tone.stop();

        let chunks = sink.0.lock();
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.len() == format.bytes_per_chunk()));
        assert!(!tone.is_running());
    }
}
