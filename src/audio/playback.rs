//! Audio playback to an output device
//!
//! The output callback pulls chunks from the [`SharedPlayout`] and writes
//! silence whenever the buffer has nothing ready.

use bytes::Bytes;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::buffer::SharedPlayout;
use super::convert::pcm_bytes_to_f32;
use super::device::output_device;
use super::volume::VolumeControl;
use crate::config::AudioFormat;
use crate::error::AudioError;

/// Partially consumed chunk carried between callbacks
#[derive(Default)]
struct ChunkCursor {
    chunk: Option<Bytes>,
    offset: usize,
}

impl ChunkCursor {
    /// Fill `out` from the playout buffer, returning samples that were silence
    fn fill(&mut self, out: &mut [f32], playout: &SharedPlayout, gain: f32) -> usize {
        let mut written = 0;

        while written < out.len() {
            let exhausted = self
                .chunk
                .as_ref()
                .map_or(true, |chunk| self.offset >= chunk.len());
            if exhausted {
                self.chunk = playout.pop();
                self.offset = 0;
            }
            let Some(chunk) = self.chunk.as_ref() else {
                break;
            };

            let n = pcm_bytes_to_f32(&chunk[self.offset..], gain, &mut out[written..]);
            if n == 0 {
                // Odd trailing byte, skip the chunk
                self.chunk = None;
                continue;
            }
            self.offset += n * 2;
            written += n;
        }

        out[written..].fill(0.0);
        out.len() - written
    }
}

/// Plays a [`SharedPlayout`] on a cpal output device
pub struct AudioPlayback {
    /// Output device index, default device when `None`
    device_index: Option<usize>,

    format: AudioFormat,

    running: Arc<AtomicBool>,

    thread_handle: Option<JoinHandle<()>>,

    /// Callbacks that had to pad with silence
    starved_callbacks: Arc<AtomicU64>,
}

impl AudioPlayback {
    pub fn new(device_index: Option<usize>, format: AudioFormat) -> Self {
        Self {
            device_index,
            format,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            starved_callbacks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start the output stream, returning once the device is open
    pub fn start(
        &mut self,
        playout: Arc<SharedPlayout>,
        volume: Arc<VolumeControl>,
    ) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let running = self.running.clone();
        let starved = self.starved_callbacks.clone();
        let device_index = self.device_index;
        let format = self.format;

        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || {
                let device = match output_device(device_index) {
                    Ok(device) => device,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());

                let config = StreamConfig {
                    channels: format.channels,
                    sample_rate: cpal::SampleRate(format.sample_rate),
                    buffer_size: cpal::BufferSize::Default,
                };

                let mut cursor = ChunkCursor::default();

                let stream = device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let silent = cursor.fill(data, &playout, volume.gain());
                        if silent > 0 {
                            starved.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    |err| {
                        tracing::error!("Playback stream error: {}", err);
                    },
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }

                tracing::info!(
                    "Playback started on '{}': {} Hz, {} ch",
                    device_name,
                    format.sample_rate,
                    format.channels
                );
                let _ = ready_tx.send(Ok(()));

                while running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(AudioError::StreamError("playback thread exited".to_string())));
        if ready.is_err() {
            self.stop();
        }
        ready
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn starved_callbacks(&self) -> u64 {
        self.starved_callbacks.load(Ordering::Relaxed)
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}
