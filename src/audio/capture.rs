//! Audio capture from an input device
//!
//! The cpal stream lives on a dedicated thread. Its callback converts
//! samples to PCM chunks and submits them to a [`ChunkSink`] without
//! blocking; the network never back-pressures capture.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{CaptureSource, ChunkSink, Chunker};
use crate::audio::device::input_device;
use crate::config::AudioFormat;
use crate::error::AudioError;

/// Capture from a cpal input device
pub struct AudioCapture {
    /// Input device name, default device when `None`
    device_name: Option<String>,
    format: AudioFormat,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl AudioCapture {
    pub fn new(device_name: Option<String>, format: AudioFormat) -> Self {
        Self {
            device_name,
            format,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }
}

impl CaptureSource for AudioCapture {
    fn start(&mut self, sink: Arc<dyn ChunkSink>) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let running = self.running.clone();
        let device_name = self.device_name.clone();
        let format = self.format;

        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let device = match input_device(device_name.as_deref()) {
                    Ok(device) => device,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let config = StreamConfig {
                    channels: format.channels,
                    sample_rate: cpal::SampleRate(format.sample_rate),
                    buffer_size: cpal::BufferSize::Default,
                };

                let mut chunker = Chunker::new(&format);
                let callback_running = running.clone();

                let stream = device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if !callback_running.load(Ordering::Relaxed) {
                            return;
                        }
                        chunker.push(data, |chunk| {
                            sink.submit(chunk);
                        });
                    },
                    |err| {
                        tracing::error!("Capture stream error: {}", err);
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
                    "Capture started: {} Hz, {} ch, {} frames/chunk",
                    format.sample_rate,
                    format.channels,
                    format.frames_per_chunk
                );
                let _ = ready_tx.send(Ok(()));

                // The stream stops when dropped at the end of this closure
                while running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.worker = Some(handle);

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(AudioError::StreamError("capture thread exited".to_string())));
        if ready.is_err() {
            self.stop();
        }
        ready
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
