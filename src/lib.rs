//! # AudioSync
//!
//! Low-latency PCM streaming from a capture device to a desktop receiver.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────── SENDER ─────────────────────────────────┐
//! │  ┌──────────────┐  try_send   ┌────────────────┐   ┌─────────────────┐  │
//! │  │ Capture      │ ──────────► │ Transmit worker│──►│ UDP datagram or │  │
//! │  │ (cpal/tone)  │  seq + ts   │ (own thread)   │   │ TCP frame (lazy)│  │
//! │  └──────────────┘             └────────────────┘   └────────┬────────┘  │
//! └─────────────────────────────────────────────────────────────┼───────────┘
//!                                   [seq u32][ts i64][PCM...]   │
//! ┌──────────────────────────────── RECEIVER ───────────────────┼───────────┐
//! │  ┌─────────────────┐   ┌──────────────────┐   ┌─────────────▼────────┐  │
//! │  │ Playback (cpal) │◄──│ Playout buffer   │◄──│ Receive task (tokio) │  │
//! │  │ volume / mute   │   │ reorder / evict  │   │ loss accounting      │  │
//! │  └─────────────────┘   └──────────────────┘   └──────────┬───────────┘  │
//! │                                          stats snapshot  │              │
//! │  ┌──────────────────────┐   ┌───────────────────────────▼────────────┐  │
//! │  │ Control channel      │◄─►│ Controller + connection state machine  │  │
//! │  │ (JSON lines, stdio)  │   │ idle → connecting → connected → failed │  │
//! │  └──────────────────────┘   └────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod control;
pub mod error;
pub mod network;
pub mod protocol;
pub mod session;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Sample rate of the reference deployment
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Frames per captured chunk, ~21.3ms at 48kHz
    pub const DEFAULT_FRAMES_PER_CHUNK: u32 = 1024;

    /// Payload samples are signed 16-bit little-endian
    pub const BYTES_PER_SAMPLE: usize = 2;

    /// Default port for the audio stream
    pub const DEFAULT_PORT: u16 = 50005;

    /// Playout depth for UDP over Wi-Fi
    pub const DEFAULT_UDP_BUFFER_MS: u32 = 100;

    /// Playout depth for TCP over the USB tether
    pub const DEFAULT_TCP_BUFFER_MS: u32 = 40;

    /// Largest datagram the receiver reads
    pub const MAX_DATAGRAM_SIZE: usize = 65535;

    /// Volume change applied by one volume_up / volume_down
    pub const VOLUME_STEP: f32 = 0.05;
}
