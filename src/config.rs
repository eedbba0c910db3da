//! Application configuration
//!
//! Everything is optional in the TOML file; missing sections fall back to
//! the defaults below. Command-line flags override individual values.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::ConfigError;

/// Transport protocol for a packet session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Udp,
    Tcp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Udp => "udp",
            Protocol::Tcp => "tcp",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "udp" => Ok(Protocol::Udp),
            "tcp" => Ok(Protocol::Tcp),
            other => Err(format!("unknown protocol: {}", other)),
        }
    }
}

/// Physical medium the user picked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMethod {
    /// Wi-Fi / LAN
    Lan,
    /// USB tether with a reverse port forward to localhost
    Usb,
    /// OS-level A2DP sink, no packet path
    Bluetooth,
}

impl ConnectionMethod {
    /// Packet protocol for this medium, `None` for Bluetooth
    pub fn protocol(&self) -> Option<Protocol> {
        match self {
            ConnectionMethod::Lan => Some(Protocol::Udp),
            ConnectionMethod::Usb => Some(Protocol::Tcp),
            ConnectionMethod::Bluetooth => None,
        }
    }

    pub fn for_protocol(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Udp => ConnectionMethod::Lan,
            Protocol::Tcp => ConnectionMethod::Usb,
        }
    }
}

/// PCM layout of captured chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames (samples per channel) in one captured chunk
    pub frames_per_chunk: u32,
}

impl AudioFormat {
    /// Bytes per interleaved frame of signed 16-bit samples
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * BYTES_PER_SAMPLE
    }

    pub fn bytes_per_chunk(&self) -> usize {
        self.frames_per_chunk as usize * self.bytes_per_frame()
    }

    /// Samples (all channels) in one chunk
    pub fn samples_per_chunk(&self) -> usize {
        self.frames_per_chunk as usize * self.channels as usize
    }

    /// Playback time covered by one chunk
    pub fn chunk_duration_ms(&self) -> f64 {
        self.frames_per_chunk as f64 * 1000.0 / self.sample_rate as f64
    }

    pub fn chunk_duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames_per_chunk as f64 / self.sample_rate as f64)
    }

    /// Playout queue slots needed to hold `buffer_ms` of audio, at least one
    pub fn chunks_for_ms(&self, buffer_ms: u32) -> usize {
        let chunks = (buffer_ms as f64 / self.chunk_duration_ms()).ceil() as usize;
        chunks.max(1)
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            frames_per_chunk: DEFAULT_FRAMES_PER_CHUNK,
        }
    }
}

/// Socket-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Port the receiver listens on and the sender targets
    pub port: u16,
    /// SO_RCVBUF for the UDP receive socket
    pub udp_recv_buffer_bytes: usize,
    /// SO_SNDBUF for the UDP send socket
    pub udp_send_buffer_bytes: usize,
    /// Bound on each lazy TCP connect attempt
    pub tcp_connect_timeout_ms: u64,
    /// Largest TCP frame body accepted before the stream is considered corrupt
    pub max_frame_len: usize,
}

impl NetworkConfig {
    pub fn tcp_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.tcp_connect_timeout_ms)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            udp_recv_buffer_bytes: 1024 * 1024,
            udp_send_buffer_bytes: 256 * 1024,
            tcp_connect_timeout_ms: 2000,
            max_frame_len: crate::codec::framing::DEFAULT_MAX_FRAME_LEN,
        }
    }
}

/// Receive-side playout and reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Playout depth for Wi-Fi, larger to absorb jitter
    pub udp_buffer_ms: u32,
    /// Playout depth for the USB tether, kept minimal
    pub tcp_buffer_ms: u32,
    /// How often stats are pushed to the UI
    pub stats_interval_ms: u64,
    /// How often the connection monitor samples stats and checks timers
    pub monitor_interval_ms: u64,
}

impl ReceiverConfig {
    pub fn default_buffer_ms(&self, protocol: Protocol) -> u32 {
        match protocol {
            Protocol::Udp => self.udp_buffer_ms,
            Protocol::Tcp => self.tcp_buffer_ms,
        }
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            udp_buffer_ms: DEFAULT_UDP_BUFFER_MS,
            tcp_buffer_ms: DEFAULT_TCP_BUFFER_MS,
            stats_interval_ms: 500,
            monitor_interval_ms: 100,
        }
    }
}

/// Device-side sending
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Chunks allowed to wait between capture and the transmit worker
    pub queue_capacity: usize,
    /// Emit a debug log line every this many packets
    pub log_every: u32,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 32,
            log_every: 100,
        }
    }
}

/// Connection lifecycle timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub connect_timeout_ms: u64,
    pub silence_timeout_ms: u64,
    /// How long `failed` is shown before clearing to `idle`
    pub failed_hold_ms: u64,
    pub bluetooth_cooldown_ms: u64,
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn silence_timeout(&self) -> Duration {
        Duration::from_millis(self.silence_timeout_ms)
    }

    pub fn failed_hold(&self) -> Duration {
        Duration::from_millis(self.failed_hold_ms)
    }

    pub fn bluetooth_cooldown(&self) -> Duration {
        Duration::from_millis(self.bluetooth_cooldown_ms)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            silence_timeout_ms: 2_000,
            failed_hold_ms: 2_000,
            bluetooth_cooldown_ms: 3_000,
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub audio: AudioFormat,
    pub receiver: ReceiverConfig,
    pub sender: SenderConfig,
    pub connection: ConnectionConfig,
}

impl AppConfig {
    /// Platform config file location, e.g. `~/.config/audiosync/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "kurei", "audiosync")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Parse and validate a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, or the platform default location if it exists, or defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }

        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::info!("Loading config from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: &str) -> ConfigError {
            ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            }
        }

        if self.audio.sample_rate == 0 {
            return Err(invalid("audio.sample_rate", "must be non-zero"));
        }
        if self.audio.channels == 0 {
            return Err(invalid("audio.channels", "must be non-zero"));
        }
        if self.audio.frames_per_chunk == 0 {
            return Err(invalid("audio.frames_per_chunk", "must be non-zero"));
        }
        if self.network.max_frame_len < crate::codec::HEADER_LEN {
            return Err(invalid(
                "network.max_frame_len",
                "must hold at least a packet header",
            ));
        }
        if self.audio.bytes_per_chunk() + crate::codec::HEADER_LEN > self.network.max_frame_len {
            return Err(invalid(
                "network.max_frame_len",
                "smaller than one encoded chunk",
            ));
        }
        if self.sender.queue_capacity == 0 {
            return Err(invalid("sender.queue_capacity", "must be non-zero"));
        }
        if self.receiver.monitor_interval_ms == 0 || self.receiver.stats_interval_ms == 0 {
            return Err(invalid("receiver", "intervals must be non-zero"));
        }
        if self.connection.connect_timeout_ms == 0 || self.connection.silence_timeout_ms == 0 {
            return Err(invalid("connection", "timeouts must be non-zero"));
        }

        Ok(())
    }
}
