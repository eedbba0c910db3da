//! Control channel message types
//!
//! Commands arrive as `{"command": ..., "payload": {...}}` and events go out
//! as `{"type": ..., "data": ...}`, one JSON object per line.

use serde::{Deserialize, Serialize};

use crate::config::{ConnectionMethod, Protocol};
use crate::error::{Error, Result};
use crate::session::connection::{ConnectionState, DisconnectReason};

/// Audio device information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioDeviceInfo {
    /// Position in the host's device list, used as `device_index`
    pub index: usize,
    pub name: String,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// Wire shape of a command line before dispatch
#[derive(Debug, Deserialize)]
struct RawCommand {
    command: String,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Payload of the `start` command
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct StartPayload {
    /// Listen port; the configured port when absent
    pub port: Option<u16>,
    /// Output device index; negative or absent selects the default output
    pub device_index: Option<i64>,
    pub buffer_ms: Option<u32>,
    pub protocol: Option<Protocol>,
    pub method: Option<ConnectionMethod>,
}

impl StartPayload {
    pub fn output_device(&self) -> Option<usize> {
        self.device_index
            .filter(|index| *index >= 0)
            .and_then(|index| usize::try_from(index).ok())
    }

    /// The connection method; an explicit method wins over `protocol`
    pub fn method(&self) -> ConnectionMethod {
        match self.method {
            Some(method) => method,
            None => ConnectionMethod::for_protocol(self.protocol.unwrap_or(Protocol::Udp)),
        }
    }

    /// Transport protocol, `None` for Bluetooth
    pub fn protocol(&self) -> Option<Protocol> {
        self.method().protocol()
    }
}

/// Command from the UI
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start(StartPayload),
    Stop,
    GetDevices,
    GetInfo,
    VolumeUp,
    VolumeDown,
    MuteToggle,
    Ping,
}

impl Command {
    /// Parse one line of the control channel
    pub fn parse(line: &str) -> Result<Self> {
        let raw: RawCommand = serde_json::from_str(line)?;

        let command = match raw.command.as_str() {
            "start" => {
                let payload = if raw.payload.is_null() {
                    StartPayload::default()
                } else {
                    serde_json::from_value(raw.payload)?
                };
                Command::Start(payload)
            }
            "stop" => Command::Stop,
            "get_devices" => Command::GetDevices,
            "get_info" => Command::GetInfo,
            "volume_up" => Command::VolumeUp,
            "volume_down" => Command::VolumeDown,
            "mute_toggle" => Command::MuteToggle,
            "ping" => Command::Ping,
            other => return Err(Error::Control(format!("unknown command: {}", other))),
        };

        Ok(command)
    }
}

/// Whether a packet session is running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running,
    Stopped,
}

/// Periodic receive statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsReport {
    pub received: u64,
    pub lost: u64,
    pub queue: usize,
    pub latency_ms: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionReport {
    pub state: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DisconnectReason>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// User-facing toast
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostInfo {
    pub ip: String,
    pub hostname: String,
}

/// Event to the UI
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Event {
    Ready(bool),
    State(RunState),
    Stats(StatsReport),
    Devices(Vec<AudioDeviceInfo>),
    Info(HostInfo),
    VolumeLevel(f32),
    MuteState(bool),
    Connection(ConnectionReport),
    Notice(Notice),
    Status(String),
    Error(String),
    /// Epoch seconds
    Pong(i64),
}

impl Event {
    pub fn notice(level: NoticeLevel, message: impl Into<String>) -> Self {
        Event::Notice(Notice {
            level,
            message: message.into(),
        })
    }

    /// Serialize as a single line without the trailing newline
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
