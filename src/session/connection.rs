//! Connection lifecycle state machine
//!
//! ```text
//!            start(lan|usb)               packets flowing
//!   idle ───────────────────► connecting ───────────────► connected
//!    ▲  ▲                         │                          │
//!    │  │ 2s hold                 │ 10s, no packet           │ 2s silence (auto)
//!    │  └────────── failed ◄──────┘                          │
//!    └────────────────────────────────────────────────────────┘
//! ```
//!
//! The machine is synchronous and owns no I/O. Every transition returns the
//! [`Effect`]s the driver must apply. Timers are plain deadlines evaluated
//! by [`ConnectionMachine::tick`]; each only fires while the state it was
//! armed for is still current.

use serde::Serialize;
use std::time::{Duration, Instant};

use crate::config::{ConnectionConfig, ConnectionMethod, Protocol};
use crate::error::ConnectionError;
use crate::protocol::NoticeLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Failed,
}

/// Why a connection ended up back in `idle`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DisconnectReason {
    /// The user asked to stop
    Manual,
    /// The stream went silent
    Auto,
}

/// User-facing messages raised by transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    Connected,
    ConnectionFailed,
    DeviceDisconnected,
    Disconnected,
    ServiceStarted,
    ServiceStopped,
}

impl Notification {
    pub fn message(&self) -> &'static str {
        match self {
            Notification::Connected => "Connected",
            Notification::ConnectionFailed => "Connection failed",
            Notification::DeviceDisconnected => "Device disconnected",
            Notification::Disconnected => "Disconnected",
            Notification::ServiceStarted => "Bluetooth service started",
            Notification::ServiceStopped => "Bluetooth service stopped",
        }
    }

    pub fn level(&self) -> NoticeLevel {
        match self {
            Notification::Connected | Notification::ServiceStarted => NoticeLevel::Success,
            Notification::ConnectionFailed => NoticeLevel::Error,
            Notification::DeviceDisconnected => NoticeLevel::Warning,
            Notification::Disconnected | Notification::ServiceStopped => NoticeLevel::Info,
        }
    }
}

/// Work the driver performs on the machine's behalf
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Start a fresh packet session
    StartTransport(Protocol),
    /// Tear down the current packet session
    StopTransport,
    StateChanged {
        state: ConnectionState,
        reason: Option<DisconnectReason>,
    },
    Notify(Notification),
}

/// Authoritative connection state
#[derive(Debug)]
pub struct ConnectionMachine {
    timing: ConnectionConfig,
    state: ConnectionState,
    method: Option<ConnectionMethod>,
    last_reason: Option<DisconnectReason>,
    /// `received` counter as of the last observation
    baseline: u64,
    connect_deadline: Option<Instant>,
    silence_deadline: Option<Instant>,
    failed_deadline: Option<Instant>,
    cooldown_until: Option<Instant>,
}

impl ConnectionMachine {
    pub fn new(timing: ConnectionConfig) -> Self {
        Self {
            timing,
            state: ConnectionState::Idle,
            method: None,
            last_reason: None,
            baseline: 0,
            connect_deadline: None,
            silence_deadline: None,
            failed_deadline: None,
            cooldown_until: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Method of the current or most recent connection
    pub fn method(&self) -> Option<ConnectionMethod> {
        self.method
    }

    pub fn last_reason(&self) -> Option<DisconnectReason> {
        self.last_reason
    }

    /// Whether a packet session should currently exist
    pub fn transport_active(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) && self.method != Some(ConnectionMethod::Bluetooth)
    }

    /// Earliest pending deadline, for driver scheduling
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.connect_deadline,
            self.silence_deadline,
            self.failed_deadline,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Request a connection over `method`.
    ///
    /// Restarts if a connection is already in progress or established.
    pub fn start(
        &mut self,
        method: ConnectionMethod,
        now: Instant,
    ) -> Result<Vec<Effect>, ConnectionError> {
        if method == ConnectionMethod::Bluetooth || self.bluetooth_active() {
            self.check_cooldown(now)?;
        }

        let mut effects = Vec::new();
        if self.transport_active() {
            effects.push(Effect::StopTransport);
        }
        self.clear_timers();
        self.method = Some(method);
        self.last_reason = None;

        match method.protocol() {
            None => {
                self.cooldown_until = Some(now + self.timing.bluetooth_cooldown());
                self.enter(ConnectionState::Connected, None, &mut effects);
                effects.push(Effect::Notify(Notification::ServiceStarted));
            }
            Some(protocol) => {
                self.baseline = 0;
                self.connect_deadline = Some(now + self.timing.connect_timeout());
                effects.push(Effect::StartTransport(protocol));
                self.enter(ConnectionState::Connecting, None, &mut effects);
            }
        }

        Ok(effects)
    }

    /// Request a manual disconnect
    pub fn stop(&mut self, now: Instant) -> Result<Vec<Effect>, ConnectionError> {
        let mut effects = Vec::new();

        match self.state {
            ConnectionState::Idle => {}
            ConnectionState::Failed => {
                self.clear_timers();
                self.enter(ConnectionState::Idle, None, &mut effects);
            }
            ConnectionState::Connecting | ConnectionState::Connected => {
                if self.bluetooth_active() {
                    self.check_cooldown(now)?;
                    self.cooldown_until = Some(now + self.timing.bluetooth_cooldown());
                    self.clear_timers();
                    self.enter(
                        ConnectionState::Idle,
                        Some(DisconnectReason::Manual),
                        &mut effects,
                    );
                    effects.push(Effect::Notify(Notification::ServiceStopped));
                } else {
                    self.clear_timers();
                    effects.push(Effect::StopTransport);
                    self.enter(
                        ConnectionState::Idle,
                        Some(DisconnectReason::Manual),
                        &mut effects,
                    );
                    effects.push(Effect::Notify(Notification::Disconnected));
                }
            }
        }

        Ok(effects)
    }

    /// Feed the session's cumulative `received` counter
    pub fn observe(&mut self, received: u64, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        if !self.transport_active() {
            return effects;
        }

        let advanced = received > self.baseline;
        self.baseline = received;
        if !advanced {
            return effects;
        }

        match self.state {
            ConnectionState::Connecting => {
                self.connect_deadline = None;
                self.silence_deadline = Some(now + self.timing.silence_timeout());
                self.enter(ConnectionState::Connected, None, &mut effects);
                effects.push(Effect::Notify(Notification::Connected));
            }
            ConnectionState::Connected => {
                self.silence_deadline = Some(now + self.timing.silence_timeout());
            }
            _ => {}
        }

        effects
    }

    /// Fire any expired timer whose state is still current
    pub fn tick(&mut self, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();

        match self.state {
            ConnectionState::Connecting if expired(self.connect_deadline, now) => {
                self.clear_timers();
                self.failed_deadline = Some(now + self.timing.failed_hold());
                effects.push(Effect::StopTransport);
                self.enter(ConnectionState::Failed, None, &mut effects);
                effects.push(Effect::Notify(Notification::ConnectionFailed));
            }
            ConnectionState::Connected if expired(self.silence_deadline, now) => {
                self.clear_timers();
                effects.push(Effect::StopTransport);
                self.enter(
                    ConnectionState::Idle,
                    Some(DisconnectReason::Auto),
                    &mut effects,
                );
                effects.push(Effect::Notify(Notification::DeviceDisconnected));
            }
            ConnectionState::Failed if expired(self.failed_deadline, now) => {
                self.clear_timers();
                self.enter(ConnectionState::Idle, None, &mut effects);
            }
            _ => {}
        }

        effects
    }

    /// Remaining Bluetooth cooldown, if any
    pub fn cooldown_remaining(&self, now: Instant) -> Option<Duration> {
        self.cooldown_until
            .and_then(|until| until.checked_duration_since(now))
            .filter(|remaining| !remaining.is_zero())
    }

    fn bluetooth_active(&self) -> bool {
        self.method == Some(ConnectionMethod::Bluetooth)
            && self.state == ConnectionState::Connected
    }

    fn check_cooldown(&self, now: Instant) -> Result<(), ConnectionError> {
        match self.cooldown_remaining(now) {
            Some(remaining) => Err(ConnectionError::CoolingDown { remaining }),
            None => Ok(()),
        }
    }

    fn clear_timers(&mut self) {
        self.connect_deadline = None;
        self.silence_deadline = None;
        self.failed_deadline = None;
    }

    fn enter(
        &mut self,
        state: ConnectionState,
        reason: Option<DisconnectReason>,
        effects: &mut Vec<Effect>,
    ) {
        tracing::debug!("Connection state {:?} -> {:?}", self.state, state);
        self.state = state;
        if reason.is_some() {
            self.last_reason = reason;
        }
        effects.push(Effect::StateChanged { state, reason });
    }
}

fn expired(deadline: Option<Instant>, now: Instant) -> bool {
    deadline.map_or(false, |deadline| now >= deadline)
}
