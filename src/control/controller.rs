//! Receiver controller
//!
//! Single task that owns the connection state machine and the current
//! receiver session. It multiplexes three inputs: UI commands, the monitor
//! tick that feeds packet counts and timers into the machine, and the stats
//! tick that reports to the UI.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::time::{interval, Instant, MissedTickBehavior};

use super::channel::{ControlReader, EventWriter};
use super::host::host_info;
use crate::audio::{list_output_devices, VolumeControl};
use crate::config::{AppConfig, Protocol};
use crate::error::Result;
use crate::protocol::{
    Command, ConnectionReport, Event, NoticeLevel, RunState, StartPayload, StatsReport,
};
use crate::session::{ConnectionMachine, Effect, ReceiverSession, ReceiverSettings};

pub struct Controller<W> {
    config: AppConfig,
    machine: ConnectionMachine,
    session: Option<ReceiverSession>,
    /// Parameters of the most recent `start`, used when the machine asks
    /// for a transport
    requested: StartPayload,
    volume: Arc<VolumeControl>,
    events: EventWriter<W>,
    /// Open an output device for each session
    playback: bool,
}

impl<W: AsyncWrite + Unpin> Controller<W> {
    pub fn new(config: AppConfig, events: EventWriter<W>) -> Self {
        Self {
            machine: ConnectionMachine::new(config.connection.clone()),
            config,
            session: None,
            requested: StartPayload::default(),
            volume: Arc::new(VolumeControl::default()),
            events,
            playback: true,
        }
    }

    /// Run sessions without opening an audio output
    pub fn headless(mut self) -> Self {
        self.playback = false;
        self
    }

    pub fn volume(&self) -> Arc<VolumeControl> {
        self.volume.clone()
    }

    /// Serve commands until the reader reaches end of input
    pub async fn run<R: AsyncBufRead + Unpin>(mut self, mut commands: ControlReader<R>) -> Result<()> {
        self.events.send(&Event::Ready(true)).await?;

        let mut monitor = interval(Duration::from_millis(
            self.config.receiver.monitor_interval_ms.max(1),
        ));
        monitor.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut stats = interval(Duration::from_millis(
            self.config.receiver.stats_interval_ms.max(1),
        ));
        stats.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = commands.next_command() => match command? {
                    Some(Ok(command)) => self.handle(command).await?,
                    Some(Err(e)) => {
                        tracing::warn!("Bad control line: {}", e);
                        self.events.send(&Event::Error(e.to_string())).await?;
                    }
                    None => {
                        tracing::info!("Control channel closed");
                        break;
                    }
                },
                _ = monitor.tick() => self.monitor().await?,
                _ = stats.tick() => self.report_stats().await?,
            }
        }

        if let Some(mut session) = self.session.take() {
            session.shutdown().await;
        }
        Ok(())
    }

    async fn handle(&mut self, command: Command) -> Result<()> {
        tracing::debug!("Command: {:?}", command);
        let now = now();

        match command {
            Command::Start(payload) => {
                let method = payload.method();
                self.requested = payload;
                match self.machine.start(method, now) {
                    Ok(effects) => self.apply(effects).await?,
                    Err(e) => {
                        self.events
                            .send(&Event::notice(NoticeLevel::Warning, e.to_string()))
                            .await?
                    }
                }
            }
            Command::Stop => match self.machine.stop(now) {
                Ok(effects) => self.apply(effects).await?,
                Err(e) => {
                    self.events
                        .send(&Event::notice(NoticeLevel::Warning, e.to_string()))
                        .await?
                }
            },
            Command::GetDevices => {
                let devices = tokio::task::spawn_blocking(list_output_devices)
                    .await
                    .unwrap_or_else(|e| {
                        tracing::warn!("Device enumeration failed: {}", e);
                        Vec::new()
                    });
                self.events.send(&Event::Devices(devices)).await?;
            }
            Command::GetInfo => {
                let info = tokio::task::spawn_blocking(host_info).await;
                match info {
                    Ok(info) => self.events.send(&Event::Info(info)).await?,
                    Err(e) => self.events.send(&Event::Error(e.to_string())).await?,
                }
            }
            Command::VolumeUp => {
                let level = self.volume.step_up();
                self.events.send(&Event::VolumeLevel(level)).await?;
            }
            Command::VolumeDown => {
                let level = self.volume.step_down();
                self.events.send(&Event::VolumeLevel(level)).await?;
            }
            Command::MuteToggle => {
                let muted = self.volume.toggle_mute();
                self.events.send(&Event::MuteState(muted)).await?;
            }
            Command::Ping => {
                let epoch = chrono::Utc::now().timestamp();
                self.events.send(&Event::Pong(epoch)).await?;
            }
        }

        Ok(())
    }

    /// Packet observations go in before timers, so a packet that lands in
    /// the same tick as a timeout keeps the connection
    async fn monitor(&mut self) -> Result<()> {
        let now = now();

        if let Some(session) = &self.session {
            let received = session.stats().received;
            let effects = self.machine.observe(received, now);
            self.apply(effects).await?;
        }

        let effects = self.machine.tick(now);
        self.apply(effects).await
    }

    async fn report_stats(&mut self) -> Result<()> {
        let Some(session) = &self.session else {
            return Ok(());
        };

        let snapshot = session.stats();
        let report = StatsReport {
            received: snapshot.received,
            lost: snapshot.lost,
            queue: snapshot.queue_depth,
            latency_ms: snapshot.latency_ms(session.format()),
        };
        self.events.send(&Event::Stats(report)).await
    }

    async fn apply(&mut self, effects: Vec<Effect>) -> Result<()> {
        for effect in effects {
            match effect {
                Effect::StartTransport(protocol) => self.start_session(protocol).await?,
                Effect::StopTransport => {
                    if let Some(mut session) = self.session.take() {
                        // Must release the port before a restart binds it again
                        session.shutdown().await;
                        self.events.send(&Event::State(RunState::Stopped)).await?;
                    }
                }
                Effect::StateChanged { state, reason } => {
                    self.events
                        .send(&Event::Connection(ConnectionReport { state, reason }))
                        .await?;
                }
                Effect::Notify(notification) => {
                    self.events
                        .send(&Event::notice(notification.level(), notification.message()))
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn start_session(&mut self, protocol: Protocol) -> Result<()> {
        let settings = ReceiverSettings {
            protocol,
            port: self.requested.port.unwrap_or(self.config.network.port),
            buffer_ms: self
                .requested
                .buffer_ms
                .unwrap_or_else(|| self.config.receiver.default_buffer_ms(protocol)),
            output_device: self.requested.output_device(),
            playback: self.playback,
        };

        let started = ReceiverSession::start(
            settings,
            &self.config.network,
            self.config.audio,
            self.volume.clone(),
        )
        .await;

        match started {
            Ok(session) => {
                let addr = session.local_addr();
                self.session = Some(session);
                self.events.send(&Event::State(RunState::Running)).await?;
                self.events
                    .send(&Event::Status(format!("Listening on {} {}", protocol, addr)))
                    .await?;
            }
            Err(e) => {
                // The machine still times out to failed on its own
                self.events.send(&Event::Error(e.to_string())).await?;
            }
        }
        Ok(())
    }
}

fn now() -> std::time::Instant {
    Instant::now().into_std()
}
