//! Receiver session
//!
//! A tokio task owns the socket and feeds every decoded packet into loss
//! accounting, the atomic stats and the playout buffer. Playback pulls from
//! the buffer on its own thread. Nothing here blocks the receive loop.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::stats::{LossTracker, ReceiveStats, StatsSnapshot};
use super::SessionId;
use crate::audio::buffer::{InsertOutcome, PlayoutStats, SharedPlayout};
use crate::audio::{AudioPlayback, VolumeControl};
use crate::codec::{self, AudioPacket, FrameDecoder};
use crate::config::{AudioFormat, NetworkConfig, Protocol};
use crate::constants::MAX_DATAGRAM_SIZE;
use crate::error::{NetworkError, Result};

/// Parameters of one receive session
#[derive(Debug, Clone)]
pub struct ReceiverSettings {
    pub protocol: Protocol,
    pub port: u16,
    /// Target playout depth
    pub buffer_ms: u32,
    /// Output device index, default output when `None`
    pub output_device: Option<usize>,
    /// Open an output device; when false the session only counts packets
    pub playback: bool,
}

/// Per-packet bookkeeping owned by the receive task
struct Ingest {
    id: SessionId,
    tracker: LossTracker,
    stats: Arc<ReceiveStats>,
    playout: Arc<SharedPlayout>,
}

impl Ingest {
    fn accept(&mut self, packet: AudioPacket, wire_len: usize) {
        let newly_lost = self.tracker.observe(packet.sequence);
        self.stats.record_packet(wire_len, newly_lost);

        if newly_lost > 0 {
            tracing::trace!(
                session_id = %self.id,
                "Gap of {} before packet {}",
                newly_lost,
                packet.sequence
            );
        }

        match self.playout.insert(packet.sequence, packet.payload) {
            InsertOutcome::Queued => {}
            outcome => {
                tracing::trace!(session_id = %self.id, "Packet {} {:?}", packet.sequence, outcome);
            }
        }
    }

    fn accept_datagram(&mut self, data: &[u8]) {
        match codec::decode(data) {
            Ok(packet) => self.accept(packet, data.len()),
            Err(e) => self.reject(e),
        }
    }

    fn accept_frame(&mut self, frame: bytes::Bytes) {
        let len = frame.len();
        match codec::packet::decode_bytes(frame) {
            Ok(packet) => self.accept(packet, len),
            Err(e) => self.reject(e),
        }
    }

    fn reject(&self, error: crate::error::DecodeError) {
        self.stats.record_invalid();
        tracing::debug!(session_id = %self.id, "Dropping malformed packet: {}", error);
    }
}

/// One receiving lifetime: a bound socket, fresh stats and a playout buffer
pub struct ReceiverSession {
    id: SessionId,
    settings: ReceiverSettings,
    format: AudioFormat,
    local_addr: SocketAddr,
    stats: Arc<ReceiveStats>,
    playout: Arc<SharedPlayout>,
    playback: Option<AudioPlayback>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ReceiverSession {
    /// Bind the socket and start receiving.
    ///
    /// Fails only if the socket cannot be bound. A missing output device
    /// leaves the session running headless.
    pub async fn start(
        settings: ReceiverSettings,
        network: &NetworkConfig,
        format: AudioFormat,
        volume: Arc<VolumeControl>,
    ) -> Result<Self> {
        let id = SessionId::new();
        let stats = Arc::new(ReceiveStats::new());
        let capacity = format.chunks_for_ms(settings.buffer_ms);
        let playout = SharedPlayout::new(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let ingest = Ingest {
            id,
            tracker: LossTracker::new(),
            stats: stats.clone(),
            playout: playout.clone(),
        };

        let bind_error = |e: std::io::Error| {
            tracing::error!(session_id = %id, "Failed to bind port {}: {}", settings.port, e);
            NetworkError::BindFailed(format!("{} port {}: {}", settings.protocol, settings.port, e))
        };

        let (local_addr, task) = match settings.protocol {
            Protocol::Udp => {
                let socket = crate::network::create_recv_socket(
                    settings.port,
                    network.udp_recv_buffer_bytes,
                )
                .and_then(UdpSocket::from_std)
                .map_err(bind_error)?;
                let local_addr = socket.local_addr()?;
                let task = tokio::spawn(run_udp(socket, ingest, shutdown_rx));
                (local_addr, task)
            }
            Protocol::Tcp => {
                let listener = crate::network::bind_listener(settings.port).map_err(bind_error)?;
                let local_addr = listener.local_addr()?;
                let task = tokio::spawn(run_tcp(
                    listener,
                    ingest,
                    network.max_frame_len,
                    shutdown_rx,
                ));
                (local_addr, task)
            }
        };

        tracing::info!(
            session_id = %id,
            "Receiver session started: {} on {}, buffer {} ms ({} chunks)",
            settings.protocol,
            local_addr,
            settings.buffer_ms,
            capacity
        );

        let playback = if settings.playback {
            open_playback(id, settings.output_device, format, playout.clone(), volume).await
        } else {
            None
        };

        Ok(Self {
            id,
            settings,
            format,
            local_addr,
            stats,
            playout,
            playback,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn protocol(&self) -> Protocol {
        self.settings.protocol
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn has_playback(&self) -> bool {
        self.playback.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(self.playout.depth())
    }

    pub fn playout_stats(&self) -> PlayoutStats {
        self.playout.stats()
    }

    /// Stop and wait for the receive task to exit, so the port is free to
    /// bind again when this returns. Idempotent.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        let Some(task) = self.task.take() else {
            return;
        };
        if let Err(e) = task.await {
            if !e.is_cancelled() {
                tracing::warn!(session_id = %self.id, "Receive task failed: {}", e);
            }
        }

        if let Some(playback) = self.playback.take() {
            let id = self.id;
            let _ = tokio::task::spawn_blocking(move || close_playback(id, playback)).await;
        }

        self.log_stopped();
    }

    /// Signal and abort the receive task without waiting for it. The socket
    /// is released once the runtime drops the task. Idempotent.
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        let Some(task) = self.task.take() else {
            return;
        };
        task.abort();

        if let Some(playback) = self.playback.take() {
            close_playback(self.id, playback);
        }

        self.log_stopped();
    }

    fn log_stopped(&self) {
        let stats = self.stats();
        let playout = self.playout.stats();
        tracing::info!(
            session_id = %self.id,
            received = stats.received,
            lost = stats.lost,
            invalid = stats.invalid,
            late = playout.late,
            evicted = playout.evicted,
            underruns = playout.underruns,
            "Receiver session stopped"
        );
    }
}

impl Drop for ReceiverSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Opening a device blocks until cpal reports the stream is playing
async fn open_playback(
    id: SessionId,
    device: Option<usize>,
    format: AudioFormat,
    playout: Arc<SharedPlayout>,
    volume: Arc<VolumeControl>,
) -> Option<AudioPlayback> {
    let opened = tokio::task::spawn_blocking(move || {
        let mut playback = AudioPlayback::new(device, format);
        playback.start(playout, volume).map(|()| playback)
    })
    .await;

    match opened {
        Ok(Ok(playback)) => Some(playback),
        Ok(Err(e)) => {
            tracing::warn!(session_id = %id, "No audio output, running headless: {}", e);
            None
        }
        Err(e) => {
            tracing::warn!(session_id = %id, "Playback setup failed, running headless: {}", e);
            None
        }
    }
}

fn close_playback(id: SessionId, mut playback: AudioPlayback) {
    playback.stop();
    tracing::debug!(
        session_id = %id,
        "Playback padded {} callbacks with silence",
        playback.starved_callbacks()
    );
}

async fn run_udp(socket: UdpSocket, mut ingest: Ingest, mut shutdown: oneshot::Receiver<()>) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            result = socket.recv_from(&mut buf) => match result {
                Ok((len, _peer)) => ingest.accept_datagram(&buf[..len]),
                Err(e) => {
                    // ICMP port unreachable surfaces here on some platforms
                    tracing::debug!(session_id = %ingest.id, "UDP receive error: {}", e);
                }
            },
        }
    }

    tracing::debug!(session_id = %ingest.id, "UDP receive loop exited");
}

async fn run_tcp(
    listener: TcpListener,
    mut ingest: Ingest,
    max_frame_len: usize,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut decoder = FrameDecoder::new(max_frame_len);

    loop {
        let (mut stream, peer) = tokio::select! {
            _ = &mut shutdown => return,
            result = listener.accept() => match result {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(session_id = %ingest.id, "TCP accept failed: {}", e);
                    continue;
                }
            },
        };

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Could not set TCP_NODELAY: {}", e);
        }
        tracing::info!(session_id = %ingest.id, "TCP client connected: {}", peer);
        decoder.reset();

        'connection: loop {
            tokio::select! {
                _ = &mut shutdown => return,
                result = stream.read_buf(decoder.buffer_mut()) => match result {
                    Ok(0) => {
                        tracing::info!(session_id = %ingest.id, "TCP client disconnected: {}", peer);
                        break 'connection;
                    }
                    Ok(_) => loop {
                        match decoder.next_frame() {
                            Ok(Some(frame)) => ingest.accept_frame(frame),
                            Ok(None) => break,
                            Err(e) => {
                                ingest.stats.record_invalid();
                                tracing::warn!(
                                    session_id = %ingest.id,
                                    "Framing error from {}, dropping connection: {}",
                                    peer,
                                    e
                                );
                                break 'connection;
                            }
                        }
                    },
                    Err(e) => {
                        tracing::warn!(session_id = %ingest.id, "TCP read error from {}: {}", peer, e);
                        break 'connection;
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn ingest(capacity: usize) -> Ingest {
        Ingest {
            id: SessionId::new(),
            tracker: LossTracker::new(),
            stats: Arc::new(ReceiveStats::new()),
            playout: SharedPlayout::new(capacity),
        }
    }

    #[test]
    fn test_ingest_counts_and_buffers() {
        let mut ingest = ingest(8);
        for seq in [1u32, 2, 4, 5] {
            ingest.accept_datagram(&codec::encode(seq, 0, &[0u8; 4]));
        }

        let snapshot = ingest.stats.snapshot(ingest.playout.depth());
        assert_eq!(snapshot.received, 4);
        assert_eq!(snapshot.lost, 1);
        assert_eq!(snapshot.queue_depth, 4);
        assert_eq!(snapshot.bytes, 4 * 16);
    }

    #[test]
    fn test_ingest_counts_malformed() {
        let mut ingest = ingest(8);
        ingest.accept_datagram(&[1, 2, 3]);
        ingest.accept_frame(Bytes::from_static(&[0; 5]));

        let snapshot = ingest.stats.snapshot(0);
        assert_eq!(snapshot.received, 0);
        assert_eq!(snapshot.invalid, 2);
    }

    fn settings(protocol: Protocol) -> ReceiverSettings {
        ReceiverSettings {
            protocol,
            port: 0,
            buffer_ms: 100,
            output_device: None,
            playback: false,
        }
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let mut session = ReceiverSession::start(
            settings(Protocol::Udp),
            &NetworkConfig::default(),
            AudioFormat::default(),
            Arc::new(VolumeControl::default()),
        )
        .await
        .unwrap();

        assert!(session.is_running());
        assert_ne!(session.local_addr().port(), 0);
        assert!(!session.has_playback());

        session.shutdown().await;
        session.shutdown().await;
        session.stop();
        assert!(!session.is_running());
    }

    #[tokio::test]
    async fn test_playback_setup_does_not_block_runtime() {
        let mut with_output = settings(Protocol::Udp);
        with_output.playback = true;

        // Ticks keep firing while the device opens on the blocking pool
        let ticker = tokio::spawn(async {
            let mut ticks = 0u32;
            let mut interval = tokio::time::interval(std::time::Duration::from_millis(1));
            loop {
                interval.tick().await;
                ticks += 1;
                if ticks == 3 {
                    return ticks;
                }
            }
        });

        let mut session = ReceiverSession::start(
            with_output,
            &NetworkConfig::default(),
            AudioFormat::default(),
            Arc::new(VolumeControl::default()),
        )
        .await
        .unwrap();

        // With or without an output device the session keeps receiving
        assert!(session.is_running());
        session.shutdown().await;
        assert!(!session.has_playback());
        assert_eq!(ticker.await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_releases_port_for_restart() {
        for protocol in [Protocol::Udp, Protocol::Tcp] {
            let network = NetworkConfig::default();
            let volume = Arc::new(VolumeControl::default());
            let mut first = ReceiverSession::start(
                settings(protocol),
                &network,
                AudioFormat::default(),
                volume.clone(),
            )
            .await
            .unwrap();
            let port = first.local_addr().port();

            for _ in 0..20 {
                first.shutdown().await;
                let mut fixed = settings(protocol);
                fixed.port = port;
                first = ReceiverSession::start(
                    fixed,
                    &network,
                    AudioFormat::default(),
                    volume.clone(),
                )
                .await
                .unwrap();
            }
            first.shutdown().await;
        }
    }

    #[tokio::test]
    async fn test_buffer_capacity_follows_buffer_ms() {
        let session = ReceiverSession::start(
            settings(Protocol::Tcp),
            &NetworkConfig::default(),
            AudioFormat::default(),
            Arc::new(VolumeControl::default()),
        )
        .await
        .unwrap();

        // 100 ms / 21.33 ms per chunk, rounded up
        assert_eq!(session.playout_stats().capacity, 5);
    }
}
