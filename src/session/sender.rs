//! Sender session
//!
//! Capture hands chunks to [`SenderHandle::submit`], which stamps them with
//! a sequence number and capture time and queues them without blocking. A
//! dedicated transmit thread drains the queue into the transport.

use bytes::Bytes;
use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::stats::{SenderStats, SenderStatsSnapshot};
use super::SessionId;
use crate::audio::ChunkSink;
use crate::codec::AudioPacket;
use crate::config::{NetworkConfig, Protocol, SenderConfig};
use crate::error::Result;
use crate::network::{create_sender, PacketSender};

/// Capture-side entry point of a sender session
pub struct SenderHandle {
    tx: Sender<AudioPacket>,
    next_sequence: AtomicU32,
    stats: Arc<SenderStats>,
    closed: AtomicBool,
}

impl SenderHandle {
    fn new(tx: Sender<AudioPacket>, stats: Arc<SenderStats>) -> Self {
        Self {
            tx,
            next_sequence: AtomicU32::new(0),
            stats,
            closed: AtomicBool::new(false),
        }
    }

    /// Sequence number the next captured chunk will carry
    pub fn next_sequence(&self) -> u32 {
        self.next_sequence.load(Ordering::Relaxed)
    }
}

impl ChunkSink for SenderHandle {
    fn submit(&self, pcm: Bytes) -> bool {
        if self.closed.load(Ordering::Relaxed) {
            return false;
        }

        // Stamped once per chunk, whether or not it is ever sent
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let timestamp_ms = chrono::Utc::now().timestamp_millis();
        self.stats.record_captured();

        match self.tx.try_send(AudioPacket::new(sequence, timestamp_ms, pcm)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.stats.record_dropped();
                false
            }
        }
    }
}

/// One sending lifetime: a transport, a sequence counter and a worker
pub struct SenderSession {
    id: SessionId,
    protocol: Protocol,
    destination: SocketAddr,
    handle: Arc<SenderHandle>,
    stats: Arc<SenderStats>,
    shutdown_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl SenderSession {
    /// Open the transport and start the transmit worker
    pub fn start(
        protocol: Protocol,
        destination: SocketAddr,
        network: &NetworkConfig,
        sender: &SenderConfig,
    ) -> Result<Self> {
        let transport = create_sender(protocol, destination, network)?;
        Self::with_transport(transport, destination, sender)
    }

    /// Start a session over an already constructed transport
    pub fn with_transport(
        transport: Box<dyn PacketSender>,
        destination: SocketAddr,
        config: &SenderConfig,
    ) -> Result<Self> {
        let id = SessionId::new();
        let protocol = transport.protocol();
        let stats = Arc::new(SenderStats::new());
        let (tx, rx) = bounded::<AudioPacket>(config.queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let worker = {
            let stats = stats.clone();
            let log_every = u64::from(config.log_every.max(1));
            thread::Builder::new()
                .name("audio-transmit".to_string())
                .spawn(move || transmit_loop(id, transport, rx, shutdown_rx, stats, log_every))?
        };

        tracing::info!(
            session_id = %id,
            "Sender session started: {} -> {}",
            protocol,
            destination
        );

        Ok(Self {
            id,
            protocol,
            destination,
            handle: Arc::new(SenderHandle::new(tx, stats.clone())),
            stats,
            shutdown_tx: Some(shutdown_tx),
            worker: Some(worker),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    /// The handle as a capture sink
    pub fn sink(&self) -> Arc<dyn ChunkSink> {
        self.handle.clone()
    }

    pub fn stats(&self) -> SenderStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Stop accepting chunks and join the transmit worker
    pub fn stop(&mut self) {
        self.handle.closed.store(true, Ordering::SeqCst);
        self.shutdown_tx.take();

        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
            let stats = self.stats.snapshot();
            tracing::info!(
                session_id = %self.id,
                captured = stats.captured,
                sent = stats.sent,
                dropped = stats.dropped,
                send_failures = stats.send_failures,
                "Sender session stopped"
            );
        }
    }
}

impl Drop for SenderSession {
    fn drop(&mut self) {
        self.stop();
    }
}

fn transmit_loop(
    id: SessionId,
    mut transport: Box<dyn PacketSender>,
    rx: Receiver<AudioPacket>,
    shutdown_rx: Receiver<()>,
    stats: Arc<SenderStats>,
    log_every: u64,
) {
    loop {
        select! {
            recv(rx) -> packet => match packet {
                Ok(packet) => transmit(id, transport.as_mut(), &packet, &stats, log_every),
                Err(_) => break,
            },
            recv(shutdown_rx) -> _ => break,
        }
    }

    transport.close();
}

fn transmit(
    id: SessionId,
    transport: &mut dyn PacketSender,
    packet: &AudioPacket,
    stats: &SenderStats,
    log_every: u64,
) {
    match transport.send(packet) {
        Ok(bytes) => {
            let sent = stats.record_sent(bytes);
            if sent % log_every == 0 {
                tracing::debug!(
                    session_id = %id,
                    sequence = packet.sequence,
                    "Sent {} packets",
                    sent
                );
            }
        }
        Err(e) => {
            let failures = stats.record_failure();
            if failures == 1 || failures % log_every == 0 {
                tracing::warn!(
                    session_id = %id,
                    failures,
                    "Send failed for packet {}: {}",
                    packet.sequence,
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetworkError;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[test]
    fn test_dropped_chunks_still_consume_sequence_numbers() {
        let stats = Arc::new(SenderStats::new());
        let (tx, rx) = bounded(1);
        let handle = SenderHandle::new(tx, stats.clone());

        assert!(handle.submit(Bytes::from_static(b"a")));
        assert!(!handle.submit(Bytes::from_static(b"b")));
        assert!(!handle.submit(Bytes::from_static(b"c")));
        assert_eq!(handle.next_sequence(), 3);

        assert_eq!(rx.recv().unwrap().sequence, 0);
        assert!(handle.submit(Bytes::from_static(b"d")));
        assert_eq!(rx.recv().unwrap().sequence, 3);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.captured, 4);
        assert_eq!(snapshot.dropped, 2);
    }

    /// Records packets; fails every packet whose sequence is in `fail`
    struct RecordingTransport {
        sent: Arc<Mutex<Vec<u32>>>,
        fail: Vec<u32>,
        closed: Arc<AtomicBool>,
    }

    impl PacketSender for RecordingTransport {
        fn send(&mut self, packet: &AudioPacket) -> std::result::Result<usize, NetworkError> {
            if self.fail.contains(&packet.sequence) {
                return Err(NetworkError::SendFailed("refused".to_string()));
            }
            self.sent.lock().push(packet.sequence);
            Ok(packet.encoded_len())
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }

        fn protocol(&self) -> Protocol {
            Protocol::Udp
        }
    }

    #[test]
    fn test_send_failures_do_not_stop_stream() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let transport = RecordingTransport {
            sent: sent.clone(),
            fail: vec![1],
            closed: closed.clone(),
        };

        let mut session = SenderSession::with_transport(
            Box::new(transport),
            "127.0.0.1:9".parse().unwrap(),
            &SenderConfig::default(),
        )
        .unwrap();

        let sink = session.sink();
        for tag in 0..4u8 {
            assert!(sink.submit(Bytes::from(vec![tag; 8])));
        }

        for _ in 0..100 {
            if sent.lock().len() == 3 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        session.stop();

        assert_eq!(*sent.lock(), vec![0, 2, 3]);
        assert!(closed.load(Ordering::SeqCst));

        let stats = session.stats();
        assert_eq!(stats.sent, 3);
        assert_eq!(stats.send_failures, 1);
        assert_eq!(stats.bytes_sent, 3 * 20);
    }

    #[test]
    fn test_stop_is_idempotent_and_closes_sink() {
        let transport = RecordingTransport {
            sent: Arc::new(Mutex::new(Vec::new())),
            fail: Vec::new(),
            closed: Arc::new(AtomicBool::new(false)),
        };
        let mut session = SenderSession::with_transport(
            Box::new(transport),
            "127.0.0.1:9".parse().unwrap(),
            &SenderConfig::default(),
        )
        .unwrap();

        session.stop();
        session.stop();
        assert!(!session.is_running());
        assert!(!session.sink().submit(Bytes::from_static(b"late")));
    }
}
