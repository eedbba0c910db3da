//! End-to-end sessions over the loopback interface

use bytes::Bytes;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};

use audiosync::audio::{ChunkSink, VolumeControl};
use audiosync::codec::AudioPacket;
use audiosync::config::{AppConfig, AudioFormat, NetworkConfig, Protocol, SenderConfig};
use audiosync::control::{ControlReader, Controller, EventWriter};
use audiosync::network::{PacketSender, TcpPacketSender};
use audiosync::session::{ReceiverSession, ReceiverSettings, SenderSession};

fn settings(protocol: Protocol, port: u16) -> ReceiverSettings {
    ReceiverSettings {
        protocol,
        port,
        buffer_ms: 100,
        output_device: None,
        playback: false,
    }
}

async fn start_receiver(protocol: Protocol, port: u16) -> ReceiverSession {
    ReceiverSession::start(
        settings(protocol, port),
        &NetworkConfig::default(),
        AudioFormat::default(),
        Arc::new(VolumeControl::default()),
    )
    .await
    .expect("receiver should bind")
}

fn loopback(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

async fn wait_for_received(session: &ReceiverSession, count: u64) -> u64 {
    for _ in 0..200 {
        let received = session.stats().received;
        if received >= count {
            return received;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    session.stats().received
}

fn free_udp_port() -> u16 {
    let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap().port()
}

fn free_tcp_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn stream_chunks(protocol: Protocol) {
    let receiver = start_receiver(protocol, 0).await;
    let destination = loopback(receiver.local_addr().port());

    let mut sender = SenderSession::start(
        protocol,
        destination,
        &NetworkConfig::default(),
        &SenderConfig::default(),
    )
    .unwrap();

    let sink = sender.sink();
    for i in 0..20u8 {
        assert!(sink.submit(Bytes::from(vec![i; 64])));
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    assert_eq!(wait_for_received(&receiver, 20).await, 20);
    let stats = receiver.stats();
    assert_eq!(stats.lost, 0);
    assert_eq!(stats.invalid, 0);
    assert_eq!(stats.bytes, 20 * (12 + 64));

    sender.stop();
    assert_eq!(sender.stats().sent, 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn udp_session_delivers_every_chunk() {
    stream_chunks(Protocol::Udp).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tcp_session_delivers_every_chunk() {
    stream_chunks(Protocol::Tcp).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tcp_sender_reconnects_lazily() {
    let port = free_tcp_port();
    let mut sender = TcpPacketSender::new(loopback(port), Duration::from_millis(500));
    let packet = |seq| AudioPacket::new(seq, 0, Bytes::from_static(&[0u8; 32]));

    // Nobody listening yet: the packet is lost, the sender stays usable
    assert!(sender.send(&packet(0)).is_err());
    assert!(!sender.is_connected());

    let mut receiver = start_receiver(Protocol::Tcp, port).await;
    sender.send(&packet(1)).unwrap();
    assert_eq!(sender.connect_count(), 1);
    assert_eq!(wait_for_received(&receiver, 1).await, 1);

    // Receiver restarts; the sender notices on a later write and reconnects
    receiver.shutdown().await;
    drop(receiver);
    let receiver = start_receiver(Protocol::Tcp, port).await;

    let mut seq = 2;
    while receiver.stats().received == 0 && seq < 200 {
        let _ = sender.send(&packet(seq));
        seq += 1;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(receiver.stats().received > 0);
    assert!(sender.connect_count() >= 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn garbage_datagrams_are_counted_not_fatal() {
    let receiver = start_receiver(Protocol::Udp, 0).await;
    let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let destination = loopback(receiver.local_addr().port());

    socket.send_to(&[1, 2, 3], destination).unwrap();
    socket
        .send_to(&audiosync::codec::encode(7, 0, &[0u8; 8]), destination)
        .unwrap();

    assert_eq!(wait_for_received(&receiver, 1).await, 1);
    assert_eq!(receiver.stats().invalid, 1);
}

struct ControlClient {
    input: DuplexStream,
    output: Lines<BufReader<DuplexStream>>,
}

impl ControlClient {
    fn spawn() -> Self {
        let (input, controller_in) = tokio::io::duplex(4096);
        let (controller_out, output) = tokio::io::duplex(64 * 1024);

        let controller =
            Controller::new(AppConfig::default(), EventWriter::new(controller_out)).headless();
        tokio::spawn(controller.run(ControlReader::new(BufReader::new(controller_in))));

        Self {
            input,
            output: BufReader::new(output).lines(),
        }
    }

    async fn send(&mut self, line: &str) {
        self.input.write_all(line.as_bytes()).await.unwrap();
        self.input.write_all(b"\n").await.unwrap();
    }

    async fn expect(&mut self, kind: &str) -> Value {
        let wait = async {
            loop {
                let line = self.output.next_line().await.unwrap().unwrap();
                let event: Value = serde_json::from_str(&line).unwrap();
                if event["type"] == kind {
                    return event["data"].clone();
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .unwrap_or_else(|_| panic!("no {} event", kind))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn controller_connects_reports_and_disconnects() {
    let port = free_udp_port();
    let mut client = ControlClient::spawn();
    client.expect("ready").await;

    client
        .send(&format!(
            r#"{{"command":"start","payload":{{"port":{},"protocol":"udp","device_index":-1}}}}"#,
            port
        ))
        .await;
    assert_eq!(client.expect("connection").await["state"], "connecting");

    let mut sender = SenderSession::start(
        Protocol::Udp,
        loopback(port),
        &NetworkConfig::default(),
        &SenderConfig::default(),
    )
    .unwrap();
    let sink = sender.sink();
    let feeder = tokio::spawn(async move {
        loop {
            sink.submit(Bytes::from_static(&[0u8; 256]));
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    });

    assert_eq!(client.expect("connection").await["state"], "connected");
    assert_eq!(client.expect("notice").await["message"], "Connected");

    let stats = client.expect("stats").await;
    assert!(stats["received"].as_u64().unwrap() > 0);

    client.send(r#"{"command":"stop"}"#).await;
    let idle = client.expect("connection").await;
    assert_eq!(idle["state"], "idle");
    assert_eq!(idle["reason"], "manual");
    assert_eq!(client.expect("notice").await["message"], "Disconnected");

    feeder.abort();
    sender.stop();
}
