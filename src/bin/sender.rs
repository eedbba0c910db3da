//! Audio Sender Application
//!
//! Captures from an input device (or a synthetic tone) and streams raw PCM
//! to a receiver over UDP or TCP.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audiosync::{
    audio::{list_input_devices, AudioCapture, CaptureSource, ToneSource},
    config::{AppConfig, Protocol},
    session::SenderSession,
};

#[derive(Parser, Debug)]
#[command(name = "audiosync-sender")]
#[command(about = "Stream captured audio to an AudioSync receiver")]
#[command(version)]
struct Args {
    /// Receiver host name or address
    #[arg(default_value = "127.0.0.1")]
    host: String,

    /// Receiver port
    #[arg(short, long)]
    port: Option<u16>,

    /// Transport: udp for Wi-Fi, tcp for the USB tether
    #[arg(long, default_value = "udp")]
    protocol: Protocol,

    /// Input device name (default input device when omitted)
    #[arg(short, long)]
    device: Option<String>,

    /// Send a sine tone of this frequency instead of capturing
    #[arg(long, value_name = "HZ")]
    tone: Option<f32>,

    /// Stop after this many seconds
    #[arg(long)]
    duration: Option<u64>,

    /// List input devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Config file (defaults to the per-user config location)
    #[arg(short, long, env = "AUDIOSYNC_CONFIG")]
    config: Option<PathBuf>,
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .with_context(|| format!("Cannot resolve {}", host))?
        .next()
        .with_context(|| format!("No address for {}", host))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if args.list_devices {
        println!("\n=== Available Input Devices ===");
        for device in list_input_devices() {
            let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
            println!("  #{} {}{}", device.index, device.name, default_marker);
            println!("    Sample rates: {:?}", device.sample_rates);
            println!("    Channels: {:?}", device.channels);
        }
        return Ok(());
    }

    tracing::info!("Starting AudioSync sender");

    let config = AppConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let port = args.port.unwrap_or(config.network.port);
    let destination = resolve(&args.host, port)?;

    let mut session =
        SenderSession::start(args.protocol, destination, &config.network, &config.sender)
            .context("Failed to start sender session")?;

    let mut source: Box<dyn CaptureSource> = match args.tone {
        Some(frequency) => {
            tracing::info!("Sending {} Hz test tone", frequency);
            Box::new(ToneSource::new(config.audio, frequency, 0.3))
        }
        None => Box::new(AudioCapture::new(args.device.clone(), config.audio)),
    };
    source
        .start(session.sink())
        .context("Failed to start audio source")?;

    tracing::info!(
        session_id = %session.id(),
        "Streaming {} Hz / {} ch in {:.1} ms chunks to {} over {}",
        config.audio.sample_rate,
        config.audio.channels,
        config.audio.chunk_duration_ms(),
        destination,
        args.protocol
    );

    let mut report = tokio::time::interval(Duration::from_secs(5));
    report.tick().await;
    let deadline = async {
        match args.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            _ = &mut deadline => break,
            _ = report.tick() => {
                let stats = session.stats();
                tracing::info!(
                    "Stats: {} captured, {} sent, {} dropped, {} failed, {:.1} KB sent",
                    stats.captured,
                    stats.sent,
                    stats.dropped,
                    stats.send_failures,
                    stats.bytes_sent as f64 / 1024.0
                );
            }
        }
    }

    source.stop();
    session.stop();
    Ok(())
}
