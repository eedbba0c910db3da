//! Audio Receiver Application
//!
//! Headless receiver driven by a UI process over stdin/stdout. Commands come
//! in as JSON lines on stdin, events go out as JSON lines on stdout, and logs
//! go to stderr so they never interleave with the channel.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::io::BufReader;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audiosync::{
    config::AppConfig,
    control::{ControlReader, Controller, EventWriter},
};

#[derive(Parser, Debug)]
#[command(name = "audiosync-receiver")]
#[command(about = "Receive a PCM audio stream and play it locally")]
#[command(version)]
struct Args {
    /// Config file (defaults to the per-user config location)
    #[arg(short, long, env = "AUDIOSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Default listen port when `start` does not name one
    #[arg(short, long)]
    port: Option<u16>,

    /// Playout depth for UDP sessions, in milliseconds
    #[arg(long)]
    udp_buffer_ms: Option<u32>,

    /// Playout depth for TCP sessions, in milliseconds
    #[arg(long)]
    tcp_buffer_ms: Option<u32>,

    /// Count packets without opening an output device
    #[arg(long)]
    headless: bool,

    /// Log level filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // stdout belongs to the control channel
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting AudioSync receiver");

    let mut config = AppConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.network.port = port;
    }
    if let Some(ms) = args.udp_buffer_ms {
        config.receiver.udp_buffer_ms = ms;
    }
    if let Some(ms) = args.tcp_buffer_ms {
        config.receiver.tcp_buffer_ms = ms;
    }
    config.validate().context("Invalid configuration")?;

    tracing::info!(
        "Default port {}, buffer udp {} ms / tcp {} ms",
        config.network.port,
        config.receiver.udp_buffer_ms,
        config.receiver.tcp_buffer_ms
    );

    let commands = ControlReader::new(BufReader::new(tokio::io::stdin()));
    let events = EventWriter::new(tokio::io::stdout());

    let mut controller = Controller::new(config, events);
    if args.headless {
        controller = controller.headless();
    }

    tokio::select! {
        result = controller.run(commands) => result.context("Control loop failed")?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted"),
    }

    tracing::info!("Receiver shut down");
    Ok(())
}
