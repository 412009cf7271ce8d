//! Screen relay server backed by `adb`
//!
//! Run with: cargo run --example relay_server -- [OPTIONS]
//!
//! Examples:
//!   cargo run --example relay_server                              # 0.0.0.0:7100, versioned server
//!   cargo run --example relay_server -- --protocol legacy \
//!       --server-jar ./scrcpy-server-v1.24 --server-version 1.24
//!   RUST_LOG=screen_relay=trace cargo run --example relay_server
//!
//! Viewers connect to ws://HOST:7100/screen/<serial> and send `on`,
//! `on:jpeg` or `off`. Relay statistics are served at /stats.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use screen_relay::bridge::AdbBridge;
use screen_relay::capture::{CaptureConfig, ProtocolVariant};
use screen_relay::fallback::{FallbackConfig, GrabberKind};
use screen_relay::relay::{BridgeSourceFactory, RelayConfig, RelayRegistry};
use screen_relay::server::{ScreenServer, ServerConfig};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Protocol {
    /// Fixed 77-byte header, positional launch arguments
    Legacy,
    /// Queued handshake, key=value launch arguments
    Versioned,
}

impl From<Protocol> for ProtocolVariant {
    fn from(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Legacy => ProtocolVariant::Legacy,
            Protocol::Versioned => ProtocolVariant::Versioned,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "relay_server", about = "Relay device screens to websocket viewers")]
struct Args {
    /// Listen address
    #[arg(short = 'a', long, default_value = "0.0.0.0:7100")]
    bind: SocketAddr,

    /// Path to the adb binary
    #[arg(long, default_value = "adb")]
    adb: PathBuf,

    /// Capture server generation
    #[arg(long, value_enum, default_value = "versioned")]
    protocol: Protocol,

    /// Capture server payload pushed to each device
    #[arg(long, value_name = "FILE")]
    server_jar: Option<PathBuf>,

    /// Version string the capture server expects
    #[arg(long)]
    server_version: Option<String>,

    /// Longest screen side in pixels (0 = native)
    #[arg(long, default_value_t = 0)]
    max_size: u32,

    /// Video bit rate in bits per second
    #[arg(long, default_value_t = 8_000_000)]
    bit_rate: u32,

    /// Fallback grabber tried first (minicap, minicap-apk)
    #[arg(long)]
    grabber: Option<GrabberKind>,

    /// Fallback JPEG quality
    #[arg(long, default_value_t = 80)]
    quality: u8,

    /// Seconds between viewer pings
    #[arg(long, default_value_t = 10)]
    ping_interval: u64,

    /// Log level; RUST_LOG takes precedence
    #[arg(short = 'l', long, value_enum, default_value = "info")]
    log_level: LogLevel,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_level);

    let mut capture = CaptureConfig::default()
        .protocol(args.protocol.into())
        .max_size(args.max_size)
        .bit_rate(args.bit_rate);
    if let Some(jar) = args.server_jar {
        capture = capture.server_jar(jar);
    }
    if let Some(version) = args.server_version {
        capture = capture.server_version(version);
    }

    let mut fallback = FallbackConfig::default().quality(args.quality);
    if let Some(kind) = args.grabber {
        fallback = fallback.prefer(kind);
    }

    let bridge = Arc::new(AdbBridge::with_path(args.adb));
    let factory = BridgeSourceFactory::new(bridge, capture, fallback);
    let registry = Arc::new(RelayRegistry::new(factory, RelayConfig::default()));

    let config = ServerConfig::default()
        .bind(args.bind)
        .ping_interval(Duration::from_secs(args.ping_interval));
    let server = ScreenServer::new(config, registry);

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    tracing::info!("Relay server stopped");
    Ok(())
}

fn init_logging(level: LogLevel) {
    let filter = match level {
        LogLevel::Error => "screen_relay=error,relay_server=error",
        LogLevel::Warn => "screen_relay=warn,relay_server=warn",
        LogLevel::Info => "screen_relay=info,relay_server=info",
        LogLevel::Debug => "screen_relay=debug,relay_server=debug",
        LogLevel::Trace => "screen_relay=trace,relay_server=trace",
    };

    // Environment variable takes priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
