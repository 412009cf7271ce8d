//! # screen-relay
//!
//! Live device screen transport: pulls the H.264 stream of an on-device
//! capture server, relays it to any number of websocket viewers with
//! late-join support, and falls back to a JPEG grabber for viewers that
//! cannot decode video.
//!
//! ```text
//! capture server ──► CaptureClient ──► AnnexBDemuxer ──┐
//!                                                      ├─► DeviceRelay ──► viewers ──► SinkAdapter ──► decoder
//! grabber ─────────► FallbackSource ───────────────────┘   (keyframe cache)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use screen_relay::bridge::AdbBridge;
//! use screen_relay::capture::CaptureConfig;
//! use screen_relay::fallback::FallbackConfig;
//! use screen_relay::relay::{BridgeSourceFactory, RelayConfig, RelayRegistry};
//! use screen_relay::server::{ScreenServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> screen_relay::Result<()> {
//!     let factory = BridgeSourceFactory::new(
//!         Arc::new(AdbBridge::default()),
//!         CaptureConfig::default(),
//!         FallbackConfig::default(),
//!     );
//!     let registry = Arc::new(RelayRegistry::new(factory, RelayConfig::default()));
//!     ScreenServer::new(ServerConfig::default(), registry).run().await
//! }
//! ```

pub mod bridge;
pub mod capture;
pub mod error;
pub mod fallback;
pub mod media;
pub mod net;
pub mod relay;
pub mod server;
pub mod sink;

pub use capture::{CaptureClient, CaptureConfig, ProtocolVariant};
pub use error::{Error, Result};
pub use fallback::{FallbackConfig, FallbackSource};
pub use relay::{RelayConfig, RelayHandle, RelayRegistry, StreamFormat, ViewerMessage};
pub use server::{ScreenServer, ServerConfig};
pub use sink::{DecoderCapabilities, SinkAdapter, SinkConfig};
