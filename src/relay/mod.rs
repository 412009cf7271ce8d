//! Keyframe cache and relay broadcaster
//!
//! # Architecture
//!
//! ```text
//!                       RelayRegistry
//!                  serial -> RelayHandle
//!                            │ commands
//!                            ▼
//!   ┌──────────────── DeviceRelay (one task per device) ───────────────┐
//!   │  KeyframeCache { sps, pps, idr }                                 │
//!   │  Session<CaptureClient>   ── h264 subscribers ──► ViewerSink ... │
//!   │  Session<FallbackSource>  ── jpeg subscribers ──► ViewerSink ... │
//!   └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A source starts when its first viewer subscribes and stops when its last
//! one leaves. The two sources of a device are independent of each other.
//!
//! # Zero-Copy Design
//!
//! Payloads are `bytes::Bytes`; fanning one out to many viewers only bumps a
//! reference count.

pub mod cache;
pub mod device;
pub mod registry;
mod session;
pub mod source;
pub mod viewer;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{CacheStats, KeyframeCache};
pub use device::{RelayConfig, RelayHandle, RelayStats};
pub use registry::{BridgeSourceFactory, RelayRegistry, SourceFactory};
pub use session::{SessionState, SessionStats};
pub use source::{SourceEvent, StreamSource};
pub use viewer::{Delivery, StartInfo, StreamFormat, ViewerId, ViewerMessage, ViewerSink};
