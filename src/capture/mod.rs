//! Capture protocol client
//!
//! Deploys and launches the on-device capture server, reads its handshake
//! and turns the H.264 stream that follows into keyframe-complete payloads.

pub mod client;
pub mod config;
pub mod handshake;
pub mod payload;

pub use client::CaptureClient;
pub use config::{CaptureConfig, ProtocolVariant};
pub use handshake::{DeviceInfo, Handshake};
pub use payload::{ConfigBuffer, PayloadProcessor};
