//! Viewer transport
//!
//! Browsers connect to `/screen/<serial>` over a websocket, send `on`,
//! `on:h264`, `on:jpeg` or `off` as text, and receive a `start` descriptor,
//! periodic `ping`s and binary frames exactly as the device relay emits them.

pub mod config;
pub mod listener;
pub mod protocol;
mod ws;

pub use config::ServerConfig;
pub use listener::ScreenServer;
pub use protocol::ViewerCommand;
