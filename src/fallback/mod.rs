//! Fallback still-image source
//!
//! When a viewer cannot decode H.264 it subscribes to JPEG frames instead.
//! These come from a separate grabber process on the device, started
//! independently of the capture server. Several grabber builds exist and
//! not all of them work on every device, so they are tried in order until
//! one produces a banner.

pub mod banner;
pub mod config;
pub mod grabber;
pub mod source;

pub use banner::{Banner, ImageFramer, Quirks};
pub use config::FallbackConfig;
pub use grabber::{GrabberKind, Projection};
pub use source::FallbackSource;
