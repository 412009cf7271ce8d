//! Viewer-facing side of a relay
//!
//! Each viewer owns a bounded queue. The relay only ever `try_send`s into it,
//! so a viewer that stops reading loses frames instead of slowing the device
//! stream or the other viewers.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::capture::DeviceInfo;
use crate::fallback::{Banner, Quirks};

/// Viewer identifier
pub type ViewerId = Uuid;

/// Which stream a viewer subscribes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamFormat {
    /// H.264 from the capture server
    H264,
    /// JPEG from the fallback grabber
    Jpeg,
}

impl StreamFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamFormat::H264 => "h264",
            StreamFormat::Jpeg => "jpeg",
        }
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "h264" => Ok(StreamFormat::H264),
            "jpeg" => Ok(StreamFormat::Jpeg),
            other => Err(format!("unknown stream format {:?}", other)),
        }
    }
}

/// Stream description sent before the first frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StartInfo {
    H264 {
        width: u32,
        height: u32,
        #[serde(rename = "deviceName")]
        device_name: String,
    },
    Jpeg {
        width: u32,
        height: u32,
        quirks: Quirks,
    },
}

impl StartInfo {
    pub fn format(&self) -> StreamFormat {
        match self {
            StartInfo::H264 { .. } => StreamFormat::H264,
            StartInfo::Jpeg { .. } => StreamFormat::Jpeg,
        }
    }
}

impl From<DeviceInfo> for StartInfo {
    fn from(info: DeviceInfo) -> Self {
        StartInfo::H264 {
            width: info.width,
            height: info.height,
            device_name: info.name,
        }
    }
}

impl From<Banner> for StartInfo {
    fn from(banner: Banner) -> Self {
        StartInfo::Jpeg {
            width: banner.virtual_width,
            height: banner.virtual_height,
            quirks: banner.quirks,
        }
    }
}

/// Message queued for one viewer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerMessage {
    Start(StartInfo),
    /// Payload relayed verbatim
    Frame(Bytes),
    /// The requested stream could not be started
    Error(String),
}

/// Outcome of a non-blocking delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Queue full; the message was discarded
    Dropped,
    /// Viewer is gone
    Closed,
}

/// Relay-side end of a viewer queue
#[derive(Debug, Clone)]
pub struct ViewerSink {
    id: ViewerId,
    tx: mpsc::Sender<ViewerMessage>,
}

impl ViewerSink {
    /// New viewer with a fresh id and a queue of `capacity` messages
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ViewerMessage>) {
        Self::with_id(Uuid::new_v4(), capacity)
    }

    pub fn with_id(id: ViewerId, capacity: usize) -> (Self, mpsc::Receiver<ViewerMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { id, tx }, rx)
    }

    pub fn id(&self) -> ViewerId {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Queue `message` without waiting
    pub fn deliver(&self, message: ViewerMessage) -> Delivery {
        match self.tx.try_send(message) {
            Ok(()) => Delivery::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Dropped,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}
