//! Capture server handshake
//!
//! Two server generations are in use and they are not wire-compatible.
//!
//! Fixed header ([`ProtocolVariant::Legacy`]), always 77 bytes:
//!
//! ```text
//! +-------+---------------------------+----------+----------+----------+
//! | dummy | device name (NUL-padded)  | codec id | width    | height   |
//! |  (1)  |          (64)             | (4, BE)  | (4, BE)  | (4, BE)  |
//! +-------+---------------------------+----------+----------+----------+
//! ```
//!
//! Queued ([`ProtocolVariant::Versioned`]): each part is optional, enabled by
//! the matching launch argument, and consumed in order once enough bytes have
//! arrived:
//!
//! ```text
//! [dummy (1)] [device name (64)] [codec id (4) | width (4) | height (4)]
//! ```
//!
//! Everything after the handshake is video payload.

use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};

use super::config::{CaptureConfig, ProtocolVariant};

/// Total size of the fixed header
pub const FIXED_HEADER_SIZE: usize = 77;

/// Size of the NUL-padded device name field
pub const DEVICE_NAME_SIZE: usize = 64;

/// Size of the codec id / width / height record
pub const CODEC_META_SIZE: usize = 12;

/// What the capture server told us about the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub codec_id: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Part {
    FixedHeader,
    Dummy,
    DeviceName,
    CodecMeta,
}

impl Part {
    fn size(&self) -> usize {
        match self {
            Part::FixedHeader => FIXED_HEADER_SIZE,
            Part::Dummy => 1,
            Part::DeviceName => DEVICE_NAME_SIZE,
            Part::CodecMeta => CODEC_META_SIZE,
        }
    }
}

/// Handshake state machine
#[derive(Debug)]
pub struct Handshake {
    pending: VecDeque<Part>,
    info: DeviceInfo,
    received: usize,
    done: bool,
}

impl Handshake {
    /// Fixed 77-byte header
    pub fn fixed(fallback_name: &str) -> Self {
        Self::with_parts([Part::FixedHeader].into(), fallback_name)
    }

    /// Queue of optional parts
    pub fn queued(dummy: bool, device_name: bool, codec_meta: bool, fallback_name: &str) -> Self {
        let mut parts = VecDeque::new();
        if dummy {
            parts.push_back(Part::Dummy);
        }
        if device_name {
            parts.push_back(Part::DeviceName);
        }
        if codec_meta {
            parts.push_back(Part::CodecMeta);
        }
        Self::with_parts(parts, fallback_name)
    }

    /// Handshake matching what `config` asks the server to send
    pub fn for_config(config: &CaptureConfig, serial: &str) -> Self {
        match config.protocol {
            ProtocolVariant::Legacy => Self::fixed(serial),
            ProtocolVariant::Versioned => Self::queued(
                config.send_dummy_byte,
                config.send_device_meta,
                config.send_codec_meta,
                serial,
            ),
        }
    }

    fn with_parts(pending: VecDeque<Part>, fallback_name: &str) -> Self {
        Self {
            pending,
            info: DeviceInfo {
                name: fallback_name.to_string(),
                codec_id: 0,
                width: 0,
                height: 0,
            },
            received: 0,
            done: false,
        }
    }

    /// Check if handshake is complete
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Bytes needed before the next part can be consumed
    pub fn bytes_needed(&self) -> usize {
        self.pending.front().map(Part::size).unwrap_or(0)
    }

    /// Handshake bytes consumed so far
    pub fn received(&self) -> usize {
        self.received
    }

    /// Consume as many parts as `buf` allows
    ///
    /// Returns the device info exactly once, when the last part is consumed.
    /// Bytes left in `buf` afterwards belong to the video stream.
    pub fn process(&mut self, buf: &mut BytesMut) -> Option<DeviceInfo> {
        if self.done {
            return None;
        }

        while let Some(&part) = self.pending.front() {
            if buf.len() < part.size() {
                return None;
            }
            let data = buf.split_to(part.size()).freeze();
            self.received += data.len();
            self.apply(part, data);
            self.pending.pop_front();
        }

        self.done = true;
        Some(self.info.clone())
    }

    fn apply(&mut self, part: Part, mut data: Bytes) {
        match part {
            Part::FixedHeader => {
                data.advance(1);
                self.apply(Part::DeviceName, data.split_to(DEVICE_NAME_SIZE));
                self.apply(Part::CodecMeta, data);
            }
            Part::Dummy => {}
            Part::DeviceName => {
                if let Some(name) = decode_name(&data) {
                    self.info.name = name;
                }
            }
            Part::CodecMeta => {
                self.info.codec_id = data.get_u32();
                self.info.width = data.get_u32();
                self.info.height = data.get_u32();
            }
        }
    }
}

/// NUL-terminated UTF-8; `None` when empty
fn decode_name(field: &[u8]) -> Option<String> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    let name = String::from_utf8_lossy(&field[..end]).trim().to_string();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

#[cfg(test)]
pub(crate) fn fixed_header(name: &str, codec_id: u32, width: u32, height: u32) -> Vec<u8> {
    let mut header = vec![0u8; FIXED_HEADER_SIZE];
    header[1..1 + name.len()].copy_from_slice(name.as_bytes());
    header[65..69].copy_from_slice(&codec_id.to_be_bytes());
    header[69..73].copy_from_slice(&width.to_be_bytes());
    header[73..77].copy_from_slice(&height.to_be_bytes());
    header
}
