//! Stream type sniffing

use std::fmt;

/// What a viewer is receiving, judged from the first payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Annex-B H.264
    H264,
    /// Still JPEG images
    Jpeg,
    Unknown,
}

impl StreamKind {
    pub fn detect(data: &[u8]) -> Self {
        match data {
            [0xFF, 0xD8, ..] => StreamKind::Jpeg,
            [0x00, 0x00, 0x01, ..] | [0x00, 0x00, 0x00, 0x01, ..] => StreamKind::H264,
            // A start code split across the first read still leads with zero
            [0x00, ..] => StreamKind::H264,
            _ => StreamKind::Unknown,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::H264 => write!(f, "h264"),
            StreamKind::Jpeg => write!(f, "jpeg"),
            StreamKind::Unknown => write!(f, "unknown"),
        }
    }
}
