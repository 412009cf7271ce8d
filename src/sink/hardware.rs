//! Direct hardware decode
//!
//! The decoder is configured with the avcC record and then fed one chunk per
//! frame group: the coded slices re-framed with 4-byte length prefixes.
//! Frames before the first keyframe after a configuration are dropped since
//! the decoder cannot start on a delta frame.

use bytes::BytesMut;

use super::params::DecoderConfig;
use super::strategy::{DecoderInput, SinkStrategy, StrategyKind};
use crate::error::{MediaError, Result};
use crate::media::h264::length_prefixed;
use crate::media::NalUnit;

#[derive(Debug)]
pub struct HardwareStrategy {
    /// Microseconds between frames
    frame_duration: u64,
    frames: u64,
    configured: bool,
    awaiting_key: bool,
}

impl HardwareStrategy {
    pub fn new(fps: u32) -> Self {
        Self {
            frame_duration: 1_000_000 / u64::from(fps.max(1)),
            frames: 0,
            configured: false,
            awaiting_key: true,
        }
    }
}

impl SinkStrategy for HardwareStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Hardware
    }

    fn configure(&mut self, config: &DecoderConfig) -> Result<Vec<DecoderInput>> {
        self.configured = true;
        self.awaiting_key = true;
        Ok(vec![DecoderInput::Configure {
            codec: config.codec.clone(),
            width: config.width,
            height: config.height,
            description: config.description(),
        }])
    }

    fn feed(&mut self, units: &[NalUnit]) -> Result<Vec<DecoderInput>> {
        if !self.configured {
            return Err(MediaError::NotConfigured(self.kind().name()).into());
        }

        let mut data = BytesMut::new();
        let mut key = false;
        for unit in units.iter().filter(|u| u.is_slice()) {
            key |= unit.is_keyframe();
            length_prefixed(&unit.payload(), &mut data);
        }
        if data.is_empty() {
            return Ok(Vec::new());
        }
        if self.awaiting_key && !key {
            tracing::trace!("Dropping delta frame before first keyframe");
            return Ok(Vec::new());
        }
        self.awaiting_key = false;

        let timestamp = self.frames * self.frame_duration;
        self.frames += 1;
        Ok(vec![DecoderInput::Chunk {
            data: data.freeze(),
            timestamp,
            key,
        }])
    }

    fn teardown(&mut self) {
        self.frames = 0;
        self.configured = false;
        self.awaiting_key = true;
    }
}
