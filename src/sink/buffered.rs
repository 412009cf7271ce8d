//! Buffered decode through fragmented MP4

use super::params::DecoderConfig;
use super::strategy::{DecoderInput, SinkStrategy, StrategyKind};
use crate::error::{MediaError, Result};
use crate::media::{Fmp4Writer, NalUnit};

#[derive(Debug)]
pub struct BufferedStrategy {
    fps: u32,
    timescale: u32,
    writer: Option<Fmp4Writer>,
    awaiting_key: bool,
}

impl BufferedStrategy {
    pub fn new(fps: u32, timescale: u32) -> Self {
        Self {
            fps,
            timescale,
            writer: None,
            awaiting_key: true,
        }
    }
}

impl SinkStrategy for BufferedStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Buffered
    }

    fn configure(&mut self, config: &DecoderConfig) -> Result<Vec<DecoderInput>> {
        let (fps, timescale) = (self.fps, self.timescale);
        let writer = self.writer.get_or_insert_with(|| {
            Fmp4Writer::new(config.avc.clone(), config.width, config.height, timescale, fps)
        });
        writer.reconfigure(config.avc.clone(), config.width, config.height);
        self.awaiting_key = true;
        Ok(vec![DecoderInput::InitSegment(writer.init_segment())])
    }

    fn feed(&mut self, units: &[NalUnit]) -> Result<Vec<DecoderInput>> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(MediaError::NotConfigured(StrategyKind::Buffered.name()).into());
        };

        if !units.iter().any(|u| u.is_slice()) {
            return Ok(Vec::new());
        }
        if self.awaiting_key {
            if !units.iter().any(|u| u.is_keyframe()) {
                return Ok(Vec::new());
            }
            self.awaiting_key = false;
        }

        Ok(vec![DecoderInput::MediaSegment(writer.media_segment(units))])
    }

    fn teardown(&mut self) {
        self.writer = None;
        self.awaiting_key = true;
    }
}
