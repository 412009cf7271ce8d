//! Raw Annex-B forwarding for software decoders

use super::params::DecoderConfig;
use super::strategy::{DecoderInput, SinkStrategy, StrategyKind};
use crate::error::Result;
use crate::media::nal::concat_units;
use crate::media::NalUnit;

/// Passes units through untouched, parameter sets included
#[derive(Debug, Default)]
pub struct RawStrategy;

impl RawStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl SinkStrategy for RawStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Raw
    }

    fn needs_configuration(&self) -> bool {
        false
    }

    // Software decoders read SPS/PPS in-band
    fn configure(&mut self, _config: &DecoderConfig) -> Result<Vec<DecoderInput>> {
        Ok(Vec::new())
    }

    fn feed(&mut self, units: &[NalUnit]) -> Result<Vec<DecoderInput>> {
        if units.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![DecoderInput::Raw(concat_units(units))])
    }

    fn teardown(&mut self) {}
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::media::split_units;

    #[test]
    fn test_forwards_everything() {
        let stream: &[u8] = &[
            0, 0, 0, 1, 0x67, 0x42, 0xC0, 0x1F, 0, 0, 1, 0x68, 0xCE, 0x3C, 0x80, 0, 0, 0, 1, 0x65,
            0x88,
        ];
        let mut strategy = RawStrategy::new();
        assert_eq!(
            strategy.feed(&split_units(stream)).unwrap(),
            vec![DecoderInput::Raw(Bytes::from_static(stream))]
        );
        assert!(strategy.feed(&[]).unwrap().is_empty());
    }
}
