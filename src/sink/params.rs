//! Parameter-set tracking and decoder configuration

use bytes::Bytes;

use crate::error::Result;
use crate::media::{AvcConfig, NalUnit, SpsInfo};

/// Everything a decoder needs before its first frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderConfig {
    /// e.g. `avc1.42c01f`
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub avc: AvcConfig,
}

impl DecoderConfig {
    /// Build from start-code-stripped SPS and PPS
    ///
    /// `geometry` overrides the size parsed from the SPS.
    pub fn from_parameter_sets(sps: Bytes, pps: Bytes, geometry: Option<(u32, u32)>) -> Result<Self> {
        let (width, height) = match geometry {
            Some(size) => size,
            None => {
                let info = SpsInfo::parse(&sps)?;
                (info.width, info.height)
            }
        };
        let avc = AvcConfig::from_parameter_sets(sps, pps)?;

        Ok(Self {
            codec: avc.codec_string(),
            width,
            height,
            avc,
        })
    }

    /// avcC record handed to the decoder out of band
    pub fn description(&self) -> Bytes {
        self.avc.raw.clone()
    }
}

/// Latest SPS/PPS pair seen on a stream
#[derive(Debug, Default)]
pub struct ParameterSetTracker {
    sps: Option<Bytes>,
    pps: Option<Bytes>,
    geometry: Option<(u32, u32)>,
    current: Option<DecoderConfig>,
}

impl ParameterSetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a known picture size instead of parsing it from the SPS
    pub fn with_geometry(width: u32, height: u32) -> Self {
        Self {
            geometry: Some((width, height)),
            ..Self::default()
        }
    }

    /// Record a unit; returns a configuration when a new SPS/PPS pair is complete
    ///
    /// Repeats of the active pair return `None`. A malformed SPS is an error
    /// and leaves the active configuration in place.
    pub fn observe(&mut self, unit: &NalUnit) -> Result<Option<DecoderConfig>> {
        match unit.nal_type {
            7 => self.sps = Some(unit.payload()),
            8 => self.pps = Some(unit.payload()),
            _ => return Ok(None),
        }

        let (Some(sps), Some(pps)) = (&self.sps, &self.pps) else {
            return Ok(None);
        };
        if let Some(current) = &self.current {
            if current.avc.sps == sps && current.avc.pps == pps {
                return Ok(None);
            }
        }

        let config = DecoderConfig::from_parameter_sets(sps.clone(), pps.clone(), self.geometry)?;
        tracing::debug!(
            codec = %config.codec,
            profile = config.avc.profile_name(),
            level = %config.avc.level_string(),
            width = config.width,
            height = config.height,
            "Decoder configuration changed"
        );
        self.current = Some(config.clone());
        Ok(Some(config))
    }

    pub fn current(&self) -> Option<&DecoderConfig> {
        self.current.as_ref()
    }

    pub fn reset(&mut self) {
        self.sps = None;
        self.pps = None;
        self.current = None;
    }
}
