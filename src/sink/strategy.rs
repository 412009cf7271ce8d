//! Decoder-side strategies
//!
//! The embedding environment describes what it can decode once, through
//! [`DecoderCapabilities`]. Strategies are then tried in a fixed order and
//! the first usable one handles the whole stream:
//!
//! ```text
//! hardware  -> configure record + length-prefixed chunks
//! buffered  -> fMP4 init segment + moof/mdat per frame group
//! raw       -> Annex-B bytes for a software decoder
//! ```

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

use super::buffered::BufferedStrategy;
use super::hardware::HardwareStrategy;
use super::params::DecoderConfig;
use super::raw::RawStrategy;
use super::SinkConfig;
use crate::error::Result;
use crate::media::NalUnit;

/// Decode paths available to a viewer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderCapabilities {
    /// Accepts length-prefixed units plus an avcC description
    pub hardware: bool,
    /// Accepts fragmented MP4 through a media buffer
    pub buffered: bool,
    /// Accepts Annex-B bytes
    pub software: bool,
}

impl DecoderCapabilities {
    pub fn all() -> Self {
        Self {
            hardware: true,
            buffered: true,
            software: true,
        }
    }

    pub fn software_only() -> Self {
        Self {
            software: true,
            ..Self::default()
        }
    }
}

/// Strategy identifiers, in preference order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    Hardware,
    Buffered,
    Raw,
}

impl StrategyKind {
    pub const DEFAULT_ORDER: [StrategyKind; 3] =
        [StrategyKind::Hardware, StrategyKind::Buffered, StrategyKind::Raw];

    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::Hardware => "hardware",
            StrategyKind::Buffered => "buffered",
            StrategyKind::Raw => "raw",
        }
    }

    pub fn is_available(&self, caps: &DecoderCapabilities) -> bool {
        match self {
            StrategyKind::Hardware => caps.hardware,
            StrategyKind::Buffered => caps.buffered,
            StrategyKind::Raw => caps.software,
        }
    }

    fn create(&self, config: &SinkConfig) -> Box<dyn SinkStrategy> {
        match self {
            StrategyKind::Hardware => Box::new(HardwareStrategy::new(config.fps)),
            StrategyKind::Buffered => Box::new(BufferedStrategy::new(config.fps, config.timescale)),
            StrategyKind::Raw => Box::new(RawStrategy::new()),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "hardware" => Ok(StrategyKind::Hardware),
            "buffered" => Ok(StrategyKind::Buffered),
            "raw" => Ok(StrategyKind::Raw),
            other => Err(format!("unknown sink strategy {:?}", other)),
        }
    }
}

/// Input for the decoder, in the order it must be applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderInput {
    /// (Re)configure a hardware decoder
    Configure {
        codec: String,
        width: u32,
        height: u32,
        description: Bytes,
    },
    /// One frame of length-prefixed units
    Chunk {
        data: Bytes,
        /// Microseconds
        timestamp: u64,
        key: bool,
    },
    /// ftyp + moov
    InitSegment(Bytes),
    /// moof + mdat
    MediaSegment(Bytes),
    /// Annex-B bytes
    Raw(Bytes),
    /// A complete still image
    Image(Bytes),
}

/// One way of turning relayed units into decoder input
pub trait SinkStrategy: Send {
    fn kind(&self) -> StrategyKind;

    /// Whether frames can only be fed after [`configure`](Self::configure)
    fn needs_configuration(&self) -> bool {
        true
    }

    /// Apply a new SPS/PPS configuration
    fn configure(&mut self, config: &DecoderConfig) -> Result<Vec<DecoderInput>>;

    /// Convert one frame group
    fn feed(&mut self, units: &[NalUnit]) -> Result<Vec<DecoderInput>>;

    /// Drop all decoder state
    fn teardown(&mut self);
}

/// First strategy in `config.order` the decoder supports
pub fn select_strategy(caps: &DecoderCapabilities, config: &SinkConfig) -> Option<Box<dyn SinkStrategy>> {
    let kind = config.order.iter().find(|kind| kind.is_available(caps))?;
    tracing::debug!(strategy = %kind, "Selected sink strategy");
    Some(kind.create(config))
}
