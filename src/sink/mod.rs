//! Viewer-side sink adaptation
//!
//! Turns the byte stream a relay delivers into input a local decoder
//! accepts. This side may run far from the relay, so it only depends on the
//! media module:
//!
//! ```text
//! payload ──► StreamKind ──► jpeg ──────────────────────────► Image
//!                        └─► h264 ──► ParameterSetTracker ──► SinkStrategy::configure
//!                                 └─────────────────────────► SinkStrategy::feed
//! ```

pub mod adapter;
pub mod buffered;
pub mod detect;
pub mod hardware;
pub mod params;
pub mod raw;
pub mod strategy;

pub use adapter::SinkAdapter;
pub use detect::StreamKind;
pub use params::{DecoderConfig, ParameterSetTracker};
pub use strategy::{select_strategy, DecoderCapabilities, DecoderInput, SinkStrategy, StrategyKind};

use crate::media::fmp4::VIDEO_TIMESCALE;

/// Sink configuration
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Nominal frame rate used to synthesize timestamps
    pub fps: u32,

    /// fMP4 timescale
    pub timescale: u32,

    /// Strategies to try, most preferred first
    pub order: Vec<StrategyKind>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            fps: 60,
            timescale: VIDEO_TIMESCALE,
            order: StrategyKind::DEFAULT_ORDER.to_vec(),
        }
    }
}

impl SinkConfig {
    pub fn fps(mut self, fps: u32) -> Self {
        self.fps = fps.max(1);
        self
    }

    pub fn timescale(mut self, timescale: u32) -> Self {
        self.timescale = timescale.max(1);
        self
    }

    pub fn order(mut self, order: Vec<StrategyKind>) -> Self {
        self.order = order;
        self
    }
}
