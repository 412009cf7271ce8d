//! Relayed payloads in, decoder input out

use bytes::Bytes;

use super::detect::StreamKind;
use super::params::{DecoderConfig, ParameterSetTracker};
use super::strategy::{select_strategy, DecoderCapabilities, DecoderInput, SinkStrategy, StrategyKind};
use super::SinkConfig;
use crate::error::{MediaError, Result};
use crate::media::split_units;

/// Viewer-side adaptation of one relayed stream
///
/// Each pushed payload is one relay message: a frame group for H.264, one
/// complete image for JPEG. The stream type is sniffed from the first
/// non-empty payload; images bypass the decode strategy entirely.
pub struct SinkAdapter {
    strategy: Box<dyn SinkStrategy>,
    tracker: ParameterSetTracker,
    kind: Option<StreamKind>,
}

impl SinkAdapter {
    /// Adapter using the first strategy `caps` allows
    pub fn new(caps: &DecoderCapabilities, config: &SinkConfig) -> Result<Self> {
        let strategy = select_strategy(caps, config).ok_or(MediaError::NoStrategy)?;
        Ok(Self::with_strategy(strategy))
    }

    pub fn with_strategy(strategy: Box<dyn SinkStrategy>) -> Self {
        Self {
            strategy,
            tracker: ParameterSetTracker::new(),
            kind: None,
        }
    }

    /// Use the size from the start descriptor instead of parsing the SPS
    pub fn set_geometry(&mut self, width: u32, height: u32) {
        self.tracker = ParameterSetTracker::with_geometry(width, height);
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy.kind()
    }

    pub fn stream_kind(&self) -> Option<StreamKind> {
        self.kind
    }

    pub fn decoder_config(&self) -> Option<&DecoderConfig> {
        self.tracker.current()
    }

    pub fn push(&mut self, payload: Bytes) -> Result<Vec<DecoderInput>> {
        if payload.is_empty() {
            return Ok(Vec::new());
        }

        let kind = match self.kind {
            Some(kind) => kind,
            None => {
                let kind = StreamKind::detect(&payload);
                if kind == StreamKind::Unknown {
                    let head = payload[..payload.len().min(4)].to_vec();
                    return Err(MediaError::UnsupportedStream(head).into());
                }
                tracing::debug!(stream = %kind, strategy = %self.strategy.kind(), "Sink stream detected");
                self.kind = Some(kind);
                kind
            }
        };

        match kind {
            StreamKind::Jpeg => Ok(vec![DecoderInput::Image(payload)]),
            _ => self.push_h264(&payload),
        }
    }

    fn push_h264(&mut self, payload: &[u8]) -> Result<Vec<DecoderInput>> {
        let units = split_units(payload);
        let mut inputs = Vec::new();

        for unit in units.iter().filter(|u| u.is_parameter_set()) {
            match self.tracker.observe(unit) {
                Ok(Some(config)) => inputs.extend(self.strategy.configure(&config)?),
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "Ignoring bad parameter set"),
            }
        }

        if self.strategy.needs_configuration() && self.tracker.current().is_none() {
            tracing::trace!("No decoder configuration yet, dropping frame group");
            return Ok(inputs);
        }

        inputs.extend(self.strategy.feed(&units)?);
        Ok(inputs)
    }

    /// Release decoder state; the next payload starts over
    pub fn teardown(&mut self) {
        self.strategy.teardown();
        self.tracker.reset();
        self.kind = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPS: &[u8] = &[0, 0, 0, 1, 0x67, 0x42, 0xC0, 0x1F, 0xEC, 0xA0, 0x28, 0x02, 0xDC, 0x80];
    const PPS: &[u8] = &[0, 0, 0, 1, 0x68, 0xCE, 0x3C, 0x80];
    const IDR: &[u8] = &[0, 0, 0, 1, 0x65, 0x88, 0x84, 0x21];
    const P: &[u8] = &[0, 0, 0, 1, 0x41, 0x9A, 0x02, 0x11];

    fn keyframe_group() -> Bytes {
        Bytes::from([SPS, PPS, IDR].concat())
    }

    #[test]
    fn test_hardware_pipeline() {
        let mut sink = SinkAdapter::new(&DecoderCapabilities::all(), &SinkConfig::default()).unwrap();
        assert_eq!(sink.strategy(), StrategyKind::Hardware);

        // Delta frames before any parameter set are dropped
        assert!(sink.push(Bytes::from_static(P)).unwrap().is_empty());
        assert_eq!(sink.stream_kind(), Some(StreamKind::H264));

        let inputs = sink.push(keyframe_group()).unwrap();
        assert_eq!(inputs.len(), 2);
        assert!(matches!(
            &inputs[0],
            DecoderInput::Configure { codec, width: 1280, height: 720, .. } if codec == "avc1.42c01f"
        ));
        assert!(matches!(inputs[1], DecoderInput::Chunk { key: true, timestamp: 0, .. }));

        let inputs = sink.push(Bytes::from_static(P)).unwrap();
        assert!(matches!(inputs[..], [DecoderInput::Chunk { key: false, .. }]));
    }

    #[test]
    fn test_late_join_snapshot_messages() {
        // The relay sends a cached SPS, PPS and IDR as separate messages
        let mut sink = SinkAdapter::new(&DecoderCapabilities::all(), &SinkConfig::default()).unwrap();
        assert!(sink.push(Bytes::from_static(SPS)).unwrap().is_empty());

        let inputs = sink.push(Bytes::from_static(PPS)).unwrap();
        assert!(matches!(inputs[..], [DecoderInput::Configure { .. }]));

        let inputs = sink.push(Bytes::from_static(IDR)).unwrap();
        assert!(matches!(inputs[..], [DecoderInput::Chunk { key: true, .. }]));
    }

    #[test]
    fn test_buffered_pipeline() {
        let caps = DecoderCapabilities {
            buffered: true,
            ..Default::default()
        };
        let mut sink = SinkAdapter::new(&caps, &SinkConfig::default()).unwrap();
        let inputs = sink.push(keyframe_group()).unwrap();
        assert!(matches!(
            inputs[..],
            [DecoderInput::InitSegment(_), DecoderInput::MediaSegment(_)]
        ));
    }

    #[test]
    fn test_raw_pipeline_keeps_parameter_sets() {
        let mut sink =
            SinkAdapter::new(&DecoderCapabilities::software_only(), &SinkConfig::default()).unwrap();
        assert_eq!(
            sink.push(Bytes::from_static(P)).unwrap(),
            vec![DecoderInput::Raw(Bytes::from_static(P))]
        );
        assert_eq!(
            sink.push(keyframe_group()).unwrap(),
            vec![DecoderInput::Raw(keyframe_group())]
        );
    }

    #[test]
    fn test_images_bypass_strategy() {
        let mut sink = SinkAdapter::new(&DecoderCapabilities::all(), &SinkConfig::default()).unwrap();
        let jpeg = Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0xFF, 0xD9]);
        assert_eq!(sink.push(jpeg.clone()).unwrap(), vec![DecoderInput::Image(jpeg)]);
        assert_eq!(sink.stream_kind(), Some(StreamKind::Jpeg));
        assert!(sink.decoder_config().is_none());
    }

    #[test]
    fn test_geometry_override_and_teardown() {
        let mut sink = SinkAdapter::new(&DecoderCapabilities::all(), &SinkConfig::default()).unwrap();
        sink.set_geometry(720, 1280);
        sink.push(keyframe_group()).unwrap();
        let config = sink.decoder_config().unwrap();
        assert_eq!((config.width, config.height), (720, 1280));

        sink.teardown();
        assert!(sink.decoder_config().is_none());
        assert!(sink.stream_kind().is_none());
    }

    #[test]
    fn test_unknown_stream_and_no_strategy() {
        let mut sink = SinkAdapter::new(&DecoderCapabilities::all(), &SinkConfig::default()).unwrap();
        assert!(sink.push(Bytes::from_static(b"RIFF")).is_err());
        assert!(sink.stream_kind().is_none());
        assert!(sink.push(Bytes::new()).unwrap().is_empty());

        assert!(SinkAdapter::new(&DecoderCapabilities::default(), &SinkConfig::default()).is_err());
    }
}
