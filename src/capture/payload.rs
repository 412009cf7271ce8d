//! Post-handshake payload processing
//!
//! Turns the capture server's byte stream into self-contained payloads.
//! Parameter sets are held back in a configuration buffer and re-injected in
//! front of every IDR slice, so a decoder joining at any keyframe gets
//! everything it needs in one payload.

use bytes::{Bytes, BytesMut};

use crate::media::nal::{concat_units, AnnexBDemuxer, NalUnit};

/// Latest parameter sets seen on the stream
#[derive(Debug, Default)]
pub struct ConfigBuffer {
    units: Vec<NalUnit>,
}

impl ConfigBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the buffered units wholesale
    pub fn replace(&mut self, units: Vec<NalUnit>) {
        self.units = units;
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn units(&self) -> &[NalUnit] {
        &self.units
    }

    /// Buffered units as one Annex-B run
    pub fn bytes(&self) -> Bytes {
        concat_units(&self.units)
    }

    pub fn clear(&mut self) {
        self.units.clear();
    }
}

/// Demuxer plus configuration buffer
///
/// Units are grouped by access unit: everything up to and including a coded
/// slice forms one group. Grouping on slices rather than on socket reads
/// keeps the output independent of how the stream was chunked.
#[derive(Debug, Default)]
pub struct PayloadProcessor {
    demuxer: AnnexBDemuxer,
    pending: Vec<NalUnit>,
    config: ConfigBuffer,
}

impl PayloadProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw stream bytes, returning every payload they completed
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        let mut payloads = Vec::new();

        for unit in self.demuxer.feed(chunk) {
            let ends_group = unit.is_slice();
            self.pending.push(unit);
            if ends_group {
                let group = std::mem::take(&mut self.pending);
                payloads.extend(self.process_group(group));
            }
        }

        payloads
    }

    /// End of stream: emit whatever is still buffered
    pub fn finish(&mut self) -> Option<Bytes> {
        self.pending.extend(self.demuxer.flush());
        let group = std::mem::take(&mut self.pending);
        self.process_group(group)
    }

    /// Apply the configuration rules to one group of units
    ///
    /// A group made only of SPS/PPS/SEI/AUD units replaces the configuration
    /// buffer and emits nothing. Otherwise SPS and PPS are taken out of the
    /// group (replacing the buffer when present) and the remaining units are
    /// emitted, prefixed with the buffer when they include an IDR slice.
    pub fn process_group(&mut self, units: Vec<NalUnit>) -> Option<Bytes> {
        if units.is_empty() {
            return None;
        }

        if units.iter().all(NalUnit::is_config) {
            tracing::trace!(units = units.len(), "Configuration units buffered");
            self.config.replace(units);
            return None;
        }

        let (params, rest): (Vec<_>, Vec<_>) =
            units.into_iter().partition(NalUnit::is_parameter_set);
        if !params.is_empty() {
            self.config.replace(params);
        }
        if rest.is_empty() {
            return None;
        }

        let mut out = BytesMut::new();
        if rest.iter().any(NalUnit::is_keyframe) {
            for unit in self.config.units() {
                out.extend_from_slice(&unit.data);
            }
        }
        for unit in &rest {
            out.extend_from_slice(&unit.data);
        }
        Some(out.freeze())
    }

    pub fn config(&self) -> &ConfigBuffer {
        &self.config
    }

    /// Forget buffered bytes and configuration
    pub fn reset(&mut self) {
        self.demuxer.reset();
        self.pending.clear();
        self.config.clear();
    }
}
