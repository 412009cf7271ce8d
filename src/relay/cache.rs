//! Keyframe cache for late joiners

use bytes::Bytes;
use serde::Serialize;

use crate::media::nal::split_units;

/// Latest SPS, PPS and IDR unit seen on a device stream
///
/// Each slot is replaced whenever a newer unit of its type passes through;
/// slots are never merged. Units keep their start codes so the snapshot can
/// be sent to a viewer as-is.
#[derive(Debug, Default, Clone)]
pub struct KeyframeCache {
    sps: Option<Bytes>,
    pps: Option<Bytes>,
    idr: Option<Bytes>,
}

/// Which cache slots are filled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub sps: bool,
    pub pps: bool,
    pub idr: bool,
}

impl KeyframeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record parameter sets and keyframes from a relayed payload
    pub fn observe(&mut self, payload: &Bytes) {
        for unit in split_units(payload) {
            match unit.nal_type {
                7 => self.sps = Some(unit.data),
                8 => self.pps = Some(unit.data),
                5 => self.idr = Some(unit.data),
                _ => {}
            }
        }
    }

    /// Cached units in decode order: SPS, PPS, IDR
    pub fn snapshot(&self) -> Vec<Bytes> {
        [&self.sps, &self.pps, &self.idr]
            .into_iter()
            .flatten()
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.sps.is_none() && self.pps.is_none() && self.idr.is_none()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            sps: self.sps.is_some(),
            pps: self.pps.is_some(),
            idr: self.idr.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPS: &[u8] = &[0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0xC0, 0x1F];
    const SPS2: &[u8] = &[0x00, 0x00, 0x00, 0x01, 0x67, 0x64, 0x00, 0x28];
    const PPS: &[u8] = &[0x00, 0x00, 0x00, 0x01, 0x68, 0xCE, 0x3C, 0x80];
    const IDR: &[u8] = &[0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x84, 0x21];
    const P: &[u8] = &[0x00, 0x00, 0x00, 0x01, 0x41, 0x9A, 0x02, 0x11];

    fn payload(parts: &[&[u8]]) -> Bytes {
        Bytes::from(parts.concat())
    }

    #[test]
    fn test_snapshot_order() {
        let mut cache = KeyframeCache::new();
        assert!(cache.is_empty());

        cache.observe(&payload(&[SPS, PPS, IDR]));
        cache.observe(&payload(&[P]));

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(&snapshot[0][..], SPS);
        assert_eq!(&snapshot[1][..], PPS);
        assert_eq!(&snapshot[2][..], IDR);
    }

    #[test]
    fn test_slots_replaced_independently() {
        let mut cache = KeyframeCache::new();
        cache.observe(&payload(&[SPS, PPS, IDR]));
        cache.observe(&payload(&[SPS2, IDR]));

        let snapshot = cache.snapshot();
        assert_eq!(&snapshot[0][..], SPS2);
        assert_eq!(&snapshot[1][..], PPS);
    }

    #[test]
    fn test_partial_cache() {
        let mut cache = KeyframeCache::new();
        cache.observe(&payload(&[IDR]));
        assert_eq!(cache.snapshot(), vec![Bytes::from_static(IDR)]);
        assert_eq!(
            cache.stats(),
            CacheStats {
                sps: false,
                pps: false,
                idr: true,
            }
        );

        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.snapshot().is_empty());
    }
}
