//! H.264/AVC helpers
//!
//! Decoders that take length-prefixed input (hardware decoders, MP4 sample
//! descriptions) are configured out of band with an
//! AVCDecoderConfigurationRecord built from the latest SPS/PPS pair:
//!
//! ```text
//! configurationVersion (1) | AVCProfileIndication (1) | profile_compatibility (1)
//! | AVCLevelIndication (1) | lengthSizeMinusOne (1, lower 2 bits)
//! | numOfSPS (1, lower 5 bits) | { spsLength (2) | spsNALUnit }*
//! | numOfPPS (1) | { ppsLength (2) | ppsNALUnit }*
//! ```
//!
//! The same three profile/compat/level bytes form the short codec string
//! (`avc1.PPCCLL`).

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{MediaError, Result};

/// NAL unit type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluType {
    /// Non-IDR slice
    Slice = 1,
    /// Slice data partition A
    SlicePartA = 2,
    /// Slice data partition B
    SlicePartB = 3,
    /// Slice data partition C
    SlicePartC = 4,
    /// IDR slice (keyframe)
    Idr = 5,
    /// Supplemental enhancement information
    Sei = 6,
    /// Sequence parameter set
    Sps = 7,
    /// Picture parameter set
    Pps = 8,
    /// Access unit delimiter
    Aud = 9,
    /// End of sequence
    EndSeq = 10,
    /// End of stream
    EndStream = 11,
    /// Filler data
    Filler = 12,
}

impl NaluType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x1F {
            1 => Some(NaluType::Slice),
            2 => Some(NaluType::SlicePartA),
            3 => Some(NaluType::SlicePartB),
            4 => Some(NaluType::SlicePartC),
            5 => Some(NaluType::Idr),
            6 => Some(NaluType::Sei),
            7 => Some(NaluType::Sps),
            8 => Some(NaluType::Pps),
            9 => Some(NaluType::Aud),
            10 => Some(NaluType::EndSeq),
            11 => Some(NaluType::EndStream),
            12 => Some(NaluType::Filler),
            _ => None,
        }
    }

    pub fn is_keyframe(&self) -> bool {
        matches!(self, NaluType::Idr)
    }

    pub fn is_parameter_set(&self) -> bool {
        matches!(self, NaluType::Sps | NaluType::Pps)
    }
}

/// AVC decoder configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvcConfig {
    /// AVC profile (66=Baseline, 77=Main, 100=High, etc.)
    pub profile: u8,
    /// Profile compatibility flags
    pub compatibility: u8,
    /// AVC level (e.g., 31 = 3.1)
    pub level: u8,
    /// NALU length size in bytes
    pub nalu_length_size: u8,
    /// Sequence parameter set (no start code)
    pub sps: Bytes,
    /// Picture parameter set (no start code)
    pub pps: Bytes,
    /// Serialized AVCDecoderConfigurationRecord
    pub raw: Bytes,
}

impl AvcConfig {
    /// Build from start-code-stripped SPS and PPS units
    pub fn from_parameter_sets(sps: Bytes, pps: Bytes) -> Result<Self> {
        if sps.len() < 4 {
            return Err(MediaError::TruncatedSps.into());
        }
        if pps.is_empty() {
            return Err(MediaError::MissingParameterSets.into());
        }

        let profile = sps[1];
        let compatibility = sps[2];
        let level = sps[3];

        let mut buf = BytesMut::with_capacity(11 + sps.len() + pps.len());
        buf.put_u8(1); // configurationVersion
        buf.put_u8(profile);
        buf.put_u8(compatibility);
        buf.put_u8(level);
        buf.put_u8(0xFF); // 4-byte NALU lengths
        buf.put_u8(0xE1); // 1 SPS
        buf.put_u16(sps.len() as u16);
        buf.put_slice(&sps);
        buf.put_u8(1); // 1 PPS
        buf.put_u16(pps.len() as u16);
        buf.put_slice(&pps);

        Ok(AvcConfig {
            profile,
            compatibility,
            level,
            nalu_length_size: 4,
            sps,
            pps,
            raw: buf.freeze(),
        })
    }

    /// Codec identifier, e.g. `avc1.64001f`
    pub fn codec_string(&self) -> String {
        format!(
            "avc1.{:02x}{:02x}{:02x}",
            self.profile, self.compatibility, self.level
        )
    }

    /// Get profile name
    pub fn profile_name(&self) -> &'static str {
        match self.profile {
            66 => "Baseline",
            77 => "Main",
            88 => "Extended",
            100 => "High",
            110 => "High 10",
            122 => "High 4:2:2",
            244 => "High 4:4:4",
            _ => "Unknown",
        }
    }

    /// Get level as string (e.g., "3.1")
    pub fn level_string(&self) -> String {
        format!("{}.{}", self.level / 10, self.level % 10)
    }
}

/// Re-frame one NAL payload with a 4-byte big-endian length prefix
pub fn length_prefixed(payload: &[u8], out: &mut BytesMut) {
    out.put_u32(payload.len() as u32);
    out.put_slice(payload);
}
