//! Media handling for the H.264 screen stream
//!
//! This module provides:
//! - Annex-B demuxing into NAL units
//! - SPS geometry parsing
//! - AVC decoder configuration records and codec strings
//! - Fragmented MP4 packaging

pub mod fmp4;
pub mod h264;
pub mod nal;
pub mod sps;

pub use fmp4::Fmp4Writer;
pub use h264::{AvcConfig, NaluType};
pub use nal::{split_units, AnnexBDemuxer, NalUnit};
pub use sps::SpsInfo;
