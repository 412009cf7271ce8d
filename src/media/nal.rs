//! Annex-B NAL unit demuxer
//!
//! The capture server writes a raw H.264 elementary stream where units are
//! delimited by start codes rather than length prefixes:
//!
//! ```text
//! 00 00 00 01 | 67 ... (SPS) | 00 00 01 | 68 ... (PPS) | 00 00 00 01 | 65 ... (IDR)
//! ```
//!
//! Socket reads split this stream at arbitrary points. [`AnnexBDemuxer`]
//! buffers the unit currently being received and only emits it once the next
//! start code shows where it ends, so the unit list it produces does not
//! depend on how the bytes were chunked. The price is that the last unit of
//! the stream so far lags by one unit (about one frame interval for a
//! one-slice-per-frame encoder) until its successor arrives.

use bytes::{Buf, Bytes, BytesMut};

use super::h264::NaluType;

/// A single NAL unit, still carrying its start code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NalUnit {
    /// Low 5 bits of the header byte
    pub nal_type: u8,
    /// Start code + header + payload
    pub data: Bytes,
    start_code_len: usize,
}

impl NalUnit {
    /// Build from bytes beginning with a start code
    ///
    /// Returns `None` when there is no header byte after the start code.
    pub fn from_annex_b(data: Bytes) -> Option<Self> {
        let start_code_len = start_code_len_at(&data, 0)?;
        let header = *data.get(start_code_len)?;
        Some(Self {
            nal_type: header & 0x1F,
            data,
            start_code_len,
        })
    }

    /// Unit bytes without the start code
    pub fn payload(&self) -> Bytes {
        self.data.slice(self.start_code_len..)
    }

    pub fn kind(&self) -> Option<NaluType> {
        NaluType::from_byte(self.nal_type)
    }

    /// SPS or PPS
    pub fn is_parameter_set(&self) -> bool {
        matches!(self.nal_type, 7 | 8)
    }

    /// Parameter set or auxiliary unit (SEI, SPS, PPS, AUD)
    pub fn is_config(&self) -> bool {
        matches!(self.nal_type, 6..=9)
    }

    pub fn is_keyframe(&self) -> bool {
        self.nal_type == NaluType::Idr as u8
    }

    /// Coded slice (carries picture data)
    pub fn is_slice(&self) -> bool {
        matches!(self.nal_type, 1..=5)
    }
}

/// Streaming Annex-B splitter
#[derive(Debug, Default)]
pub struct AnnexBDemuxer {
    /// Current (incomplete) unit, starting at its start code once synced
    buf: BytesMut,
    /// Whether `buf` starts with a start code
    synced: bool,
    /// Offset already searched for the next start code
    scan_pos: usize,
}

impl AnnexBDemuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every unit it completed
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<NalUnit> {
        self.buf.extend_from_slice(chunk);
        let mut units = Vec::new();

        if !self.synced {
            match find_start_code(&self.buf, 0, 0) {
                Some(pos) => {
                    // Bytes before the first start code cannot belong to a unit
                    self.buf.advance(pos);
                    self.synced = true;
                    self.scan_pos = 0;
                }
                None => {
                    // Keep a possible partial start code
                    let keep = self.buf.len().min(3);
                    let drop = self.buf.len() - keep;
                    self.buf.advance(drop);
                    return units;
                }
            }
        }

        loop {
            let header_at = start_code_len_at(&self.buf, 0).unwrap_or(3);
            let from = self.scan_pos.max(header_at);

            match find_start_code(&self.buf, from, header_at) {
                Some(next) => {
                    let unit = self.buf.split_to(next).freeze();
                    self.scan_pos = 0;
                    if let Some(unit) = NalUnit::from_annex_b(unit) {
                        units.push(unit);
                    }
                }
                None => {
                    // Re-scan the tail next time in case a start code straddles chunks
                    self.scan_pos = self.buf.len().saturating_sub(3).max(header_at);
                    break;
                }
            }
        }

        units
    }

    /// Emit the buffered unit, treating end of input as its boundary
    pub fn flush(&mut self) -> Option<NalUnit> {
        let unit = if self.synced {
            NalUnit::from_annex_b(self.buf.split().freeze())
        } else {
            None
        };
        self.reset();
        unit
    }

    /// Drop buffered bytes
    pub fn reset(&mut self) {
        self.buf.clear();
        self.synced = false;
        self.scan_pos = 0;
    }

    /// Number of bytes waiting for a terminating start code
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Split a complete Annex-B buffer into units
pub fn split_units(data: &[u8]) -> Vec<NalUnit> {
    let mut demuxer = AnnexBDemuxer::new();
    let mut units = demuxer.feed(data);
    units.extend(demuxer.flush());
    units
}

/// Concatenate units back into one Annex-B payload
pub fn concat_units<'a>(units: impl IntoIterator<Item = &'a NalUnit>) -> Bytes {
    let mut out = BytesMut::new();
    for unit in units {
        out.extend_from_slice(&unit.data);
    }
    out.freeze()
}

/// Find the next start code at or after `from`
///
/// A `00 00 01` preceded by a zero byte past `floor` is reported as a 4-byte code.
fn find_start_code(buf: &[u8], from: usize, floor: usize) -> Option<usize> {
    if buf.len() < 3 {
        return None;
    }
    let mut i = from;
    while i + 2 < buf.len() {
        if buf[i + 2] > 1 {
            i += 3;
            continue;
        }
        if buf[i] == 0 && buf[i + 1] == 0 && buf[i + 2] == 1 {
            if i > floor && buf[i - 1] == 0 {
                return Some(i - 1);
            }
            return Some(i);
        }
        i += 1;
    }
    None
}

/// Length of the start code at `pos`, if one is there
fn start_code_len_at(buf: &[u8], pos: usize) -> Option<usize> {
    match buf.get(pos..pos + 4) {
        Some([0, 0, 0, 1]) => Some(4),
        _ => match buf.get(pos..pos + 3) {
            Some([0, 0, 1]) => Some(3),
            _ => None,
        },
    }
}
