//! Minimal fragmented MP4 writer for one H.264 video track
//!
//! ```text
//! Initialization segment:
//!   ftyp
//!   moov
//!     mvhd
//!     trak
//!       tkhd
//!       mdia (mdhd, hdlr "vide", minf (vmhd, dinf/dref, stbl (stsd/avc1/avcC, empty tables)))
//!     mvex/trex
//!
//! Media segment (one per frame group):
//!   moof
//!     mfhd (sequence number)
//!     traf (tfhd, tfdt (base decode time), trun (1 sample, data offset))
//!   mdat (length-prefixed NAL units)
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::h264::{length_prefixed, AvcConfig};
use super::nal::NalUnit;

const TRACK_ID: u32 = 1;

/// Default timescale for video (90 kHz)
pub const VIDEO_TIMESCALE: u32 = 90_000;

/// Sample flags for a sync sample (depends_on = 2)
const SYNC_SAMPLE_FLAGS: u32 = 0x0200_0000;
/// Sample flags for a non-sync sample (depends_on = 1, is_non_sync)
const DELTA_SAMPLE_FLAGS: u32 = 0x0101_0000;

const IDENTITY_MATRIX: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

/// Fragmented MP4 writer
#[derive(Debug)]
pub struct Fmp4Writer {
    config: AvcConfig,
    width: u32,
    height: u32,
    timescale: u32,
    sample_duration: u32,
    sequence_number: u32,
    decode_time: u64,
}

impl Fmp4Writer {
    pub fn new(config: AvcConfig, width: u32, height: u32, timescale: u32, fps: u32) -> Self {
        Self {
            config,
            width,
            height,
            timescale,
            sample_duration: timescale / fps.max(1),
            sequence_number: 1,
            decode_time: 0,
        }
    }

    /// Switch to a new decoder configuration
    ///
    /// Sequence numbers and decode time carry on, so fragments written after
    /// the new init segment keep increasing.
    pub fn reconfigure(&mut self, config: AvcConfig, width: u32, height: u32) {
        self.config = config;
        self.width = width;
        self.height = height;
    }

    /// Sequence number the next fragment will carry
    pub fn sequence_number(&self) -> u32 {
        self.sequence_number
    }

    /// Accumulated decode time in timescale units
    pub fn decode_time(&self) -> u64 {
        self.decode_time
    }

    /// Build the ftyp + moov initialization segment
    pub fn init_segment(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1024);

        write_box(&mut buf, b"ftyp", |b| {
            b.put_slice(b"isom");
            b.put_u32(0x200);
            for brand in [b"isom", b"iso6", b"avc1", b"mp41"] {
                b.put_slice(brand);
            }
        });

        write_box(&mut buf, b"moov", |b| {
            self.write_mvhd(b);
            write_box(b, b"trak", |b| {
                self.write_tkhd(b);
                write_box(b, b"mdia", |b| {
                    self.write_mdhd(b);
                    write_hdlr(b);
                    write_box(b, b"minf", |b| {
                        write_full_box(b, b"vmhd", 0, 1, |b| b.put_slice(&[0; 8]));
                        write_dinf(b);
                        write_box(b, b"stbl", |b| {
                            self.write_stsd(b);
                            write_full_box(b, b"stts", 0, 0, |b| b.put_u32(0));
                            write_full_box(b, b"stsc", 0, 0, |b| b.put_u32(0));
                            write_full_box(b, b"stsz", 0, 0, |b| {
                                b.put_u32(0);
                                b.put_u32(0);
                            });
                            write_full_box(b, b"stco", 0, 0, |b| b.put_u32(0));
                        });
                    });
                });
            });
            write_box(b, b"mvex", |b| {
                write_full_box(b, b"trex", 0, 0, |b| {
                    b.put_u32(TRACK_ID);
                    b.put_u32(1); // sample description index
                    b.put_u32(self.sample_duration);
                    b.put_u32(0);
                    b.put_u32(0);
                });
            });
        });

        buf.freeze()
    }

    /// Build a moof + mdat pair holding one sample made of `units`
    ///
    /// Only coded slices go into the sample; parameter sets travel in avcC.
    pub fn media_segment(&mut self, units: &[NalUnit]) -> Bytes {
        let mut sample = BytesMut::new();
        let mut keyframe = false;
        for unit in units.iter().filter(|u| u.is_slice()) {
            keyframe |= unit.is_keyframe();
            length_prefixed(&unit.payload(), &mut sample);
        }

        let mut buf = BytesMut::with_capacity(128 + sample.len());
        let mut data_offset_pos = 0;

        write_box(&mut buf, b"moof", |b| {
            write_full_box(b, b"mfhd", 0, 0, |b| b.put_u32(self.sequence_number));
            write_box(b, b"traf", |b| {
                // default-base-is-moof
                write_full_box(b, b"tfhd", 0, 0x02_0000, |b| b.put_u32(TRACK_ID));
                write_full_box(b, b"tfdt", 1, 0, |b| b.put_u64(self.decode_time));
                // data-offset, sample-duration, sample-size, sample-flags
                write_full_box(b, b"trun", 0, 0x00_0701, |b| {
                    b.put_u32(1); // sample count
                    data_offset_pos = b.len();
                    b.put_u32(0); // patched below
                    b.put_u32(self.sample_duration);
                    b.put_u32(sample.len() as u32);
                    b.put_u32(if keyframe {
                        SYNC_SAMPLE_FLAGS
                    } else {
                        DELTA_SAMPLE_FLAGS
                    });
                });
            });
        });

        // Offset from the start of moof to the first mdat payload byte
        let data_offset = (buf.len() + 8) as u32;
        buf[data_offset_pos..data_offset_pos + 4].copy_from_slice(&data_offset.to_be_bytes());

        write_box(&mut buf, b"mdat", |b| b.put_slice(&sample));

        self.sequence_number += 1;
        self.decode_time += self.sample_duration as u64;

        buf.freeze()
    }

    fn write_mvhd(&self, buf: &mut BytesMut) {
        write_full_box(buf, b"mvhd", 0, 0, |b| {
            b.put_u32(0); // creation time
            b.put_u32(0); // modification time
            b.put_u32(self.timescale);
            b.put_u32(0); // duration (live)
            b.put_u32(0x0001_0000); // rate 1.0
            b.put_u16(0x0100); // volume 1.0
            b.put_slice(&[0; 10]);
            put_matrix(b);
            b.put_slice(&[0; 24]);
            b.put_u32(TRACK_ID + 1);
        });
    }

    fn write_tkhd(&self, buf: &mut BytesMut) {
        // enabled | in movie
        write_full_box(buf, b"tkhd", 0, 3, |b| {
            b.put_u32(0);
            b.put_u32(0);
            b.put_u32(TRACK_ID);
            b.put_u32(0);
            b.put_u32(0); // duration
            b.put_slice(&[0; 8]);
            b.put_u16(0); // layer
            b.put_u16(0); // alternate group
            b.put_u16(0); // volume
            b.put_u16(0);
            put_matrix(b);
            b.put_u32(self.width << 16);
            b.put_u32(self.height << 16);
        });
    }

    fn write_mdhd(&self, buf: &mut BytesMut) {
        write_full_box(buf, b"mdhd", 0, 0, |b| {
            b.put_u32(0);
            b.put_u32(0);
            b.put_u32(self.timescale);
            b.put_u32(0);
            b.put_u16(0x55C4); // "und"
            b.put_u16(0);
        });
    }

    fn write_stsd(&self, buf: &mut BytesMut) {
        write_full_box(buf, b"stsd", 0, 0, |b| {
            b.put_u32(1); // entry count
            write_box(b, b"avc1", |b| {
                b.put_slice(&[0; 6]);
                b.put_u16(1); // data reference index
                b.put_slice(&[0; 16]);
                b.put_u16(self.width as u16);
                b.put_u16(self.height as u16);
                b.put_u32(0x0048_0000); // 72 dpi
                b.put_u32(0x0048_0000);
                b.put_u32(0);
                b.put_u16(1); // frame count
                b.put_slice(&[0; 32]); // compressor name
                b.put_u16(0x0018); // depth
                b.put_i16(-1);
                write_box(b, b"avcC", |b| b.put_slice(&self.config.raw));
            });
        });
    }
}

fn write_hdlr(buf: &mut BytesMut) {
    write_full_box(buf, b"hdlr", 0, 0, |b| {
        b.put_u32(0);
        b.put_slice(b"vide");
        b.put_slice(&[0; 12]);
        b.put_slice(b"VideoHandler\0");
    });
}

fn write_dinf(buf: &mut BytesMut) {
    write_box(buf, b"dinf", |b| {
        write_full_box(b, b"dref", 0, 0, |b| {
            b.put_u32(1);
            // self-contained
            write_full_box(b, b"url ", 0, 1, |_| {});
        });
    });
}

fn put_matrix(buf: &mut BytesMut) {
    for value in IDENTITY_MATRIX {
        buf.put_u32(value);
    }
}

/// Write a box, patching its size once the body is known
fn write_box(buf: &mut BytesMut, kind: &[u8; 4], body: impl FnOnce(&mut BytesMut)) {
    let start = buf.len();
    buf.put_u32(0);
    buf.put_slice(kind);
    body(buf);
    let size = (buf.len() - start) as u32;
    buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

fn write_full_box(
    buf: &mut BytesMut,
    kind: &[u8; 4],
    version: u8,
    flags: u32,
    body: impl FnOnce(&mut BytesMut),
) {
    write_box(buf, kind, |b| {
        b.put_u32(((version as u32) << 24) | (flags & 0x00FF_FFFF));
        body(b);
    });
}
