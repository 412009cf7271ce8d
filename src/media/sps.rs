//! Sequence parameter set parsing
//!
//! Only the fields needed to recover the picture geometry are interpreted;
//! everything before them is read just far enough to stay aligned.
//!
//! ```text
//! width  = (pic_width_in_mbs_minus1 + 1) * 16 - (crop_left + crop_right) * CropUnitX
//! height = (2 - frame_mbs_only) * (pic_height_in_map_units_minus1 + 1) * 16
//!          - (crop_top + crop_bottom) * CropUnitY
//! ```
//!
//! `CropUnitX`/`CropUnitY` depend on chroma subsampling and on whether the
//! stream may carry field pictures.

use crate::error::{MediaError, Result};

/// Profiles whose SPS carries chroma format, bit depth and scaling matrices
const HIGH_PROFILES: [u8; 13] = [100, 110, 122, 244, 44, 83, 86, 118, 128, 138, 139, 134, 135];

/// Geometry and identification fields from an SPS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpsInfo {
    pub profile_idc: u8,
    pub constraint_flags: u8,
    pub level_idc: u8,
    /// 0 = monochrome, 1 = 4:2:0, 2 = 4:2:2, 3 = 4:4:4
    pub chroma_format_idc: u32,
    pub separate_colour_plane: bool,
    /// False when the stream may contain field pictures
    pub frame_mbs_only: bool,
    /// Cropped picture width in pixels
    pub width: u32,
    /// Cropped picture height in pixels
    pub height: u32,
}

impl SpsInfo {
    /// Parse an SPS NAL unit (header byte included, no start code)
    pub fn parse(nal: &[u8]) -> Result<Self> {
        if nal.len() < 4 {
            return Err(MediaError::TruncatedSps.into());
        }
        if nal[0] & 0x1F != 7 {
            return Err(MediaError::InvalidSps("not an SPS unit").into());
        }

        let rbsp = strip_emulation_prevention(&nal[1..]);
        let mut r = BitReader::new(&rbsp);

        let profile_idc = r.read_bits(8)? as u8;
        let constraint_flags = r.read_bits(8)? as u8;
        let level_idc = r.read_bits(8)? as u8;
        let _seq_parameter_set_id = r.read_ue()?;

        let mut chroma_format_idc = 1;
        let mut separate_colour_plane = false;

        if HIGH_PROFILES.contains(&profile_idc) {
            chroma_format_idc = r.read_ue()?;
            if chroma_format_idc > 3 {
                return Err(MediaError::InvalidSps("chroma_format_idc out of range").into());
            }
            if chroma_format_idc == 3 {
                separate_colour_plane = r.read_bit()?;
            }
            let _bit_depth_luma_minus8 = r.read_ue()?;
            let _bit_depth_chroma_minus8 = r.read_ue()?;
            let _qpprime_y_zero_transform_bypass = r.read_bit()?;

            if r.read_bit()? {
                let lists = if chroma_format_idc == 3 { 12 } else { 8 };
                for i in 0..lists {
                    if r.read_bit()? {
                        skip_scaling_list(&mut r, if i < 6 { 16 } else { 64 })?;
                    }
                }
            }
        }

        let _log2_max_frame_num_minus4 = r.read_ue()?;
        match r.read_ue()? {
            0 => {
                let _log2_max_pic_order_cnt_lsb_minus4 = r.read_ue()?;
            }
            1 => {
                let _delta_pic_order_always_zero = r.read_bit()?;
                let _offset_for_non_ref_pic = r.read_se()?;
                let _offset_for_top_to_bottom_field = r.read_se()?;
                let cycle = r.read_ue()?;
                if cycle > 255 {
                    return Err(MediaError::InvalidSps("pic order cycle too long").into());
                }
                for _ in 0..cycle {
                    let _offset_for_ref_frame = r.read_se()?;
                }
            }
            2 => {}
            _ => return Err(MediaError::InvalidSps("pic_order_cnt_type out of range").into()),
        }

        let _max_num_ref_frames = r.read_ue()?;
        let _gaps_in_frame_num_allowed = r.read_bit()?;
        let width_mbs = u64::from(r.read_ue()?) + 1;
        let height_map_units = u64::from(r.read_ue()?) + 1;
        let frame_mbs_only = r.read_bit()?;
        if !frame_mbs_only {
            let _mb_adaptive_frame_field = r.read_bit()?;
        }
        let _direct_8x8_inference = r.read_bit()?;

        let (crop_left, crop_right, crop_top, crop_bottom) = if r.read_bit()? {
            (
                u64::from(r.read_ue()?),
                u64::from(r.read_ue()?),
                u64::from(r.read_ue()?),
                u64::from(r.read_ue()?),
            )
        } else {
            (0, 0, 0, 0)
        };

        // Computed in u64; exp-Golomb fields reach 2^32 on corrupt input
        let field_factor: u64 = if frame_mbs_only { 1 } else { 2 };
        let chroma_array_type = if separate_colour_plane {
            0
        } else {
            chroma_format_idc
        };
        let (crop_unit_x, crop_unit_y) = match chroma_array_type {
            0 => (1, field_factor),
            1 => (2, 2 * field_factor),
            2 => (2, field_factor),
            _ => (1, field_factor),
        };

        let full_width = width_mbs * 16;
        let full_height = field_factor * height_map_units * 16;
        let width = full_width
            .checked_sub((crop_left + crop_right) * crop_unit_x)
            .ok_or(MediaError::InvalidSps("horizontal crop exceeds width"))?;
        let height = full_height
            .checked_sub((crop_top + crop_bottom) * crop_unit_y)
            .ok_or(MediaError::InvalidSps("vertical crop exceeds height"))?;
        let width = u32::try_from(width)
            .map_err(|_| MediaError::InvalidSps("dimensions out of range"))?;
        let height = u32::try_from(height)
            .map_err(|_| MediaError::InvalidSps("dimensions out of range"))?;

        Ok(SpsInfo {
            profile_idc,
            constraint_flags,
            level_idc,
            chroma_format_idc,
            separate_colour_plane,
            frame_mbs_only,
            width,
            height,
        })
    }
}

fn skip_scaling_list(r: &mut BitReader<'_>, size: usize) -> Result<()> {
    let mut last_scale: i64 = 8;
    let mut next_scale: i64 = 8;
    for _ in 0..size {
        if next_scale != 0 {
            let delta = r.read_se()? as i64;
            next_scale = (last_scale + delta + 256) % 256;
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
    Ok(())
}

/// Remove `03` from every `00 00 03` sequence
pub fn strip_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0;
    for &b in data {
        if zeros >= 2 && b == 0x03 {
            zeros = 0;
            continue;
        }
        zeros = if b == 0 { zeros + 1 } else { 0 };
        out.push(b);
    }
    out
}

/// MSB-first bit reader with exp-Golomb support
struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read_bit(&mut self) -> Result<bool> {
        let byte = self
            .data
            .get(self.pos / 8)
            .ok_or(MediaError::TruncatedSps)?;
        let bit = (byte >> (7 - (self.pos % 8))) & 1;
        self.pos += 1;
        Ok(bit == 1)
    }

    fn read_bits(&mut self, n: u32) -> Result<u32> {
        let mut value = 0u32;
        for _ in 0..n {
            value = (value << 1) | self.read_bit()? as u32;
        }
        Ok(value)
    }

    /// Unsigned exp-Golomb
    fn read_ue(&mut self) -> Result<u32> {
        let mut leading_zeros = 0;
        while !self.read_bit()? {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return Err(MediaError::InvalidSps("exp-Golomb code too long").into());
            }
        }
        let suffix = self.read_bits(leading_zeros)?;
        Ok(((1u64 << leading_zeros) - 1 + suffix as u64) as u32)
    }

    /// Signed exp-Golomb
    fn read_se(&mut self) -> Result<i32> {
        let k = self.read_ue()? as i64;
        let value = if k % 2 == 1 { (k + 1) / 2 } else { -(k / 2) };
        Ok(value as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sample {
        name: &'static str,
        sps: &'static [u8],
        width: u32,
        height: u32,
        frame_mbs_only: bool,
    }

    const CORPUS: &[Sample] = &[
        Sample {
            name: "baseline 720p",
            sps: &[0x67, 0x42, 0xC0, 0x1F, 0xEC, 0xA0, 0x28, 0x02, 0xDC, 0x80],
            width: 1280,
            height: 720,
            frame_mbs_only: true,
        },
        Sample {
            name: "high 1080p, bottom crop",
            sps: &[
                0x67, 0x64, 0x00, 0x28, 0xAC, 0xD9, 0x40, 0x78, 0x02, 0x27, 0xE5, 0x40,
            ],
            width: 1920,
            height: 1080,
            frame_mbs_only: true,
        },
        Sample {
            name: "main 576 interlaced, mbaff",
            sps: &[0x67, 0x4D, 0x40, 0x1E, 0xEC, 0xA0, 0x5A, 0x12, 0x64],
            width: 720,
            height: 576,
            frame_mbs_only: false,
        },
        Sample {
            name: "high 4:4:4, right crop",
            sps: &[
                0x67, 0xF4, 0x00, 0x32, 0x91, 0x9B, 0x28, 0x08, 0x80, 0x25, 0xBC, 0x4E, 0x80,
            ],
            width: 1080,
            height: 2400,
            frame_mbs_only: true,
        },
        Sample {
            name: "high, scaling matrices, poc type 1, phone crop",
            sps: &[
                0x67, 0x64, 0x00, 0x2A, 0xAD, 0x84, 0x02, 0x3A, 0x21, 0x84, 0xFF, 0x83, 0xFF,
                0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFE, 0x1A, 0x80, 0x00, 0x27, 0x10, 0x40,
                0x00, 0x27, 0x10, 0x0C, 0x00, 0x07, 0x53, 0x00, 0x00, 0x0E, 0xA6, 0x12, 0x80,
                0x88, 0x02, 0x4F, 0xCB, 0x3A,
            ],
            width: 1080,
            height: 2340,
            frame_mbs_only: true,
        },
        Sample {
            name: "high 1080 interlaced, bottom crop",
            sps: &[
                0x67, 0x64, 0x00, 0x28, 0xAC, 0xD9, 0x40, 0x78, 0x04, 0x47, 0xDA,
            ],
            width: 1920,
            height: 1080,
            frame_mbs_only: false,
        },
        Sample {
            name: "4:4:4 separate colour planes, crop on all sides",
            sps: &[
                0x67, 0xF4, 0x00, 0x1E, 0x93, 0x9B, 0x28, 0x14, 0x07, 0xBB, 0x69, 0x20,
            ],
            width: 636,
            height: 478,
            frame_mbs_only: true,
        },
        Sample {
            name: "main with emulation prevention bytes",
            sps: &[
                0x67, 0x4D, 0x40, 0x1F, 0xD0, 0x00, 0x03, 0x78, 0x00, 0x00, 0x03, 0x01, 0xBC,
                0x01, 0x40, 0x00, 0x1B, 0xC0, 0x02, 0x80, 0xA0, 0x0B, 0x7F, 0xA0,
            ],
            width: 1280,
            height: 720,
            frame_mbs_only: true,
        },
    ];

    #[test]
    fn test_geometry_corpus() {
        for sample in CORPUS {
            let info = SpsInfo::parse(sample.sps)
                .unwrap_or_else(|e| panic!("{}: {}", sample.name, e));
            assert_eq!(
                (info.width, info.height),
                (sample.width, sample.height),
                "{}",
                sample.name
            );
            assert_eq!(info.frame_mbs_only, sample.frame_mbs_only, "{}", sample.name);
        }
    }

    #[test]
    fn test_identification_fields() {
        let info = SpsInfo::parse(CORPUS[1].sps).unwrap();
        assert_eq!(info.profile_idc, 100);
        assert_eq!(info.constraint_flags, 0);
        assert_eq!(info.level_idc, 40);
        assert_eq!(info.chroma_format_idc, 1);

        let info = SpsInfo::parse(CORPUS[6].sps).unwrap();
        assert_eq!(info.chroma_format_idc, 3);
        assert!(info.separate_colour_plane);
    }

    #[test]
    fn test_strip_emulation_prevention() {
        assert_eq!(
            strip_emulation_prevention(&[0x00, 0x00, 0x03, 0x01, 0x00, 0x00, 0x03, 0x00]),
            vec![0x00, 0x00, 0x01, 0x00, 0x00, 0x00]
        );
        assert_eq!(strip_emulation_prevention(&[0x00, 0x03, 0x00]), vec![0x00, 0x03, 0x00]);
    }

    #[test]
    fn test_exp_golomb() {
        // 1 | 010 | 011 | 00100 | 00101
        let data = [0b1010_0110, 0b0100_0010, 0b1000_0000];
        let mut r = BitReader::new(&data);
        assert_eq!(r.read_ue().unwrap(), 0);
        assert_eq!(r.read_ue().unwrap(), 1);
        assert_eq!(r.read_ue().unwrap(), 2);
        assert_eq!(r.read_se().unwrap(), 2);
        assert_eq!(r.read_se().unwrap(), -2);
    }

    #[test]
    fn test_truncated_sps() {
        let sps = CORPUS[1].sps;
        assert!(SpsInfo::parse(&sps[..6]).is_err());
        assert!(SpsInfo::parse(&[0x67, 0x42]).is_err());
    }

    /// Pack a bit string ('0'/'1', spaces ignored) into bytes, zero padded
    fn pack(bits: &str) -> Vec<u8> {
        let bits: Vec<u8> = bits.bytes().filter(|b| *b != b' ').map(|b| b - b'0').collect();
        bits.chunks(8)
            .map(|chunk| {
                chunk
                    .iter()
                    .enumerate()
                    .fold(0u8, |byte, (i, bit)| byte | (bit << (7 - i)))
            })
            .collect()
    }

    #[test]
    fn test_oversized_dimensions_rejected() {
        // sps_id 0, log2_max_frame_num 0, poc type 2, refs 0, no gaps,
        // pic_width_in_mbs_minus1 = 2^28 - 1, height 1 mb, frame mbs only
        let width_minus1 = format!("{}1{}", "0".repeat(28), "0".repeat(28));
        let bits = format!("1 1 011 1 0 {} 1 1 1 0 0 1", width_minus1);
        let mut sps = vec![0x67, 0x42, 0x00, 0x1F];
        sps.extend(pack(&bits));

        let err = SpsInfo::parse(&sps).unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Media(MediaError::InvalidSps("dimensions out of range"))
        ));
    }

    #[test]
    fn test_oversized_crop_rejected() {
        // 1x1 mb frame with a crop of 2^31 - 1 units on the left
        let crop = format!("{}1{}", "0".repeat(31), "0".repeat(31));
        let bits = format!("1 1 011 1 0 1 1 1 1 1 {} 1 1 1 0 1", crop);
        let mut sps = vec![0x67, 0x42, 0x00, 0x1F];
        sps.extend(pack(&bits));

        let err = SpsInfo::parse(&sps).unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Media(MediaError::InvalidSps("horizontal crop exceeds width"))
        ));
    }

    #[test]
    fn test_rejects_non_sps() {
        assert!(SpsInfo::parse(&[0x68, 0xCE, 0x38, 0x80]).is_err());
    }
}
