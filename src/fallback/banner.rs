//! Grabber wire format
//!
//! The grabber sends one banner when a client connects:
//!
//! ```text
//! offset  size  field
//!      0     1  version
//!      1     1  banner length (>= 24)
//!      2     4  pid                    (u32 LE)
//!      6     4  real width             (u32 LE)
//!     10     4  real height            (u32 LE)
//!     14     4  virtual width          (u32 LE)
//!     18     4  virtual height         (u32 LE)
//!     22     1  orientation            (x 90 degrees)
//!     23     1  quirks bitfield
//! ```
//!
//! followed by frames, each a u32 LE length and that many bytes of JPEG.

use bytes::Buf;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::codec::{FramedRead, LengthDelimitedCodec};

use crate::error::{GrabberError, Result};

/// Smallest banner the grabber sends
pub const BANNER_SIZE: usize = 24;

const QUIRK_DUMB: u8 = 1;
const QUIRK_ALWAYS_UPRIGHT: u8 = 2;
const QUIRK_TEAR: u8 = 4;

/// Rendering hints for the viewer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Quirks {
    /// Frames are sent whether or not the screen changed
    pub dumb: bool,
    /// Frames are always upright, the viewer must not rotate them
    pub always_upright: bool,
    /// Frames may tear
    pub tear: bool,
}

impl Quirks {
    pub fn from_bits(bits: u8) -> Self {
        Self {
            dumb: bits & QUIRK_DUMB != 0,
            always_upright: bits & QUIRK_ALWAYS_UPRIGHT != 0,
            tear: bits & QUIRK_TEAR != 0,
        }
    }
}

/// Banner record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Banner {
    pub version: u8,
    pub pid: u32,
    pub real_width: u32,
    pub real_height: u32,
    pub virtual_width: u32,
    pub virtual_height: u32,
    /// Degrees
    pub orientation: u16,
    pub quirks: Quirks,
}

impl Banner {
    pub fn parse(data: &[u8]) -> std::result::Result<Self, GrabberError> {
        if data.len() < BANNER_SIZE {
            return Err(GrabberError::InvalidBanner("truncated"));
        }
        if (data[1] as usize) < BANNER_SIZE {
            return Err(GrabberError::InvalidBanner("declared length too small"));
        }

        let mut buf = &data[2..];
        let pid = buf.get_u32_le();
        let real_width = buf.get_u32_le();
        let real_height = buf.get_u32_le();
        let virtual_width = buf.get_u32_le();
        let virtual_height = buf.get_u32_le();
        let orientation = buf.get_u8() as u16 * 90;
        let quirks = Quirks::from_bits(buf.get_u8());

        Ok(Self {
            version: data[0],
            pid,
            real_width,
            real_height,
            virtual_width,
            virtual_height,
            orientation,
            quirks,
        })
    }
}

/// Read the banner off a freshly connected socket
///
/// Bytes past the declared banner length are skipped; frames start right
/// after.
pub async fn read_banner<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Banner> {
    let mut head = [0u8; 2];
    reader.read_exact(&mut head).await?;

    let declared = head[1] as usize;
    if declared < BANNER_SIZE {
        return Err(GrabberError::InvalidBanner("declared length too small").into());
    }

    let mut data = vec![0u8; declared];
    data[..2].copy_from_slice(&head);
    reader.read_exact(&mut data[2..]).await?;

    Ok(Banner::parse(&data)?)
}

/// Length-prefixed image stream following the banner
pub type ImageFramer<R> = FramedRead<R, LengthDelimitedCodec>;

/// Frame images out of `reader`, rejecting frames over `max_frame_size`
pub fn image_framer<R: AsyncRead>(reader: R, max_frame_size: usize) -> ImageFramer<R> {
    FramedRead::new(reader, image_codec(max_frame_size))
}

fn image_codec(max_frame_size: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .little_endian()
        .length_field_length(4)
        .max_frame_length(max_frame_size)
        .new_codec()
}

#[cfg(test)]
pub(crate) fn encode_banner(banner: &Banner) -> Vec<u8> {
    let mut out = vec![1u8, BANNER_SIZE as u8];
    out.extend_from_slice(&banner.pid.to_le_bytes());
    out.extend_from_slice(&banner.real_width.to_le_bytes());
    out.extend_from_slice(&banner.real_height.to_le_bytes());
    out.extend_from_slice(&banner.virtual_width.to_le_bytes());
    out.extend_from_slice(&banner.virtual_height.to_le_bytes());
    out.push((banner.orientation / 90) as u8);
    let quirks = &banner.quirks;
    out.push(
        (quirks.dumb as u8) * QUIRK_DUMB
            | (quirks.always_upright as u8) * QUIRK_ALWAYS_UPRIGHT
            | (quirks.tear as u8) * QUIRK_TEAR,
    );
    out
}

#[cfg(test)]
pub(crate) fn encode_frame(jpeg: &[u8]) -> Vec<u8> {
    let mut out = (jpeg.len() as u32).to_le_bytes().to_vec();
    out.extend_from_slice(jpeg);
    out
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use futures::StreamExt;
    use tokio_util::codec::Decoder;

    use super::*;

    const RAW: [u8; 24] = [
        0x01, 0x18, // version 1, length 24
        0x39, 0x30, 0x00, 0x00, // pid 12345
        0x38, 0x04, 0x00, 0x00, // 1080
        0x80, 0x07, 0x00, 0x00, // 1920
        0xD0, 0x02, 0x00, 0x00, // 720
        0x00, 0x05, 0x00, 0x00, // 1280
        0x01, // 90 degrees
        0x06, // always upright + tear
    ];

    #[test]
    fn test_parse_banner() {
        let banner = Banner::parse(&RAW).unwrap();
        assert_eq!(banner.version, 1);
        assert_eq!(banner.pid, 12345);
        assert_eq!((banner.real_width, banner.real_height), (1080, 1920));
        assert_eq!((banner.virtual_width, banner.virtual_height), (720, 1280));
        assert_eq!(banner.orientation, 90);
        assert_eq!(
            banner.quirks,
            Quirks {
                dumb: false,
                always_upright: true,
                tear: true,
            }
        );
    }

    #[test]
    fn test_reject_short_banner() {
        assert!(matches!(
            Banner::parse(&RAW[..20]),
            Err(GrabberError::InvalidBanner(_))
        ));

        let mut bad = RAW;
        bad[1] = 10;
        assert!(matches!(
            Banner::parse(&bad),
            Err(GrabberError::InvalidBanner(_))
        ));
    }

    #[test]
    fn test_quirks_json() {
        let json = serde_json::to_string(&Quirks::from_bits(QUIRK_DUMB)).unwrap();
        assert_eq!(json, r#"{"dumb":true,"alwaysUpright":false,"tear":false}"#);
    }

    #[tokio::test]
    async fn test_read_banner_then_frames() {
        let mut stream = RAW.to_vec();
        stream.extend_from_slice(&encode_frame(&[0xFF, 0xD8, 0xAA, 0xFF, 0xD9]));
        stream.extend_from_slice(&encode_frame(&[0xFF, 0xD8, 0xBB, 0xFF, 0xD9]));

        let mut reader = &stream[..];
        let banner = read_banner(&mut reader).await.unwrap();
        assert_eq!(banner.virtual_width, 720);

        let frames: Vec<_> = image_framer(reader, 1024).collect().await;
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0].as_ref().unwrap()[..], &[0xFF, 0xD8, 0xAA, 0xFF, 0xD9]);
        assert_eq!(&frames[1].as_ref().unwrap()[..], &[0xFF, 0xD8, 0xBB, 0xFF, 0xD9]);
    }

    #[tokio::test]
    async fn test_longer_banner_is_skipped() {
        let mut stream = RAW.to_vec();
        stream[1] = 28;
        stream.extend_from_slice(&[0xEE; 4]);
        stream.extend_from_slice(&encode_frame(&[0xFF, 0xD8]));

        let mut reader = &stream[..];
        read_banner(&mut reader).await.unwrap();
        let frames: Vec<_> = image_framer(reader, 1024).collect().await;
        assert_eq!(&frames[0].as_ref().unwrap()[..], &[0xFF, 0xD8]);
    }

    #[tokio::test]
    async fn test_banner_in_fragmented_reads() {
        let frame = encode_frame(&[0xFF, 0xD8, 0x01, 0xFF, 0xD9]);
        let mut mock = tokio_test::io::Builder::new()
            .read(&RAW[..1])
            .read(&RAW[1..10])
            .read(&RAW[10..])
            .read(&frame[..3])
            .read(&frame[3..])
            .build();

        let banner = read_banner(&mut mock).await.unwrap();
        assert_eq!(banner.pid, 12345);

        let frames: Vec<_> = image_framer(mock, 1024).collect().await;
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].as_ref().unwrap()[..], &[0xFF, 0xD8, 0x01, 0xFF, 0xD9]);
    }

    #[test]
    fn test_frame_split_across_reads() {
        let mut codec = image_codec(1024);
        let frame = encode_frame(&[1, 2, 3, 4, 5]);

        let mut buf = BytesMut::from(&frame[..3]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&frame[3..]);
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut codec = image_codec(16);
        let mut buf = BytesMut::from(&encode_frame(&[0u8; 32])[..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_encode_banner_round_trip() {
        let banner = Banner::parse(&RAW).unwrap();
        assert_eq!(encode_banner(&banner), RAW.to_vec());
    }
}
