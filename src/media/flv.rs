//! FLV tag framing
//!
//! Frames are exposed as FLV tags by wrapping their AVCC body in a tag header
//! and a trailing previous-tag-size field.
//!
//! FLV Tag Structure:
//! ```text
//! +--------+-------------+-----------+-------------+---------+----------------+
//! | Type(1)| DataSize(3) | TS(3+1)   | StreamID(3) | Data(N) | PrevSize(4)    |
//! +--------+-------------+-----------+-------------+---------+----------------+
//! ```
//!
//! The timestamp is stored as the lower 24 bits followed by an extension byte
//! holding bits 24..32. `PrevSize` is `DataSize + 11`.
//!
//! Video Data (first byte of the AVCC body):
//! ```text
//! +----------+----------+
//! | FrameType| CodecID  | CodecData...
//! | (4 bits) | (4 bits) |
//! +----------+----------+
//! ```
//!
//! Audio Data (first byte of the AVCC body):
//! ```text
//! +-----------+----------+----------+----------+
//! |SoundFormat|SoundRate |SoundSize |SoundType | AudioData...
//! | (4 bits)  | (2 bits) | (1 bit)  | (1 bit)  |
//! +-----------+----------+----------+----------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};

/// Size of the tag header
pub const TAG_HEADER_SIZE: usize = 11;

/// Size of the trailing previous-tag-size field
pub const PREV_TAG_SIZE: usize = 4;

/// Size of a reusable header+trailer buffer
pub const TAG_ENVELOPE_SIZE: usize = TAG_HEADER_SIZE + PREV_TAG_SIZE;

/// FLV tag type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlvTagType {
    Audio = 8,
    Video = 9,
    Script = 18,
}

/// Video frame type (upper 4 bits of first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFrameType {
    /// Keyframe (for AVC, a seekable frame)
    Keyframe = 1,
    /// Inter frame (for AVC, a non-seekable frame)
    InterFrame = 2,
    /// Disposable inter frame (H.263 only)
    DisposableInterFrame = 3,
    /// Generated keyframe (reserved for server use)
    GeneratedKeyframe = 4,
    /// Video info/command frame
    VideoInfoFrame = 5,
}

impl VideoFrameType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match (b >> 4) & 0x0F {
            1 => Some(VideoFrameType::Keyframe),
            2 => Some(VideoFrameType::InterFrame),
            3 => Some(VideoFrameType::DisposableInterFrame),
            4 => Some(VideoFrameType::GeneratedKeyframe),
            5 => Some(VideoFrameType::VideoInfoFrame),
            _ => None,
        }
    }

    pub fn is_keyframe(&self) -> bool {
        matches!(
            self,
            VideoFrameType::Keyframe | VideoFrameType::GeneratedKeyframe
        )
    }
}

/// Video codec ID (lower 4 bits of first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    /// Sorenson H.263
    SorensonH263 = 2,
    /// Screen video
    ScreenVideo = 3,
    /// VP6
    Vp6 = 4,
    /// VP6 with alpha
    Vp6Alpha = 5,
    /// Screen video v2
    ScreenVideoV2 = 6,
    /// AVC (H.264)
    Avc = 7,
    /// HEVC (H.265)
    Hevc = 12,
    /// AV1
    Av1 = 13,
}

impl VideoCodec {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x0F {
            2 => Some(VideoCodec::SorensonH263),
            3 => Some(VideoCodec::ScreenVideo),
            4 => Some(VideoCodec::Vp6),
            5 => Some(VideoCodec::Vp6Alpha),
            6 => Some(VideoCodec::ScreenVideoV2),
            7 => Some(VideoCodec::Avc),
            12 => Some(VideoCodec::Hevc),
            13 => Some(VideoCodec::Av1),
            _ => None,
        }
    }
}

/// Audio format (upper 4 bits of first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    /// Linear PCM, platform endian
    LinearPcmPlatform = 0,
    /// ADPCM
    Adpcm = 1,
    /// MP3
    Mp3 = 2,
    /// Linear PCM, little endian
    LinearPcmLe = 3,
    /// Nellymoser 16kHz mono
    Nellymoser16kMono = 4,
    /// Nellymoser 8kHz mono
    Nellymoser8kMono = 5,
    /// Nellymoser
    Nellymoser = 6,
    /// G.711 A-law
    G711ALaw = 7,
    /// G.711 mu-law
    G711MuLaw = 8,
    /// AAC
    Aac = 10,
    /// Speex
    Speex = 11,
    /// MP3 8kHz
    Mp38k = 14,
    /// Device-specific sound
    DeviceSpecific = 15,
}

impl AudioFormat {
    pub fn from_byte(b: u8) -> Option<Self> {
        match (b >> 4) & 0x0F {
            0 => Some(AudioFormat::LinearPcmPlatform),
            1 => Some(AudioFormat::Adpcm),
            2 => Some(AudioFormat::Mp3),
            3 => Some(AudioFormat::LinearPcmLe),
            4 => Some(AudioFormat::Nellymoser16kMono),
            5 => Some(AudioFormat::Nellymoser8kMono),
            6 => Some(AudioFormat::Nellymoser),
            7 => Some(AudioFormat::G711ALaw),
            8 => Some(AudioFormat::G711MuLaw),
            10 => Some(AudioFormat::Aac),
            11 => Some(AudioFormat::Speex),
            14 => Some(AudioFormat::Mp38k),
            15 => Some(AudioFormat::DeviceSpecific),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AudioFormat::Aac => "aac",
            AudioFormat::G711ALaw => "pcma",
            AudioFormat::G711MuLaw => "pcmu",
            AudioFormat::Mp3 | AudioFormat::Mp38k => "mp3",
            AudioFormat::Speex => "speex",
            _ => "audio",
        }
    }
}

/// Write the tag header followed by the previous-tag-size trailer into `buf`.
///
/// `buf` is cleared first; on return it holds exactly `TAG_ENVELOPE_SIZE` bytes.
pub fn write_envelope(buf: &mut BytesMut, tag_type: FlvTagType, timestamp: u32, data_size: usize) {
    let size = data_size as u32;
    buf.clear();
    buf.put_u8(tag_type as u8);
    buf.put_uint(size as u64 & 0xFF_FFFF, 3);
    buf.put_uint(timestamp as u64 & 0xFF_FFFF, 3);
    buf.put_u8((timestamp >> 24) as u8);
    buf.put_uint(0, 3); // stream id
    buf.put_u32(size.wrapping_add(TAG_HEADER_SIZE as u32));
}

/// Build a complete tag as `[header, body, trailer]` with a fresh envelope buffer
pub fn tag_buffers(tag_type: FlvTagType, timestamp: u32, body: Bytes) -> Vec<Bytes> {
    let mut envelope = BytesMut::with_capacity(TAG_ENVELOPE_SIZE);
    write_envelope(&mut envelope, tag_type, timestamp, body.len());
    let envelope = envelope.freeze();
    vec![
        envelope.slice(..TAG_HEADER_SIZE),
        body,
        envelope.slice(TAG_HEADER_SIZE..),
    ]
}

/// Concatenate scatter/gather buffers into one contiguous tag
pub fn concat(buffers: &[Bytes]) -> Bytes {
    let mut out = BytesMut::with_capacity(buffers.iter().map(Bytes::len).sum());
    for b in buffers {
        out.extend_from_slice(b);
    }
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_type_bytes() {
        assert_eq!(FlvTagType::Audio as u8, 8);
        assert_eq!(FlvTagType::Video as u8, 9);
        assert_eq!(FlvTagType::Script as u8, 18);
    }

    #[test]
    fn test_video_frame_type() {
        // Keyframe + AVC
        assert_eq!(
            VideoFrameType::from_byte(0x17),
            Some(VideoFrameType::Keyframe)
        );
        assert_eq!(VideoCodec::from_byte(0x17), Some(VideoCodec::Avc));

        // Inter frame + AVC
        assert_eq!(
            VideoFrameType::from_byte(0x27),
            Some(VideoFrameType::InterFrame)
        );
        assert!(VideoFrameType::GeneratedKeyframe.is_keyframe());
        assert!(!VideoFrameType::InterFrame.is_keyframe());
        assert_eq!(VideoFrameType::from_byte(0x60), None);
    }

    #[test]
    fn test_audio_format() {
        assert_eq!(AudioFormat::from_byte(0xAF), Some(AudioFormat::Aac));
        assert_eq!(AudioFormat::from_byte(0x72), Some(AudioFormat::G711ALaw));
        assert_eq!(AudioFormat::from_byte(0x82), Some(AudioFormat::G711MuLaw));
        assert_eq!(AudioFormat::from_byte(0x90), None); // 9 is not defined
        assert_eq!(AudioFormat::Aac.name(), "aac");
    }

    #[test]
    fn test_envelope_layout() {
        let mut buf = BytesMut::new();
        write_envelope(&mut buf, FlvTagType::Audio, 0x0102_0304, 0x0A0B0C);

        assert_eq!(
            &buf[..],
            &[
                0x08, 0x0A, 0x0B, 0x0C, // type + size
                0x02, 0x03, 0x04, 0x01, // timestamp + extension
                0x00, 0x00, 0x00, // stream id
                0x00, 0x0A, 0x0B, 0x17, // size + 11
            ]
        );
    }

    #[test]
    fn test_envelope_reuses_buffer() {
        let mut buf = BytesMut::with_capacity(TAG_ENVELOPE_SIZE);
        write_envelope(&mut buf, FlvTagType::Video, 1, 1);
        write_envelope(&mut buf, FlvTagType::Video, 2, 2);

        assert_eq!(buf.len(), TAG_ENVELOPE_SIZE);
        assert_eq!(buf[6], 2);
    }

    #[test]
    fn test_tag_buffers() {
        let body = Bytes::from_static(&[0xAF, 0x00, 0x12, 0x10]);
        let tag = tag_buffers(FlvTagType::Audio, 0, body.clone());

        assert_eq!(tag.len(), 3);
        assert_eq!(&tag[0][..], &[0x08, 0, 0, 4, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(tag[1], body);
        assert_eq!(&tag[2][..], &[0, 0, 0, 15]);
        assert_eq!(concat(&tag).len(), 19);
    }
}
