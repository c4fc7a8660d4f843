//! AAC framing
//!
//! AAC reaches a track in one of three shapes:
//! - AVCC frames: `[0xAF, packet_type, ...]` where packet type 0 carries the
//!   AudioSpecificConfig and 1 carries a raw access unit
//! - ADTS streams: the 7-byte ADTS header is translated into an AudioSpecificConfig
//! - RTP (RFC 3640, AAC-hbr): an AU-header section followed by access units
//!
//! RFC 3640 payload:
//! ```text
//! +---------------------+------------------------+------------------+
//! | AU-headers-length   | AU-header (16 bits)... | AU data...       |
//! | (16 bits, in bits)  | size(13) | index(3)    |                  |
//! +---------------------+------------------------+------------------+
//! ```
//!
//! An access unit larger than one packet is fragmented; every fragment repeats the
//! AU-header section carrying the full AU size.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{MediaError, Result, RtpError};

/// RTP payload type conventionally used for AAC
pub const AAC_PAYLOAD_TYPE: u8 = 97;

/// AVCC header of a raw AAC frame
pub const AAC_AVCC_HEAD: [u8; 2] = [0xAF, 0x01];

/// Size of an AU-header section with one AU-header
pub const AU_HEADER_SECTION_SIZE: usize = 4;

/// Standard sampling frequencies by index
pub const SAMPLING_FREQUENCIES: [u32; 16] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350, 0, 0,
    0,
];

/// AAC packet type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AacPacketType {
    /// Sequence header (AudioSpecificConfig)
    SequenceHeader = 0,
    /// Raw AAC frame data
    Raw = 1,
}

impl AacPacketType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(AacPacketType::SequenceHeader),
            1 => Some(AacPacketType::Raw),
            _ => None,
        }
    }
}

/// AAC profile (audio object type)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AacProfile {
    Main = 1,
    /// Low Complexity, by far the most common
    Lc = 2,
    Ssr = 3,
    Ltp = 4,
    /// HE-AAC
    Sbr = 5,
    Scalable = 6,
}

impl AacProfile {
    pub fn from_object_type(ot: u8) -> Option<Self> {
        match ot {
            1 => Some(AacProfile::Main),
            2 => Some(AacProfile::Lc),
            3 => Some(AacProfile::Ssr),
            4 => Some(AacProfile::Ltp),
            5 => Some(AacProfile::Sbr),
            6 => Some(AacProfile::Scalable),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AacProfile::Main => "AAC Main",
            AacProfile::Lc => "AAC LC",
            AacProfile::Ssr => "AAC SSR",
            AacProfile::Ltp => "AAC LTP",
            AacProfile::Sbr => "HE-AAC",
            AacProfile::Scalable => "AAC Scalable",
        }
    }
}

/// Decoder parameters carried by an AudioSpecificConfig
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSpecificConfig {
    /// Audio object type (profile)
    pub audio_object_type: u8,
    pub sampling_frequency_index: u8,
    /// Sampling frequency in Hz
    pub sampling_frequency: u32,
    /// Channel configuration (1=mono, 2=stereo, etc.)
    pub channel_configuration: u8,
    /// The config bytes as received
    pub raw: Bytes,
}

impl AudioSpecificConfig {
    /// Parse the first two config bytes
    pub fn parse(data: Bytes) -> Result<Self> {
        if data.len() < 2 {
            return Err(MediaError::DecoderConfigTooShort(data.len()).into());
        }

        let b0 = data[0];
        let b1 = data[1];

        let sampling_frequency_index = ((b0 & 0x07) << 1) | (b1 >> 7);

        Ok(AudioSpecificConfig {
            audio_object_type: (b0 & 0xF8) >> 3,
            sampling_frequency_index,
            sampling_frequency: SAMPLING_FREQUENCIES[sampling_frequency_index as usize],
            channel_configuration: (b1 >> 3) & 0x0F,
            raw: data,
        })
    }

    /// Build a config from a 7-byte ADTS header
    pub fn from_adts(adts: &[u8]) -> Result<Self> {
        if adts.len() < 7 || adts[0] != 0xFF || adts[1] & 0xF0 != 0xF0 {
            return Err(MediaError::InvalidAdtsHeader.into());
        }

        let profile = ((adts[2] & 0xC0) >> 6) + 1;
        let frequency_index = (adts[2] & 0x3C) >> 2;
        let channels = ((adts[2] & 0x01) << 2) | ((adts[3] & 0xC0) >> 6);

        let config = [
            (profile << 3) | ((frequency_index & 0x0E) >> 1),
            ((frequency_index & 0x01) << 7) | (channels << 3),
        ];
        Self::parse(Bytes::copy_from_slice(&config))
    }

    pub fn profile(&self) -> Option<AacProfile> {
        AacProfile::from_object_type(self.audio_object_type)
    }

    /// Channel count
    pub fn channels(&self) -> u8 {
        match self.channel_configuration {
            1..=6 => self.channel_configuration,
            7 => 8,
            _ => 0,
        }
    }

    /// Sequence header in AVCC form: `[0xAF, 0x00, config...]`
    pub fn sequence_header(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(2 + self.raw.len());
        buf.put_u8(AAC_AVCC_HEAD[0]);
        buf.put_u8(AacPacketType::SequenceHeader as u8);
        buf.extend_from_slice(&self.raw);
        buf.freeze()
    }
}

/// AAC body of an AVCC frame
#[derive(Debug, Clone)]
pub enum AacData {
    SequenceHeader(AudioSpecificConfig),

    /// Raw access unit (no ADTS header)
    Frame { data: Bytes },
}

impl AacData {
    /// Parse the body following the sound format byte
    pub fn parse(mut data: Bytes) -> Result<Self> {
        if data.is_empty() {
            return Err(MediaError::InvalidAacPacket.into());
        }

        match AacPacketType::from_byte(data.get_u8()) {
            Some(AacPacketType::SequenceHeader) => {
                Ok(AacData::SequenceHeader(AudioSpecificConfig::parse(data)?))
            }
            Some(AacPacketType::Raw) => Ok(AacData::Frame { data }),
            None => Err(MediaError::InvalidAacPacket.into()),
        }
    }
}

/// AU-header section for one access unit of `len` bytes
pub fn au_header(len: usize) -> [u8; AU_HEADER_SECTION_SIZE] {
    [
        0x00,
        0x10, // one 16-bit AU-header
        ((len & 0x1FE0) >> 5) as u8,
        ((len & 0x1F) << 3) as u8,
    ]
}

/// Split one access unit into RTP payloads of at most `mtu` bytes
pub fn packetize(au: &[u8], mtu: usize) -> Vec<Bytes> {
    let header = au_header(au.len());
    let chunk = mtu.saturating_sub(AU_HEADER_SECTION_SIZE).max(1);

    if au.is_empty() {
        return vec![Bytes::copy_from_slice(&header)];
    }

    au.chunks(chunk)
        .map(|piece| {
            let mut payload = BytesMut::with_capacity(AU_HEADER_SECTION_SIZE + piece.len());
            payload.extend_from_slice(&header);
            payload.extend_from_slice(piece);
            payload.freeze()
        })
        .collect()
}

/// RFC 3640 depacketizer
///
/// Keeps the partial access unit across packets when an AU is fragmented.
#[derive(Debug, Default)]
pub struct AuDepacketizer {
    partial: Option<(usize, BytesMut)>,
}

impl AuDepacketizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a fragmented access unit is waiting for more data
    pub fn in_fragment(&self) -> bool {
        self.partial.is_some()
    }

    /// Drop any partial access unit (after packet loss)
    pub fn reset(&mut self) {
        self.partial = None;
    }

    /// Extract the access units completed by this payload
    pub fn push(&mut self, mut payload: Bytes) -> Result<Vec<Bytes>> {
        if payload.len() < 2 {
            return Err(RtpError::EmptyPayload.into());
        }

        let headers_bits = payload.get_u16() as usize;
        let headers_len = headers_bits.div_ceil(8);
        if payload.len() < headers_len {
            self.partial = None;
            return Err(RtpError::MalformedPayload { codec: "aac" }.into());
        }
        let mut headers = payload.split_to(headers_len);
        let mut data = payload;

        let mut units = Vec::with_capacity(headers_bits / 16);
        while headers.remaining() >= 2 {
            let size = (headers.get_u16() >> 3) as usize;

            // A size mismatch means the held fragment belongs to a lost AU:
            // drop it and read this header as a new AU
            if let Some((expected, mut buf)) = self.partial.take() {
                if expected == size {
                    let take = data.len().min(expected - buf.len());
                    buf.extend_from_slice(&data.split_to(take));
                    if buf.len() == expected {
                        units.push(buf.freeze());
                    } else {
                        self.partial = Some((expected, buf));
                    }
                    continue;
                }
            }

            if data.len() >= size {
                units.push(data.split_to(size));
            } else if headers.remaining() < 2 {
                // Last AU of the packet overflows it: first fragment
                let mut buf = BytesMut::with_capacity(size);
                buf.extend_from_slice(&data.split_to(data.len()));
                self.partial = Some((size, buf));
            } else {
                return Err(RtpError::MalformedPayload { codec: "aac" }.into());
            }
        }

        Ok(units)
    }
}
