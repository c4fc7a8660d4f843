//! RTP packet (RFC 3550)
//!
//! ```text
//!  0                   1                   2                   3
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       sequence number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                             SSRC                              |
//! +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
//! |                    CSRC list (CC entries)                     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   extension profile (if X)    |      length in 32-bit words   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, RtpError};

pub const RTP_VERSION: u8 = 2;

/// Header size without CSRC list or extension
pub const RTP_MIN_HEADER_SIZE: usize = 12;

/// Header extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpExtension {
    pub profile: u16,
    /// Extension body, a multiple of 4 bytes on the wire
    pub data: Bytes,
}

/// RTP fixed header plus CSRC list and extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    pub version: u8,
    pub padding: bool,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrc: Vec<u32>,
    pub extension: Option<RtpExtension>,
}

impl Default for RtpHeader {
    fn default() -> Self {
        Self::new(0, 0, 0, 0)
    }
}

impl RtpHeader {
    pub fn new(payload_type: u8, sequence_number: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            version: RTP_VERSION,
            padding: false,
            marker: false,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc: Vec::new(),
            extension: None,
        }
    }

    /// Serialized size in bytes
    pub fn size(&self) -> usize {
        let ext = self
            .extension
            .as_ref()
            .map_or(0, |e| 4 + e.data.len().div_ceil(4) * 4);
        RTP_MIN_HEADER_SIZE + self.csrc.len().min(15) * 4 + ext
    }

    /// Parse a header, leaving `buf` at the first payload byte
    pub fn parse(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < RTP_MIN_HEADER_SIZE {
            return Err(RtpError::BufferTooSmall {
                required: RTP_MIN_HEADER_SIZE,
                available: buf.remaining(),
            }
            .into());
        }

        let first = buf.get_u8();
        let version = first >> 6;
        if version != RTP_VERSION {
            return Err(RtpError::InvalidVersion(version).into());
        }
        let padding = first & 0x20 != 0;
        let has_extension = first & 0x10 != 0;
        let cc = (first & 0x0F) as usize;

        let second = buf.get_u8();
        let mut header = RtpHeader::new(second & 0x7F, buf.get_u16(), buf.get_u32(), buf.get_u32());
        header.padding = padding;
        header.marker = second & 0x80 != 0;

        if buf.remaining() < cc * 4 {
            return Err(RtpError::BufferTooSmall {
                required: cc * 4,
                available: buf.remaining(),
            }
            .into());
        }
        header.csrc = (0..cc).map(|_| buf.get_u32()).collect();

        if has_extension {
            if buf.remaining() < 4 {
                return Err(RtpError::BufferTooSmall {
                    required: 4,
                    available: buf.remaining(),
                }
                .into());
            }
            let profile = buf.get_u16();
            let len = buf.get_u16() as usize * 4;
            if buf.remaining() < len {
                return Err(RtpError::BufferTooSmall {
                    required: len,
                    available: buf.remaining(),
                }
                .into());
            }
            header.extension = Some(RtpExtension {
                profile,
                data: buf.copy_to_bytes(len),
            });
        }

        Ok(header)
    }

    /// Append the serialized header to `buf`
    pub fn write(&self, buf: &mut BytesMut) {
        buf.reserve(self.size());

        let mut first = (self.version & 0x03) << 6;
        if self.padding {
            first |= 0x20;
        }
        if self.extension.is_some() {
            first |= 0x10;
        }
        first |= (self.csrc.len() as u8) & 0x0F;
        buf.put_u8(first);

        let mut second = self.payload_type & 0x7F;
        if self.marker {
            second |= 0x80;
        }
        buf.put_u8(second);

        buf.put_u16(self.sequence_number);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);

        for csrc in self.csrc.iter().take(15) {
            buf.put_u32(*csrc);
        }

        if let Some(ext) = &self.extension {
            let words = ext.data.len().div_ceil(4);
            buf.put_u16(ext.profile);
            buf.put_u16(words as u16);
            buf.put_slice(&ext.data);
            buf.put_bytes(0, words * 4 - ext.data.len());
        }
    }
}

/// One RTP packet with its serialized form
///
/// Immutable once built: the header and payload are only reachable through
/// accessors, so the cached serialization always matches them.
#[derive(Clone, PartialEq, Eq)]
pub struct RtpFrame {
    header: RtpHeader,
    payload: Bytes,
    raw: Bytes,
}

impl RtpFrame {
    /// Build a packet and serialize it
    pub fn new(header: RtpHeader, payload: Bytes) -> Self {
        // Padding is never emitted on packets built here
        let header = RtpHeader {
            padding: false,
            ..header
        };
        let mut buf = BytesMut::with_capacity(header.size() + payload.len());
        header.write(&mut buf);
        buf.extend_from_slice(&payload);
        let raw = buf.freeze();
        Self {
            header,
            payload,
            raw,
        }
    }

    /// Parse a serialized packet. The payload borrows from `raw`.
    pub fn unmarshal(raw: Bytes) -> Result<Self> {
        let mut buf = raw.clone();
        let header = RtpHeader::parse(&mut buf)?;
        let offset = raw.len() - buf.remaining();

        let padding = if header.padding {
            let pad = raw.last().copied().unwrap_or(0) as usize;
            if pad == 0 || pad > buf.remaining() {
                return Err(RtpError::InvalidPadding(pad).into());
            }
            pad
        } else {
            0
        };

        let payload = raw.slice(offset..raw.len() - padding);
        Ok(Self {
            header,
            payload,
            raw,
        })
    }

    pub fn header(&self) -> &RtpHeader {
        &self.header
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Serialized packet
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    pub fn sequence_number(&self) -> u16 {
        self.header.sequence_number
    }

    pub fn timestamp(&self) -> u32 {
        self.header.timestamp
    }

    pub fn marker(&self) -> bool {
        self.header.marker
    }

    pub fn payload_type(&self) -> u8 {
        self.header.payload_type
    }

    pub fn ssrc(&self) -> u32 {
        self.header.ssrc
    }
}

impl fmt::Debug for RtpFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtpFrame")
            .field("pt", &self.header.payload_type)
            .field("seq", &self.header.sequence_number)
            .field("ts", &self.header.timestamp)
            .field("marker", &self.header.marker)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}
