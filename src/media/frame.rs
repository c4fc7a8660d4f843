//! Frame model
//!
//! An [`AvFrame`] holds one coded access unit as raw elementary-stream units plus
//! the wire forms derived from them (AVCC, FLV tag, RTP packets). Derived forms
//! are built on demand by the producer and memoized; once a frame is published
//! to a ring it sits behind an `Arc` and is never mutated again.
//!
//! Buffers are `bytes::Bytes`, so handing a form to a subscriber is a
//! reference-count bump, never a copy. When the ring evicts a frame nobody else
//! holds, [`AvFrame::reset`] reclaims the synthesized buffers for the next frame.

use std::fmt;
use std::time::Instant;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{MediaError, Result};
use crate::rtp::RtpFrame;

use super::flv::{
    self, AudioFormat, FlvTagType, VideoCodec, VideoFrameType, TAG_ENVELOPE_SIZE, TAG_HEADER_SIZE,
};
use super::h264::NaluType;

/// Per-frame bookkeeping
#[derive(Debug, Clone, Copy)]
pub struct BaseFrame {
    /// Milliseconds since the previous frame of the track
    pub delta_time: u32,
    /// Milliseconds since the start of the track
    pub abs_time: u32,
    /// When the frame was sealed
    pub received_at: Instant,
    /// Position in the track, starting at 1
    pub sequence: u32,
    /// Input bytes that produced this frame
    pub bytes_in: usize,
}

impl Default for BaseFrame {
    fn default() -> Self {
        Self {
            delta_time: 0,
            abs_time: 0,
            received_at: Instant::now(),
            sequence: 0,
            bytes_in: 0,
        }
    }
}

/// One raw elementary-stream unit
pub trait RawUnit: Clone + Default + fmt::Debug + Send + Sync + 'static {
    /// Append a piece of payload
    fn append(&mut self, piece: Bytes);

    /// Drop the payload, keeping any reusable storage
    fn clear(&mut self);

    /// Payload length in bytes
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of this unit once written in AVCC form
    fn avcc_len(&self) -> usize;

    /// Write this unit in AVCC form
    fn write_avcc(&self, buf: &mut BytesMut);

    /// Write the bare payload
    fn write_payload(&self, buf: &mut BytesMut);
}

/// One audio access unit, stored as a single contiguous slice
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AudioSlice(pub Bytes);

impl AudioSlice {
    pub fn new(data: Bytes) -> Self {
        Self(data)
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }
}

impl fmt::Debug for AudioSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AudioSlice").field(&self.0.len()).finish()
    }
}

impl RawUnit for AudioSlice {
    fn append(&mut self, piece: Bytes) {
        if self.0.is_empty() {
            self.0 = piece;
            return;
        }
        let mut joined = BytesMut::with_capacity(self.0.len() + piece.len());
        joined.extend_from_slice(&self.0);
        joined.extend_from_slice(&piece);
        self.0 = joined.freeze();
    }

    fn clear(&mut self) {
        self.0.clear();
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn avcc_len(&self) -> usize {
        self.0.len()
    }

    fn write_avcc(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&self.0);
    }

    fn write_payload(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&self.0);
    }
}

/// One NAL unit, stored as the ordered pieces it arrived in
///
/// A NAL unit reassembled from FU-A fragments keeps every fragment as its own
/// piece; the first byte of the first piece is the NAL header.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct NaluSlice(pub Vec<Bytes>);

impl NaluSlice {
    pub fn new(nalu: Bytes) -> Self {
        Self(vec![nalu])
    }

    /// The NAL header byte
    pub fn header(&self) -> Option<u8> {
        self.0.iter().find(|p| !p.is_empty()).map(|p| p[0])
    }

    pub fn nalu_type(&self) -> Option<NaluType> {
        self.header().and_then(NaluType::from_byte)
    }

    pub fn pieces(&self) -> &[Bytes] {
        &self.0
    }

    /// Contiguous copy of the NAL unit
    pub fn to_bytes(&self) -> Bytes {
        match self.0.as_slice() {
            [single] => single.clone(),
            _ => flv::concat(&self.0),
        }
    }
}

impl fmt::Debug for NaluSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NaluSlice")
            .field("type", &self.nalu_type())
            .field("len", &self.len())
            .field("pieces", &self.0.len())
            .finish()
    }
}

impl RawUnit for NaluSlice {
    fn append(&mut self, piece: Bytes) {
        self.0.push(piece);
    }

    fn clear(&mut self) {
        self.0.clear();
    }

    fn len(&self) -> usize {
        self.0.iter().map(Bytes::len).sum()
    }

    fn avcc_len(&self) -> usize {
        4 + self.len()
    }

    fn write_avcc(&self, buf: &mut BytesMut) {
        buf.put_u32(self.len() as u32);
        self.write_payload(buf);
    }

    fn write_payload(&self, buf: &mut BytesMut) {
        for piece in &self.0 {
            buf.extend_from_slice(piece);
        }
    }
}

/// One coded access unit and its wire forms
pub struct AvFrame<R> {
    pub base: BaseFrame,
    pub keyframe: bool,
    pub pts: u32,
    pub dts: u32,
    /// Set when reassembly observed packet loss inside this frame
    pub lossy: bool,
    raw: Vec<R>,
    avcc: Option<Bytes>,
    flv: Vec<Bytes>,
    rtp: Vec<RtpFrame>,
    /// Reclaimed AVCC storage
    avcc_buf: BytesMut,
    /// Frozen FLV header+trailer the current tag slices point into
    flv_envelope: Option<Bytes>,
    /// Reclaimed FLV header+trailer storage
    flv_buf: BytesMut,
}

impl<R> Default for AvFrame<R> {
    fn default() -> Self {
        Self {
            base: BaseFrame::default(),
            keyframe: false,
            pts: 0,
            dts: 0,
            lossy: false,
            raw: Vec::new(),
            avcc: None,
            flv: Vec::new(),
            rtp: Vec::new(),
            avcc_buf: BytesMut::new(),
            flv_envelope: None,
            flv_buf: BytesMut::new(),
        }
    }
}

impl<R: RawUnit> AvFrame<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw units of the access unit
    pub fn raw(&self) -> &[R] {
        &self.raw
    }

    /// Last raw unit, for appending continuation fragments
    pub fn last_raw_mut(&mut self) -> Option<&mut R> {
        self.raw.last_mut()
    }

    /// Total raw payload size
    pub fn raw_len(&self) -> usize {
        self.raw.iter().map(RawUnit::len).sum()
    }

    /// AVCC form, if synthesized or supplied
    pub fn avcc(&self) -> Option<&Bytes> {
        self.avcc.as_ref()
    }

    /// FLV tag as `[header, body, trailer]`, empty until synthesized
    pub fn flv(&self) -> &[Bytes] {
        &self.flv
    }

    /// RTP packets, empty until synthesized or received
    pub fn rtp(&self) -> &[RtpFrame] {
        &self.rtp
    }

    pub fn append_raw<I: IntoIterator<Item = R>>(&mut self, units: I) {
        self.raw.extend(units);
    }

    /// Attach an AVCC form the producer already has
    pub fn append_avcc(&mut self, avcc: Bytes) {
        self.avcc = Some(match self.avcc.take() {
            None => avcc,
            Some(prev) => {
                let mut joined = BytesMut::with_capacity(prev.len() + avcc.len());
                joined.extend_from_slice(&prev);
                joined.extend_from_slice(&avcc);
                joined.freeze()
            }
        });
    }

    /// Attach RTP packets the producer already has
    pub fn append_rtp<I: IntoIterator<Item = RtpFrame>>(&mut self, packets: I) {
        self.rtp.extend(packets);
    }

    /// Build the AVCC form as `head` followed by every raw unit in AVCC form.
    ///
    /// Returns the memoized form if one exists.
    pub fn fill_avcc(&mut self, head: &[u8]) -> &Bytes {
        let raw = &self.raw;
        let buf = &mut self.avcc_buf;
        self.avcc.get_or_insert_with(|| {
            let mut out = std::mem::take(buf);
            out.clear();
            out.reserve(head.len() + raw.iter().map(RawUnit::avcc_len).sum::<usize>());
            out.extend_from_slice(head);
            for unit in raw {
                unit.write_avcc(&mut out);
            }
            out.freeze()
        })
    }

    /// Wrap the AVCC form in an FLV tag.
    ///
    /// Returns `None` when there is no AVCC form yet. The header buffer of a
    /// previous tag is reused when it was reclaimed by [`AvFrame::reset`].
    pub fn fill_flv(&mut self, tag_type: FlvTagType, timestamp: u32) -> Option<&[Bytes]> {
        if self.flv.is_empty() {
            let body = self.avcc.clone()?;
            let mut envelope = std::mem::take(&mut self.flv_buf);
            if envelope.capacity() < TAG_ENVELOPE_SIZE {
                envelope = BytesMut::with_capacity(TAG_ENVELOPE_SIZE);
            }
            flv::write_envelope(&mut envelope, tag_type, timestamp, body.len());
            let envelope = envelope.freeze();
            self.flv.push(envelope.slice(..TAG_HEADER_SIZE));
            self.flv.push(body);
            self.flv.push(envelope.slice(TAG_HEADER_SIZE..));
            self.flv_envelope = Some(envelope);
        }
        Some(&self.flv)
    }

    /// Clear the frame for reuse.
    ///
    /// Synthesized buffers that nothing else references are kept as spare
    /// capacity; raw units and RTP packets are released.
    pub fn reset(&mut self) {
        self.flv.clear();
        self.rtp.clear();
        self.raw.clear();

        if let Some(avcc) = self.avcc.take() {
            if let Ok(mut buf) = avcc.try_into_mut() {
                buf.clear();
                self.avcc_buf = buf;
            }
        }
        if let Some(envelope) = self.flv_envelope.take() {
            if let Ok(mut buf) = envelope.try_into_mut() {
                buf.clear();
                self.flv_buf = buf;
            }
        }

        self.base = BaseFrame::default();
        self.keyframe = false;
        self.lossy = false;
        self.pts = 0;
        self.dts = 0;
    }
}

impl<R: RawUnit> fmt::Debug for AvFrame<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AvFrame")
            .field("sequence", &self.base.sequence)
            .field("abs_time", &self.base.abs_time)
            .field("keyframe", &self.keyframe)
            .field("lossy", &self.lossy)
            .field("raw", &self.raw.len())
            .field("avcc", &self.avcc.as_ref().map(Bytes::len))
            .field("flv", &!self.flv.is_empty())
            .field("rtp", &self.rtp.len())
            .finish()
    }
}

/// One frame in length-prefixed container form
///
/// Byte 0 carries frame type and codec id, byte 1 is zero for a decoder
/// configuration record, bytes 2..5 hold the composition time offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvccFrame(Bytes);

impl AvccFrame {
    pub fn new(data: Bytes) -> Result<Self> {
        if data.len() < 2 {
            return Err(MediaError::AvccTooShort(data.len()).into());
        }
        Ok(Self(data))
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn frame_type(&self) -> Option<VideoFrameType> {
        VideoFrameType::from_byte(self.0[0])
    }

    /// Keyframe or generated keyframe
    pub fn is_idr(&self) -> bool {
        self.frame_type().is_some_and(|t| t.is_keyframe())
    }

    pub fn video_codec(&self) -> Option<VideoCodec> {
        VideoCodec::from_byte(self.0[0])
    }

    pub fn audio_format(&self) -> Option<AudioFormat> {
        AudioFormat::from_byte(self.0[0])
    }

    /// Bytes after the first `offset` header bytes
    pub fn body(&self, offset: usize) -> Bytes {
        if offset >= self.0.len() {
            Bytes::new()
        } else {
            self.0.slice(offset..)
        }
    }
}

/// Out-of-band record needed before any frame of the track can be decoded
#[derive(Debug, Clone, Default)]
pub struct DecoderConfiguration<R> {
    pub payload_type: u8,
    /// Sequence header in AVCC form
    pub avcc: Bytes,
    /// Raw configuration: AudioSpecificConfig bytes for audio, parameter sets for video
    pub raw: R,
    /// Sequence header as an FLV tag `[header, body, trailer]`
    pub flv: Vec<Bytes>,
    /// Incremented on every configuration change
    pub sequence: u32,
}

impl<R: RawUnit> DecoderConfiguration<R> {
    pub fn new(payload_type: u8, tag_type: FlvTagType, avcc: Bytes, raw: R) -> Self {
        Self {
            payload_type,
            flv: flv::tag_buffers(tag_type, 0, avcc.clone()),
            avcc,
            raw,
            sequence: 0,
        }
    }

    /// Whether a configuration has been received
    pub fn is_configured(&self) -> bool {
        !self.avcc.is_empty()
    }
}
