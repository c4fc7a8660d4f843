//! H.264/AVC framing
//!
//! AVCC video frames carry length-prefixed NAL units:
//! ```text
//! +----------+----------+-----------------+-----------------+------
//! |FrameType | CodecID  | AVCPacketType   | CompositionTime | Data
//! | (4 bits) | (4 bits) | (1 byte)        | (3 bytes, SI24) |
//! +----------+----------+-----------------+-----------------+------
//! ```
//!
//! AVCDecoderConfigurationRecord (sequence header):
//! ```text
//! configurationVersion (1) | AVCProfileIndication (1) | profile_compatibility (1)
//! | AVCLevelIndication (1) | lengthSizeMinusOne (1, lower 2 bits)
//! | numOfSPS (1, lower 5 bits) | { spsLength (2) | spsNALUnit }*
//! | numOfPPS (1) | { ppsLength (2) | ppsNALUnit }*
//! ```
//!
//! Over RTP (RFC 6184) a NAL unit travels alone, aggregated with others in a
//! STAP-A packet, or split across FU-A fragments.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{MediaError, Result, RtpError};

use super::frame::{NaluSlice, RawUnit};

/// Dynamic RTP payload type conventionally used for H.264
pub const H264_PAYLOAD_TYPE: u8 = 96;

/// RTP clock rate for video
pub const H264_CLOCK_RATE: u32 = 90_000;

const STAP_A: u8 = 24;
const FU_A: u8 = 28;

/// AVC packet type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvcPacketType {
    /// Sequence header (AVCDecoderConfigurationRecord)
    SequenceHeader = 0,
    Nalu = 1,
    EndOfSequence = 2,
}

impl AvcPacketType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(AvcPacketType::SequenceHeader),
            1 => Some(AvcPacketType::Nalu),
            2 => Some(AvcPacketType::EndOfSequence),
            _ => None,
        }
    }
}

/// NAL unit type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluType {
    /// Non-IDR slice
    Slice = 1,
    SlicePartA = 2,
    SlicePartB = 3,
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
    EndSeq = 10,
    EndStream = 11,
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
    pub compatibility: u8,
    /// AVC level (e.g., 31 = 3.1)
    pub level: u8,
    /// Size of the NALU length prefix (usually 4)
    pub nalu_length_size: u8,
    pub sps: Vec<Bytes>,
    pub pps: Vec<Bytes>,
    /// AVCDecoderConfigurationRecord bytes
    pub raw: Bytes,
}

impl AvcConfig {
    /// Parse an AVCDecoderConfigurationRecord
    pub fn parse(data: Bytes) -> Result<Self> {
        if data.len() < 7 {
            return Err(MediaError::DecoderConfigTooShort(data.len()).into());
        }

        let raw = data.clone();
        let mut data = data;

        if data.get_u8() != 1 {
            return Err(MediaError::InvalidAvcPacket.into());
        }

        let profile = data.get_u8();
        let compatibility = data.get_u8();
        let level = data.get_u8();
        let nalu_length_size = (data.get_u8() & 0x03) + 1;

        let num_sps = (data.get_u8() & 0x1F) as usize;
        let sps = read_parameter_sets(&mut data, num_sps)?;

        if data.is_empty() {
            return Err(MediaError::InvalidAvcPacket.into());
        }
        let num_pps = data.get_u8() as usize;
        let pps = read_parameter_sets(&mut data, num_pps)?;

        Ok(AvcConfig {
            profile,
            compatibility,
            level,
            nalu_length_size,
            sps,
            pps,
            raw,
        })
    }

    /// Build a record from in-band parameter sets
    pub fn from_parameter_sets(sps: Bytes, pps: Bytes) -> Result<Self> {
        if sps.len() < 4 {
            return Err(MediaError::InvalidAvcPacket.into());
        }

        let mut record = BytesMut::with_capacity(11 + sps.len() + pps.len());
        record.put_u8(1);
        record.put_u8(sps[1]);
        record.put_u8(sps[2]);
        record.put_u8(sps[3]);
        record.put_u8(0xFF); // 4-byte NALU lengths
        record.put_u8(0xE1); // one SPS
        record.put_u16(sps.len() as u16);
        record.extend_from_slice(&sps);
        record.put_u8(1);
        record.put_u16(pps.len() as u16);
        record.extend_from_slice(&pps);

        Ok(AvcConfig {
            profile: sps[1],
            compatibility: sps[2],
            level: sps[3],
            nalu_length_size: 4,
            sps: vec![sps],
            pps: vec![pps],
            raw: record.freeze(),
        })
    }

    /// Sequence header in AVCC form: `[0x17, 0x00, 0, 0, 0, record...]`
    pub fn sequence_header(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(5 + self.raw.len());
        buf.extend_from_slice(&[0x17, AvcPacketType::SequenceHeader as u8, 0, 0, 0]);
        buf.extend_from_slice(&self.raw);
        buf.freeze()
    }

    /// Parameter sets, SPS first, each one a piece of the returned value
    pub fn parameter_sets(&self) -> NaluSlice {
        let mut units = NaluSlice::default();
        for ps in self.sps.iter().chain(&self.pps) {
            units.append(ps.clone());
        }
        units
    }

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

    /// Level as string (e.g., "3.1")
    pub fn level_string(&self) -> String {
        format!("{}.{}", self.level / 10, self.level % 10)
    }
}

fn read_parameter_sets(data: &mut Bytes, count: usize) -> Result<Vec<Bytes>> {
    let mut sets = Vec::with_capacity(count);
    for _ in 0..count {
        if data.len() < 2 {
            return Err(MediaError::InvalidAvcPacket.into());
        }
        let len = data.get_u16() as usize;
        if data.len() < len {
            return Err(MediaError::InvalidAvcPacket.into());
        }
        sets.push(data.split_to(len));
    }
    Ok(sets)
}

/// H.264 body of an AVCC frame
#[derive(Debug, Clone)]
pub enum H264Data {
    SequenceHeader(AvcConfig),

    /// Coded picture
    Frame {
        keyframe: bool,
        /// Composition time offset (for B-frames)
        composition_time: i32,
        nalus: Vec<Bytes>,
    },

    EndOfSequence,
}

impl H264Data {
    /// Parse the body following the frame type/codec byte
    pub fn parse(mut data: Bytes, nalu_length_size: u8) -> Result<Self> {
        if data.len() < 4 {
            return Err(MediaError::InvalidAvcPacket.into());
        }

        let packet_type = data.get_u8();

        let ct = data.get_uint(3) as i32;
        let composition_time = if ct & 0x80_0000 != 0 { ct | !0xFF_FFFF } else { ct };

        match AvcPacketType::from_byte(packet_type) {
            Some(AvcPacketType::SequenceHeader) => {
                Ok(H264Data::SequenceHeader(AvcConfig::parse(data)?))
            }
            Some(AvcPacketType::Nalu) => {
                let nalus: Vec<Bytes> = NaluIterator::new(&data, nalu_length_size).collect();
                let keyframe = nalus
                    .iter()
                    .filter_map(|n| n.first().copied().and_then(NaluType::from_byte))
                    .any(|t| t.is_keyframe());
                Ok(H264Data::Frame {
                    keyframe,
                    composition_time,
                    nalus,
                })
            }
            Some(AvcPacketType::EndOfSequence) => Ok(H264Data::EndOfSequence),
            None => Err(MediaError::InvalidAvcPacket.into()),
        }
    }
}

/// Iterator over length-prefixed NAL units, yielding zero-copy slices
pub struct NaluIterator<'a> {
    data: &'a Bytes,
    offset: usize,
    nalu_length_size: usize,
}

impl<'a> NaluIterator<'a> {
    pub fn new(data: &'a Bytes, nalu_length_size: u8) -> Self {
        Self {
            data,
            offset: 0,
            nalu_length_size: nalu_length_size as usize,
        }
    }
}

impl Iterator for NaluIterator<'_> {
    type Item = Bytes;

    fn next(&mut self) -> Option<Self::Item> {
        if self.nalu_length_size == 0 || self.offset + self.nalu_length_size > self.data.len() {
            return None;
        }

        let mut len: usize = 0;
        for i in 0..self.nalu_length_size {
            len = (len << 8) | (self.data[self.offset + i] as usize);
        }
        self.offset += self.nalu_length_size;

        if self.offset + len > self.data.len() {
            return None;
        }

        let nalu = self.data.slice(self.offset..self.offset + len);
        self.offset += len;
        Some(nalu)
    }
}

/// RFC 6184 depacketizer
///
/// FU-A fragments are kept as separate pieces of one [`NaluSlice`]; the first
/// piece is the reconstructed NAL header.
#[derive(Debug, Default)]
pub struct NaluDepacketizer {
    fragment: Option<NaluSlice>,
}

impl NaluDepacketizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_fragment(&self) -> bool {
        self.fragment.is_some()
    }

    /// Drop any partial NAL unit (after packet loss)
    pub fn reset(&mut self) {
        self.fragment = None;
    }

    /// Extract the NAL units completed by this payload
    pub fn push(&mut self, mut payload: Bytes) -> Result<Vec<NaluSlice>> {
        if payload.is_empty() {
            return Err(RtpError::EmptyPayload.into());
        }

        let header = payload[0];
        match header & 0x1F {
            1..=23 => {
                self.fragment = None;
                Ok(vec![NaluSlice::new(payload)])
            }
            STAP_A => {
                self.fragment = None;
                payload.advance(1);
                let mut units = Vec::new();
                while payload.len() >= 2 {
                    let len = payload.get_u16() as usize;
                    if len == 0 || payload.len() < len {
                        return Err(RtpError::MalformedPayload { codec: "h264" }.into());
                    }
                    units.push(NaluSlice::new(payload.split_to(len)));
                }
                Ok(units)
            }
            FU_A => {
                if payload.len() < 3 {
                    return Err(RtpError::MalformedPayload { codec: "h264" }.into());
                }
                let fu = payload[1];
                let start = fu & 0x80 != 0;
                let end = fu & 0x40 != 0;
                payload.advance(2);

                if start {
                    let nal_header = (header & 0xE0) | (fu & 0x1F);
                    let mut unit = NaluSlice::new(Bytes::copy_from_slice(&[nal_header]));
                    unit.append(payload);
                    self.fragment = Some(unit);
                } else if let Some(unit) = self.fragment.as_mut() {
                    unit.append(payload);
                } else {
                    // Middle of a NAL unit whose start was lost
                    return Ok(Vec::new());
                }

                if end {
                    Ok(self.fragment.take().into_iter().collect())
                } else {
                    Ok(Vec::new())
                }
            }
            _ => Err(RtpError::MalformedPayload { codec: "h264" }.into()),
        }
    }
}

/// Split the NAL units of one access unit into RTP payloads of at most `mtu` bytes.
///
/// With `aggregate`, runs of small NAL units share a STAP-A packet.
pub fn packetize(nalus: &[NaluSlice], mtu: usize, aggregate: bool) -> Vec<Bytes> {
    let mut payloads = Vec::new();
    let mut i = 0;

    while i < nalus.len() {
        if aggregate {
            let mut size = 1;
            let mut end = i;
            while end < nalus.len() && size + 2 + nalus[end].len() <= mtu {
                size += 2 + nalus[end].len();
                end += 1;
            }
            if end - i >= 2 {
                payloads.push(stap_a(&nalus[i..end], size));
                i = end;
                continue;
            }
        }

        let nalu = &nalus[i];
        if nalu.len() <= mtu {
            payloads.push(nalu.to_bytes());
        } else {
            fu_a(&nalu.to_bytes(), mtu, &mut payloads);
        }
        i += 1;
    }

    payloads
}

fn stap_a(nalus: &[NaluSlice], size: usize) -> Bytes {
    // F and NRI come from the most important aggregated unit
    let nri = nalus
        .iter()
        .filter_map(NaluSlice::header)
        .map(|h| h & 0x60)
        .max()
        .unwrap_or(0);

    let mut buf = BytesMut::with_capacity(size);
    buf.put_u8(nri | STAP_A);
    for nalu in nalus {
        buf.put_u16(nalu.len() as u16);
        nalu.write_payload(&mut buf);
    }
    buf.freeze()
}

fn fu_a(nalu: &Bytes, mtu: usize, out: &mut Vec<Bytes>) {
    let header = nalu[0];
    let indicator = (header & 0xE0) | FU_A;
    let body = &nalu[1..];
    let chunk = mtu.saturating_sub(2).max(1);
    let count = body.len().div_ceil(chunk);

    for (n, piece) in body.chunks(chunk).enumerate() {
        let mut fu = header & 0x1F;
        if n == 0 {
            fu |= 0x80;
        }
        if n + 1 == count {
            fu |= 0x40;
        }
        let mut payload = BytesMut::with_capacity(2 + piece.len());
        payload.put_u8(indicator);
        payload.put_u8(fu);
        payload.extend_from_slice(piece);
        out.push(payload.freeze());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORD: &[u8] = &[
        0x01, // version
        0x64, // profile (High)
        0x00, // compatibility
        0x1F, // level 3.1
        0xFF, // nalu length size = 4
        0xE1, // 1 SPS
        0x00, 0x04, // SPS length
        0x67, 0x64, 0x00, 0x1F, // SPS data
        0x01, // 1 PPS
        0x00, 0x03, // PPS length
        0x68, 0xEF, 0x38, // PPS data
    ];

    #[test]
    fn test_nalu_type() {
        assert_eq!(NaluType::from_byte(0x65), Some(NaluType::Idr));
        assert_eq!(NaluType::from_byte(0x67), Some(NaluType::Sps));
        assert_eq!(NaluType::from_byte(0x68), Some(NaluType::Pps));
        assert_eq!(NaluType::from_byte(0x41), Some(NaluType::Slice));
        assert_eq!(NaluType::from_byte(0x1C), None);

        assert!(NaluType::Idr.is_keyframe());
        assert!(!NaluType::Slice.is_keyframe());
        assert!(NaluType::Pps.is_parameter_set());
        assert!(!NaluType::Idr.is_parameter_set());
    }

    #[test]
    fn test_avc_config_parse() {
        let data = Bytes::from_static(RECORD);
        let config = AvcConfig::parse(data.clone()).unwrap();

        assert_eq!(config.profile, 100);
        assert_eq!(config.level, 31);
        assert_eq!(config.nalu_length_size, 4);
        assert_eq!(&config.sps[0][..], &[0x67, 0x64, 0x00, 0x1F]);
        assert_eq!(&config.pps[0][..], &[0x68, 0xEF, 0x38]);
        assert_eq!(config.profile_name(), "High");
        assert_eq!(config.level_string(), "3.1");
        assert_eq!(config.raw, data);
    }

    #[test]
    fn test_avc_config_invalid() {
        let mut bad_version = RECORD.to_vec();
        bad_version[0] = 2;
        assert!(AvcConfig::parse(Bytes::from(bad_version)).is_err());

        assert!(AvcConfig::parse(Bytes::from_static(&[0x01, 0x64, 0x00])).is_err());

        // SPS length runs past the end
        assert!(AvcConfig::parse(Bytes::from_static(&RECORD[..10])).is_err());
    }

    #[test]
    fn test_avc_config_from_parameter_sets() {
        let config = AvcConfig::from_parameter_sets(
            Bytes::from_static(&[0x67, 0x64, 0x00, 0x1F]),
            Bytes::from_static(&[0x68, 0xEF, 0x38]),
        )
        .unwrap();

        assert_eq!(&config.raw[..], RECORD);
        assert_eq!(AvcConfig::parse(config.raw.clone()).unwrap(), config);
        assert_eq!(&config.sequence_header()[..5], &[0x17, 0x00, 0, 0, 0]);
        assert_eq!(config.parameter_sets().pieces().len(), 2);
    }

    #[test]
    fn test_h264_data_sequence_header() {
        let mut data = vec![0x00, 0x00, 0x00, 0x00];
        data.extend_from_slice(RECORD);

        let h264 = H264Data::parse(Bytes::from(data), 4).unwrap();
        assert!(matches!(h264, H264Data::SequenceHeader(_)));
    }

    #[test]
    fn test_h264_data_frame() {
        let data = Bytes::from_static(&[
            0x01, // AVC NALU
            0xFF, 0xFF, 0x00, // composition time = -256
            0x00, 0x00, 0x00, 0x02, 0x09, 0xF0, // AUD
            0x00, 0x00, 0x00, 0x03, 0x65, 0x88, 0x84, // IDR
        ]);

        match H264Data::parse(data, 4).unwrap() {
            H264Data::Frame {
                keyframe,
                composition_time,
                nalus,
            } => {
                assert!(keyframe);
                assert_eq!(composition_time, -256);
                assert_eq!(nalus.len(), 2);
                assert_eq!(&nalus[1][..], &[0x65, 0x88, 0x84]);
            }
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[test]
    fn test_h264_data_invalid() {
        assert!(H264Data::parse(Bytes::from_static(&[0x03, 0, 0, 0]), 4).is_err());
        assert!(H264Data::parse(Bytes::from_static(&[0x00, 0x00]), 4).is_err());
        assert!(matches!(
            H264Data::parse(Bytes::from_static(&[0x02, 0, 0, 0]), 4).unwrap(),
            H264Data::EndOfSequence
        ));
    }

    #[test]
    fn test_nalu_iterator() {
        let data = Bytes::from_static(&[
            0x00, 0x00, 0x00, 0x03, 0x67, 0x64, 0x00, // SPS
            0x00, 0x00, 0x00, 0x02, 0x68, 0xEF, // PPS
        ]);
        let nalus: Vec<Bytes> = NaluIterator::new(&data, 4).collect();

        assert_eq!(nalus.len(), 2);
        assert_eq!(NaluType::from_byte(nalus[0][0]), Some(NaluType::Sps));
        assert_eq!(NaluType::from_byte(nalus[1][0]), Some(NaluType::Pps));

        let short = Bytes::from_static(&[0x00, 0x02, 0x65, 0x88]);
        assert_eq!(NaluIterator::new(&short, 2).count(), 1);
    }

    #[test]
    fn test_nalu_iterator_truncated() {
        let data = Bytes::from_static(&[0x00, 0x00, 0x00, 0x0A, 0x67, 0x64, 0x00]);
        assert!(NaluIterator::new(&data, 4).next().is_none());
        assert!(NaluIterator::new(&Bytes::new(), 4).next().is_none());
    }

    #[test]
    fn test_depacketize_single_nalu() {
        let mut depacketizer = NaluDepacketizer::new();
        let units = depacketizer.push(Bytes::from_static(&[0x41, 1, 2])).unwrap();

        assert_eq!(units.len(), 1);
        assert_eq!(units[0].nalu_type(), Some(NaluType::Slice));
    }

    #[test]
    fn test_depacketize_stap_a() {
        let payload = Bytes::from_static(&[
            0x78, // STAP-A, NRI 3
            0x00, 0x02, 0x67, 0x42, // SPS
            0x00, 0x02, 0x68, 0xCE, // PPS
        ]);
        let units = NaluDepacketizer::new().push(payload).unwrap();

        assert_eq!(units.len(), 2);
        assert_eq!(units[0].nalu_type(), Some(NaluType::Sps));
        assert_eq!(&units[1].to_bytes()[..], &[0x68, 0xCE]);

        let truncated = Bytes::from_static(&[0x78, 0x00, 0x05, 0x67]);
        assert!(NaluDepacketizer::new().push(truncated).is_err());
    }

    #[test]
    fn test_fu_a_roundtrip_keeps_pieces() {
        let mut nalu = vec![0x65];
        nalu.extend((0..200u16).map(|v| v as u8));
        let unit = NaluSlice::new(Bytes::from(nalu.clone()));

        let payloads = packetize(&[unit], 80, false);
        assert_eq!(payloads.len(), 3);
        assert_eq!(payloads[0][0], 0x7C);
        assert_eq!(payloads[0][1], 0x85);
        assert_eq!(payloads[1][1], 0x05);
        assert_eq!(payloads[2][1], 0x45);
        assert!(payloads.iter().all(|p| p.len() <= 80));

        let mut depacketizer = NaluDepacketizer::new();
        assert!(depacketizer.push(payloads[0].clone()).unwrap().is_empty());
        assert!(depacketizer.push(payloads[1].clone()).unwrap().is_empty());
        let units = depacketizer.push(payloads[2].clone()).unwrap();

        assert_eq!(units.len(), 1);
        // Header piece plus one piece per fragment
        assert_eq!(units[0].pieces().len(), 4);
        assert_eq!(&units[0].to_bytes()[..], &nalu[..]);
    }

    #[test]
    fn test_fu_a_without_start_is_skipped() {
        let mut depacketizer = NaluDepacketizer::new();
        let middle = Bytes::from_static(&[0x7C, 0x05, 1, 2, 3]);

        assert!(depacketizer.push(middle).unwrap().is_empty());
        assert!(!depacketizer.in_fragment());
    }

    #[test]
    fn test_packetize_aggregate() {
        let nalus = [
            NaluSlice::new(Bytes::from_static(&[0x67, 0x42, 0x00])),
            NaluSlice::new(Bytes::from_static(&[0x68, 0xCE])),
            NaluSlice::new(Bytes::from(vec![0x65; 100])),
        ];

        let payloads = packetize(&nalus, 50, true);
        assert_eq!(payloads.len(), 4);
        assert_eq!(
            &payloads[0][..],
            &[0x78, 0x00, 0x03, 0x67, 0x42, 0x00, 0x00, 0x02, 0x68, 0xCE]
        );
        // The IDR does not fit and is fragmented
        assert_eq!(payloads[1][0] & 0x1F, FU_A);

        let units = NaluDepacketizer::new().push(payloads[0].clone()).unwrap();
        assert_eq!(units.len(), 2);

        let plain = packetize(&nalus[..2], 50, false);
        assert_eq!(plain.len(), 2);
        assert_eq!(&plain[1][..], &[0x68, 0xCE]);
    }
}
