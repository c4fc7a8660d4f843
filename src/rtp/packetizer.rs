//! RTP packetizer
//!
//! Wraps codec payloads (already split to fit the MTU by the codec module) into
//! RTP packets. Sequence numbers continue across access units, the SSRC is fixed
//! for the life of the track and the marker is set on the last packet of each
//! access unit.

use bytes::Bytes;

use super::packet::{RtpFrame, RtpHeader};

#[derive(Debug, Clone)]
pub struct RtpPacketizer {
    payload_type: u8,
    ssrc: u32,
    sequence: u16,
    mtu: usize,
}

impl RtpPacketizer {
    pub fn new(payload_type: u8, ssrc: u32, mtu: usize) -> Self {
        Self {
            payload_type,
            ssrc,
            sequence: 0,
            mtu,
        }
    }

    /// Start numbering at `sequence`
    pub fn with_sequence(mut self, sequence: u16) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn payload_type(&self) -> u8 {
        self.payload_type
    }

    pub fn set_payload_type(&mut self, payload_type: u8) {
        self.payload_type = payload_type;
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Maximum payload size per packet
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Sequence number the next packet will carry
    pub fn next_sequence(&self) -> u16 {
        self.sequence
    }

    /// Wrap the payloads of one access unit
    pub fn packetize<I>(&mut self, payloads: I, timestamp: u32) -> Vec<RtpFrame>
    where
        I: IntoIterator<Item = Bytes>,
        I::IntoIter: ExactSizeIterator,
    {
        let payloads = payloads.into_iter();
        let count = payloads.len();

        payloads
            .enumerate()
            .map(|(i, payload)| {
                let mut header =
                    RtpHeader::new(self.payload_type, self.sequence, timestamp, self.ssrc);
                header.marker = i + 1 == count;
                self.sequence = self.sequence.wrapping_add(1);
                RtpFrame::new(header, payload)
            })
            .collect()
    }
}

/// Split a flat payload into MTU-sized chunks, for codecs without payload headers
pub fn split_payload(data: &Bytes, mtu: usize) -> Vec<Bytes> {
    let mtu = mtu.max(1);
    if data.is_empty() {
        return vec![Bytes::new()];
    }
    (0..data.len())
        .step_by(mtu)
        .map(|start| data.slice(start..(start + mtu).min(data.len())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_on_last_packet() {
        let mut packetizer = RtpPacketizer::new(97, 0x1234, 1400);
        let packets = packetizer.packetize(
            vec![Bytes::from_static(&[1]), Bytes::from_static(&[2]), Bytes::from_static(&[3])],
            9000,
        );

        assert_eq!(packets.len(), 3);
        assert_eq!(
            packets.iter().map(RtpFrame::marker).collect::<Vec<_>>(),
            vec![false, false, true]
        );
        assert!(packets.iter().all(|p| p.timestamp() == 9000 && p.ssrc() == 0x1234));
    }

    #[test]
    fn test_sequence_continues_and_wraps() {
        let mut packetizer = RtpPacketizer::new(0, 1, 1400).with_sequence(65534);
        let first = packetizer.packetize(vec![Bytes::from_static(&[1])], 0);
        let second = packetizer.packetize(
            vec![Bytes::from_static(&[2]), Bytes::from_static(&[3])],
            160,
        );

        assert_eq!(first[0].sequence_number(), 65534);
        assert_eq!(second[0].sequence_number(), 65535);
        assert_eq!(second[1].sequence_number(), 0);
        assert_eq!(packetizer.next_sequence(), 1);
    }

    #[test]
    fn test_split_payload() {
        let data = Bytes::from(vec![0u8; 250]);
        let chunks = split_payload(&data, 100);

        assert_eq!(chunks.iter().map(Bytes::len).collect::<Vec<_>>(), vec![100, 100, 50]);
        assert_eq!(split_payload(&Bytes::new(), 100).len(), 1);
    }
}
