//! G.711 track
//!
//! A-law and µ-law carry no out-of-band configuration: the track attaches with
//! a fixed 8 kHz mono description as soon as it is created.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::config::TrackConfig;
use crate::error::Result;
use crate::media::{AudioFormat, AudioSlice, AvccFrame, DecoderConfiguration, FlvTagType, RawUnit};
use crate::rtp::split_payload;

use super::audio::{AudioCodec, AudioTrack};
use super::media::Media;
use super::stream::StreamSink;

pub const G711_SAMPLE_RATE: u32 = 8000;

/// Static RTP payload types
pub const PCMU_PAYLOAD_TYPE: u8 = 0;
pub const PCMA_PAYLOAD_TYPE: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum G711Law {
    ALaw,
    MuLaw,
}

impl G711Law {
    pub fn format(&self) -> AudioFormat {
        match self {
            G711Law::ALaw => AudioFormat::G711ALaw,
            G711Law::MuLaw => AudioFormat::G711MuLaw,
        }
    }

    pub fn payload_type(&self) -> u8 {
        match self {
            G711Law::ALaw => PCMA_PAYLOAD_TYPE,
            G711Law::MuLaw => PCMU_PAYLOAD_TYPE,
        }
    }

    /// FLV sound byte: format, 16-bit samples, mono
    fn sound_byte(&self) -> u8 {
        ((self.format() as u8) << 4) | 0x02
    }
}

#[derive(Debug)]
pub struct G711 {
    law: G711Law,
    head: [u8; 1],
}

impl G711 {
    pub fn law(&self) -> G711Law {
        self.law
    }
}

impl AudioCodec for G711 {
    fn format(&self) -> AudioFormat {
        self.law.format()
    }

    fn avcc_head(&self) -> &[u8] {
        &self.head
    }

    fn depacketize(&mut self, payload: Bytes) -> Result<Vec<Bytes>> {
        Ok(vec![payload])
    }

    fn packetize(&self, units: &[AudioSlice], mtu: usize) -> Vec<Bytes> {
        units
            .iter()
            .flat_map(|unit| split_payload(unit.as_bytes(), mtu))
            .collect()
    }
}

pub type G711Track = AudioTrack<G711>;

impl AudioTrack<G711> {
    pub fn new(name: &str, law: G711Law, config: TrackConfig, sink: Arc<dyn StreamSink>) -> Self {
        let media = Media::new(name, config, sink, G711_SAMPLE_RATE, law.payload_type());
        let codec = G711 {
            law,
            head: [law.sound_byte()],
        };
        let mut track = AudioTrack::from_parts(media, codec);
        track.set_format(G711_SAMPLE_RATE, 1);

        let (media, codec) = track.parts_mut();
        let head = Bytes::copy_from_slice(codec.avcc_head());
        let decoder = DecoderConfiguration::new(
            media.payload_type(),
            FlvTagType::Audio,
            head.clone(),
            AudioSlice::new(head),
        );
        media.set_decoder_configuration(decoder);
        track
    }

    /// Feed one AVCC audio tag body
    pub fn write_avcc(&mut self, data: Bytes, timestamp: u32) -> Result<()> {
        match AvccFrame::new(data) {
            Ok(frame) => {
                let samples = frame.body(1);
                self.write_avcc_frame(frame.into_bytes(), samples, timestamp);
                Ok(())
            }
            Err(e) => {
                self.reject("g711 avcc", &e);
                Err(e)
            }
        }
    }

    /// Feed samples that arrived in several pieces as one frame
    pub fn write_pieces(&mut self, pieces: &[Bytes], timestamp: u32) {
        let mut unit = AudioSlice::default();
        for piece in pieces {
            unit.append(piece.clone());
        }
        let mut data = BytesMut::with_capacity(unit.len());
        unit.write_payload(&mut data);
        self.write_raw(data.freeze(), timestamp);
    }
}
