//! AAC track
//!
//! Accepts the decoder configuration as raw AudioSpecificConfig bytes, an ADTS
//! header or an AVCC sequence header. Frames arrive as RFC 3640 RTP packets or
//! as AVCC frames.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::config::TrackConfig;
use crate::error::{MediaError, Result};
use crate::media::aac::{self, AAC_AVCC_HEAD, AAC_PAYLOAD_TYPE};
use crate::media::{
    AacData, AudioFormat, AudioSlice, AudioSpecificConfig, AuDepacketizer, AvccFrame,
    DecoderConfiguration, FlvTagType, RawUnit,
};

use super::audio::{AudioCodec, AudioTrack};
use super::media::Media;
use super::stream::StreamSink;

/// Clock rate used until a configuration says otherwise
const DEFAULT_SAMPLE_RATE: u32 = 44100;

#[derive(Debug, Default)]
pub struct Aac {
    depacketizer: AuDepacketizer,
    config: Option<AudioSpecificConfig>,
}

impl Aac {
    /// The parsed AudioSpecificConfig, once known
    pub fn config(&self) -> Option<&AudioSpecificConfig> {
        self.config.as_ref()
    }
}

impl AudioCodec for Aac {
    fn format(&self) -> AudioFormat {
        AudioFormat::Aac
    }

    fn avcc_head(&self) -> &[u8] {
        &AAC_AVCC_HEAD
    }

    fn depacketize(&mut self, payload: Bytes) -> Result<Vec<Bytes>> {
        self.depacketizer.push(payload)
    }

    fn reset(&mut self) {
        self.depacketizer.reset();
    }

    fn packetize(&self, units: &[AudioSlice], mtu: usize) -> Vec<Bytes> {
        // The whole frame travels as one access unit
        match units {
            [single] => aac::packetize(single.as_bytes(), mtu),
            _ => {
                let mut au = BytesMut::with_capacity(units.iter().map(RawUnit::len).sum());
                for unit in units {
                    unit.write_payload(&mut au);
                }
                aac::packetize(&au, mtu)
            }
        }
    }
}

pub type AacTrack = AudioTrack<Aac>;

impl AudioTrack<Aac> {
    pub fn new(name: &str, config: TrackConfig, sink: Arc<dyn StreamSink>) -> Self {
        let media = Media::new(name, config, sink, DEFAULT_SAMPLE_RATE, AAC_PAYLOAD_TYPE);
        AudioTrack::from_parts(media, Aac::default())
    }

    /// Install the configuration from raw AudioSpecificConfig bytes
    pub fn write_config(&mut self, config: Bytes) -> Result<()> {
        match AudioSpecificConfig::parse(config) {
            Ok(asc) => {
                self.apply_config(asc);
                Ok(())
            }
            Err(e) => {
                self.reject("aac config", &e);
                Err(e)
            }
        }
    }

    /// Install the configuration described by an ADTS header
    pub fn write_adts(&mut self, adts: &[u8]) -> Result<()> {
        let asc = match AudioSpecificConfig::from_adts(adts) {
            Ok(asc) => asc,
            Err(e) => {
                self.reject("adts header", &e);
                return Err(e);
            }
        };
        // ADTS repeats on every frame; only a change is a new configuration
        if self.codec().config() != Some(&asc) {
            self.apply_config(asc);
        }
        Ok(())
    }

    /// Feed one AVCC audio tag body, sequence header or raw frame
    pub fn write_avcc(&mut self, data: Bytes, timestamp: u32) -> Result<()> {
        let parsed = AvccFrame::new(data).and_then(|frame| {
            if frame.audio_format() != Some(AudioFormat::Aac) {
                return Err(MediaError::InvalidAacPacket.into());
            }
            let body = AacData::parse(frame.body(1))?;
            Ok((frame, body))
        });

        match parsed {
            Ok((_, AacData::SequenceHeader(asc))) => self.apply_config(asc),
            Ok((frame, AacData::Frame { data })) => {
                self.write_avcc_frame(frame.into_bytes(), data, timestamp)
            }
            Err(e) => {
                self.reject("aac avcc", &e);
                return Err(e);
            }
        }
        Ok(())
    }

    fn apply_config(&mut self, asc: AudioSpecificConfig) {
        tracing::info!(
            track = %self.name(),
            format = self.format().name(),
            profile = asc.profile().map(|p| p.name()).unwrap_or("unknown"),
            sample_rate = asc.sampling_frequency,
            channels = asc.channels(),
            "AAC configuration"
        );
        self.set_format(asc.sampling_frequency, asc.channels());

        let (media, codec) = self.parts_mut();
        let decoder = DecoderConfiguration::new(
            media.payload_type(),
            FlvTagType::Audio,
            asc.sequence_header(),
            AudioSlice::new(asc.raw.clone()),
        );
        codec.config = Some(asc);
        media.set_decoder_configuration(decoder);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, MediaError, TryRecvError};
    use crate::rtp::{RtpFrame, RtpHeader};
    use crate::track::media::tests::RecordingSink;
    use crate::track::StartAt;

    const ASC: [u8; 2] = [0x12, 0x10];

    fn track(sink: Arc<RecordingSink>, config: TrackConfig) -> AacTrack {
        AacTrack::new("aac", config, sink)
    }

    /// One packet carrying one access unit
    fn rtp(seq: u16, ts: u32, au: &[u8], marker: bool) -> Bytes {
        let mut header = RtpHeader::new(AAC_PAYLOAD_TYPE, seq, ts, 0x1234);
        header.marker = marker;
        let mut payload = aac::au_header(au.len()).to_vec();
        payload.extend_from_slice(au);
        RtpFrame::new(header, Bytes::from(payload)).raw().clone()
    }

    #[test]
    fn test_config_golden() {
        let sink = Arc::new(RecordingSink::default());
        let mut track = track(sink.clone(), TrackConfig::default());
        track.write_config(Bytes::from_static(&ASC)).unwrap();

        let asc = track.codec().config().unwrap();
        assert_eq!(asc.audio_object_type, 2);
        assert_eq!(track.sample_rate(), 44100);
        assert_eq!(track.channels(), 2);
        assert_eq!(track.media().clock_rate(), 44100);

        let decoder = track.media().decoder_configuration();
        assert_eq!(&decoder.avcc[..], &[0xAF, 0x00, 0x12, 0x10]);
        assert_eq!(decoder.raw.as_bytes(), &Bytes::from_static(&ASC));
        assert_eq!(decoder.payload_type, AAC_PAYLOAD_TYPE);
        assert_eq!(decoder.sequence, 1);
        assert_eq!(*sink.attached.lock().unwrap(), vec!["aac".to_string()]);
    }

    #[test]
    fn test_short_config_not_attached() {
        let sink = Arc::new(RecordingSink::default());
        let mut track = track(sink.clone(), TrackConfig::default());

        let err = track.write_avcc(Bytes::from_static(&[0xAF, 0x00, 0x12]), 0);
        assert_eq!(
            err.unwrap_err(),
            Error::Media(MediaError::DecoderConfigTooShort(1))
        );
        assert!(!track.is_attached());
        assert!(sink.attached.lock().unwrap().is_empty());
        assert_eq!(sink.errors.lock().unwrap().len(), 1);
        assert_eq!(track.stats().malformed, 1);
    }

    #[test]
    fn test_adts_config() {
        let sink = Arc::new(RecordingSink::default());
        let mut track = track(sink, TrackConfig::default());

        // AAC LC, 44.1 kHz, stereo
        let adts = [0xFF, 0xF1, 0x50, 0x80, 0x02, 0x1F, 0xFC];
        track.write_adts(&adts).unwrap();
        track.write_adts(&adts).unwrap();

        let decoder = track.media().decoder_configuration();
        assert_eq!(&decoder.avcc[..], &[0xAF, 0x00, 0x12, 0x10]);
        // The repeated header is not a new configuration
        assert_eq!(decoder.sequence, 1);
    }

    #[test]
    fn test_avcc_frames_synthesize_forms() {
        let sink = Arc::new(RecordingSink::default());
        let mut track = track(sink, TrackConfig::default());
        track
            .write_avcc(Bytes::from_static(&[0xAF, 0x00, 0x12, 0x10]), 0)
            .unwrap();
        let mut reader = track.handle().subscribe(StartAt::Live);

        track
            .write_avcc(Bytes::from_static(&[0xAF, 0x01, 0x21, 0x22, 0x23]), 40)
            .unwrap();

        let frame = reader.try_recv().unwrap();
        assert_eq!(frame.raw()[0].as_bytes(), &Bytes::from_static(&[0x21, 0x22, 0x23]));
        assert_eq!(&frame.avcc().unwrap()[..], &[0xAF, 0x01, 0x21, 0x22, 0x23]);
        assert_eq!(frame.flv().len(), 3);
        assert_eq!(&frame.flv()[0][4..8], &[0, 0, 40, 0]);

        let rtp = frame.rtp();
        assert_eq!(rtp.len(), 1);
        assert!(rtp[0].marker());
        assert_eq!(&rtp[0].payload()[..], &[0x00, 0x10, 0x00, 0x18, 0x21, 0x22, 0x23]);
    }

    #[test]
    fn test_avcc_wrong_sound_format() {
        let sink = Arc::new(RecordingSink::default());
        let mut track = track(sink, TrackConfig::default());

        // MP3 sound byte carrying what looks like an AAC sequence header
        let err = track
            .write_avcc(Bytes::from_static(&[0x2F, 0x00, 0x12, 0x10]), 0)
            .unwrap_err();
        assert_eq!(err, Error::Media(MediaError::InvalidAacPacket));
        assert!(!track.is_attached());
        assert_eq!(track.stats().malformed, 1);
    }

    #[test]
    fn test_rtp_in_order() {
        let sink = Arc::new(RecordingSink::default());
        let mut track = track(sink, TrackConfig::default());
        track.write_config(Bytes::from_static(&ASC)).unwrap();
        let mut reader = track.handle().subscribe(StartAt::Live);

        for i in 0..3u16 {
            let ts = 1024 * i as u32;
            track.write_rtp(rtp(i, ts, &[i as u8; 8], true)).unwrap();
        }

        for i in 0..3u32 {
            let frame = reader.try_recv().unwrap();
            assert_eq!(frame.base.sequence, i + 1);
            assert_eq!(frame.pts, 1024 * i);
            assert_eq!(frame.raw()[0].len(), 8);
            // Received packets are kept as the frame's RTP form
            assert_eq!(frame.rtp().len(), 1);
            assert_eq!(frame.rtp()[0].sequence_number(), i as u16);
            assert!(!frame.lossy);
        }
        // 1024 samples at 44.1 kHz
        assert_eq!(track.stats().last_timestamp, 46);
        assert_eq!(reader.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[test]
    fn test_fragmented_access_unit() {
        let sink = Arc::new(RecordingSink::default());
        let mut track = track(sink, TrackConfig::default().mtu(8));
        track.write_config(Bytes::from_static(&ASC)).unwrap();
        let mut reader = track.handle().subscribe(StartAt::Live);

        let au: Vec<u8> = (0..10).collect();
        let payloads = aac::packetize(&au, 8);
        assert_eq!(payloads.len(), 3);
        let last = payloads.len() - 1;
        for (i, payload) in payloads.into_iter().enumerate() {
            let mut header = RtpHeader::new(AAC_PAYLOAD_TYPE, i as u16, 0, 1);
            header.marker = i == last;
            track.push_rtp(RtpFrame::new(header, payload)).unwrap();
        }

        let frame = reader.try_recv().unwrap();
        assert_eq!(&frame.raw()[0].as_bytes()[..], &au[..]);
        assert_eq!(frame.rtp().len(), 3);
    }

    #[test]
    fn test_lost_first_fragment_spares_next_frame() {
        let sink = Arc::new(RecordingSink::default());
        let mut track = track(sink.clone(), TrackConfig::default());
        track.write_config(Bytes::from_static(&ASC)).unwrap();
        let mut reader = track.handle().subscribe(StartAt::Live);

        track.write_rtp(rtp(0, 0, &[0; 20], true)).unwrap();

        // 250-byte AU in three fragments, the first one lost
        let fragments = aac::packetize(&[5u8; 250], 104);
        for (seq, payload) in [(2u16, &fragments[1]), (3, &fragments[2])] {
            let mut header = RtpHeader::new(AAC_PAYLOAD_TYPE, seq, 1024, 0x1234);
            header.marker = seq == 3;
            track.push_rtp(RtpFrame::new(header, payload.clone())).unwrap();
        }
        track.write_rtp(rtp(4, 2048, &[6; 30], true)).unwrap();

        assert_eq!(reader.try_recv().unwrap().pts, 0);
        let next = reader.try_recv().unwrap();
        assert_eq!(next.pts, 2048);
        assert_eq!(next.raw()[0].as_bytes().len(), 30);
        assert_eq!(reader.try_recv().unwrap_err(), TryRecvError::Empty);

        assert_eq!(track.stats().dropped_frames, 1);
        assert_eq!(track.stats().malformed, 0);
        assert!(sink.errors.lock().unwrap().is_empty());
    }

    #[test]
    fn test_reorder_gap_filled() {
        let sink = Arc::new(RecordingSink::default());
        let mut track = track(sink, TrackConfig::default().reorder(5));
        track.write_config(Bytes::from_static(&ASC)).unwrap();
        let mut reader = track.handle().subscribe(StartAt::Live);

        for seq in [0u16, 2, 3, 1, 4] {
            track
                .write_rtp(rtp(seq, 1024 * seq as u32, &[seq as u8], true))
                .unwrap();
        }

        for seq in 0..5u8 {
            let frame = reader.try_recv().unwrap();
            assert_eq!(frame.raw()[0].as_bytes()[0], seq);
            assert!(!frame.lossy);
        }
        assert_eq!(track.stats().rtp_lost, 0);
    }

    #[test]
    fn test_reorder_gap_expired() {
        let sink = Arc::new(RecordingSink::default());
        let mut track = track(sink, TrackConfig::default().reorder(5));
        track.write_config(Bytes::from_static(&ASC)).unwrap();
        let mut reader = track.handle().subscribe(StartAt::Live);

        // Packet 1 never arrives; 7 lands beyond the window
        for seq in [0u16, 2, 3, 4, 5, 6, 7] {
            track
                .write_rtp(rtp(seq, 1024 * seq as u32, &[seq as u8], true))
                .unwrap();
        }

        assert!(!reader.try_recv().unwrap().lossy);
        let after_gap = reader.try_recv().unwrap();
        assert_eq!(after_gap.raw()[0].as_bytes()[0], 2);
        assert!(after_gap.lossy);
        assert_eq!(track.stats().rtp_lost, 1);
        assert_eq!(track.stats().lossy_frames, 1);
    }

    #[test]
    fn test_frames_before_config_dropped() {
        let sink = Arc::new(RecordingSink::default());
        let mut track = track(sink, TrackConfig::default());
        let mut reader = track.handle().subscribe(StartAt::Live);

        track.write_rtp(rtp(0, 0, &[1, 2, 3], true)).unwrap();
        assert_eq!(track.stats().dropped_frames, 1);

        track.write_config(Bytes::from_static(&ASC)).unwrap();
        track.write_rtp(rtp(1, 1024, &[4, 5, 6], true)).unwrap();

        let frame = reader.try_recv().unwrap();
        assert_eq!(frame.base.sequence, 1);
        assert_eq!(frame.raw()[0].as_bytes()[0], 4);
    }

    #[test]
    fn test_malformed_rtp_is_not_fatal() {
        let sink = Arc::new(RecordingSink::default());
        let mut track = track(sink.clone(), TrackConfig::default());
        track.write_config(Bytes::from_static(&ASC)).unwrap();
        let mut reader = track.handle().subscribe(StartAt::Live);

        assert!(track.write_rtp(Bytes::from_static(&[0x80, 97, 0])).is_err());
        track.write_rtp(rtp(0, 0, &[9], true)).unwrap();

        assert_eq!(reader.try_recv().unwrap().raw()[0].as_bytes()[0], 9);
        assert_eq!(track.stats().malformed, 1);
        assert_eq!(sink.errors.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_forms_disabled() {
        let sink = Arc::new(RecordingSink::default());
        let config = TrackConfig::default().avcc(false).flv(false).rtp(false);
        let mut track = track(sink, config);
        track.write_config(Bytes::from_static(&ASC)).unwrap();
        let mut reader = track.handle().subscribe(StartAt::Live);

        track.write_raw(Bytes::from_static(&[1, 2]), 0);

        let frame = reader.try_recv().unwrap();
        assert!(frame.avcc().is_none());
        assert!(frame.flv().is_empty());
        assert!(frame.rtp().is_empty());
    }
}
