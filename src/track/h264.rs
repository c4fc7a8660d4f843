//! H.264 track
//!
//! The decoder configuration comes either from an AVCC sequence header or from
//! SPS/PPS NAL units seen in band on the RTP path. A new SPS or PPS that
//! differs from the current one replaces the configuration.

use std::sync::Arc;

use bytes::Bytes;

use crate::config::TrackConfig;
use crate::error::{Error, MediaError, Result};
use crate::media::h264::{self, H264_CLOCK_RATE, H264_PAYLOAD_TYPE};
use crate::media::{
    AvcConfig, AvccFrame, DecoderConfiguration, FlvTagType, H264Data, NaluDepacketizer, NaluSlice,
    NaluType, VideoCodec, VideoFrameType,
};
use crate::rtp::{Delivery, RtpFrame};
use crate::stats::TrackStats;

use super::media::{Media, TrackHandle};
use super::stream::StreamSink;

/// Producer side of an H.264 track
pub struct H264Track {
    media: Media<NaluSlice>,
    depacketizer: NaluDepacketizer,
    config: Option<AvcConfig>,
    sps: Option<Bytes>,
    pps: Option<Bytes>,
    /// In-band SPS or PPS changed during the current frame
    parameter_sets_changed: bool,
    nalu_length_size: u8,
}

impl H264Track {
    pub fn new(name: &str, config: TrackConfig, sink: Arc<dyn StreamSink>) -> Self {
        Self {
            media: Media::new(name, config, sink, H264_CLOCK_RATE, H264_PAYLOAD_TYPE),
            depacketizer: NaluDepacketizer::new(),
            config: None,
            sps: None,
            pps: None,
            parameter_sets_changed: false,
            nalu_length_size: 4,
        }
    }

    pub fn name(&self) -> &str {
        self.media.name()
    }

    pub fn media(&self) -> &Media<NaluSlice> {
        &self.media
    }

    pub fn stats(&self) -> &TrackStats {
        self.media.stats()
    }

    pub fn is_attached(&self) -> bool {
        self.media.is_attached()
    }

    pub fn handle(&self) -> TrackHandle<NaluSlice> {
        self.media.handle()
    }

    pub fn avc_config(&self) -> Option<&AvcConfig> {
        self.config.as_ref()
    }

    pub fn set_payload_type(&mut self, payload_type: u8) {
        self.media.set_payload_type(payload_type);
    }

    /// Feed one AVCC video tag body
    pub fn write_avcc(&mut self, data: Bytes, timestamp: u32) -> Result<()> {
        let nalu_length_size = self.nalu_length_size;
        let parsed = AvccFrame::new(data).and_then(|frame| {
            if frame.video_codec() != Some(VideoCodec::Avc) {
                return Err(MediaError::InvalidAvcPacket.into());
            }
            let body = H264Data::parse(frame.body(1), nalu_length_size)?;
            Ok((frame, body))
        });

        match parsed {
            Ok((_, H264Data::SequenceHeader(config))) => self.apply_config(config),
            Ok((
                frame,
                H264Data::Frame {
                    keyframe,
                    composition_time,
                    nalus,
                },
            )) => {
                if nalus.is_empty() {
                    let e: Error = MediaError::EmptyAvcFrame.into();
                    self.media.reject("h264 avcc", &e);
                    return Err(e);
                }
                self.media.set_timestamp_ms(timestamp, composition_time);
                self.media.count_input(frame.len());
                let value = self.media.value_mut();
                value.keyframe = keyframe || frame.is_idr();
                value.append_avcc(frame.into_bytes());
                value.append_raw(nalus.into_iter().map(NaluSlice::new));
                self.flush();
            }
            Ok((_, H264Data::EndOfSequence)) => {
                tracing::info!(track = %self.name(), "H.264 end of sequence");
            }
            Err(e) => {
                self.media.reject("h264 avcc", &e);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Feed one serialized RTP packet
    pub fn write_rtp(&mut self, raw: Bytes) -> Result<()> {
        let result = self.media.write_rtp(raw);
        self.after_rtp(result)
    }

    /// Feed one parsed RTP packet
    pub fn push_rtp(&mut self, frame: RtpFrame) -> Result<()> {
        let result = self.media.push_rtp(frame);
        self.after_rtp(result)
    }

    fn after_rtp(&mut self, result: Result<()>) -> Result<()> {
        if let Err(e) = &result {
            self.media.reject("rtp", e);
        }
        while let Some(delivery) = self.media.next_rtp_frame() {
            self.write_rtp_frame(delivery);
        }
        result
    }

    fn write_rtp_frame(&mut self, Delivery { frame, lost_before }: Delivery) {
        if lost_before > 0 {
            self.depacketizer.reset();
        }

        let value = self.media.value();
        if !value.rtp().is_empty() && value.pts != frame.timestamp() {
            self.media.value_mut().lossy = true;
            self.flush();
        }

        self.media.set_rtp_timestamp(frame.timestamp());
        self.media.count_input(frame.raw().len());
        match self.depacketizer.push(frame.payload().clone()) {
            Ok(nalus) => {
                for nalu in nalus {
                    self.write_nalu(nalu);
                }
            }
            Err(e) => {
                self.media.value_mut().lossy = true;
                self.media.reject("rtp payload", &e);
            }
        }

        let marker = frame.marker();
        self.media.value_mut().append_rtp([frame]);
        if marker {
            self.flush();
        }
    }

    fn write_nalu(&mut self, nalu: NaluSlice) {
        match nalu.nalu_type() {
            Some(t) if t.is_parameter_set() => {
                let slot = if t == NaluType::Sps {
                    &mut self.sps
                } else {
                    &mut self.pps
                };
                let bytes = nalu.to_bytes();
                if slot.as_ref() != Some(&bytes) {
                    *slot = Some(bytes);
                    self.parameter_sets_changed = true;
                }
            }
            Some(t) if t.is_keyframe() => self.media.value_mut().keyframe = true,
            _ => {}
        }
        self.media.value_mut().append_raw([nalu]);
    }

    /// Build a configuration from the in-band parameter sets once the frame
    /// carrying them is complete
    fn update_parameter_sets(&mut self) {
        if !std::mem::take(&mut self.parameter_sets_changed) {
            return;
        }
        let (Some(sps), Some(pps)) = (self.sps.clone(), self.pps.clone()) else {
            return;
        };
        match AvcConfig::from_parameter_sets(sps, pps) {
            Ok(config) => self.apply_config(config),
            Err(e) => self.media.reject("h264 parameter sets", &e),
        }
    }

    fn apply_config(&mut self, config: AvcConfig) {
        tracing::info!(
            track = %self.name(),
            profile = config.profile_name(),
            level = %config.level_string(),
            "H.264 configuration"
        );
        self.nalu_length_size = config.nalu_length_size;
        self.sps = config.sps.first().cloned();
        self.pps = config.pps.first().cloned();
        self.parameter_sets_changed = false;

        let decoder = DecoderConfiguration::new(
            self.media.payload_type(),
            FlvTagType::Video,
            config.sequence_header(),
            config.parameter_sets(),
        );
        self.config = Some(config);
        self.media.set_decoder_configuration(decoder);
    }

    /// Complete the missing forms of the current frame and publish it
    pub fn flush(&mut self) {
        self.update_parameter_sets();
        let media = &mut self.media;
        if media.is_attached() && !media.value().raw().is_empty() {
            let config = media.config();
            let (avcc, flv, rtp) = (config.wants_avcc(), config.enable_flv, config.enable_rtp);
            let aggregate = config.rtp_aggregate;
            let mtu = media.mtu();
            let time = media.frame_time();
            let clock_rate = media.clock_rate() as i64;

            let value = media.value_mut();
            if avcc {
                let frame_type = if value.keyframe {
                    VideoFrameType::Keyframe
                } else {
                    VideoFrameType::InterFrame
                };
                let cts = value.pts.wrapping_sub(value.dts) as i32 as i64 * 1000 / clock_rate;
                let cts = (cts as i32).to_be_bytes();
                let head = [
                    ((frame_type as u8) << 4) | VideoCodec::Avc as u8,
                    1,
                    cts[1],
                    cts[2],
                    cts[3],
                ];
                value.fill_avcc(&head);
            }
            if flv {
                value.fill_flv(FlvTagType::Video, time);
            }
            if rtp && value.rtp().is_empty() && !value.raw().is_empty() {
                let payloads = h264::packetize(value.raw(), mtu, aggregate);
                media.packetize_rtp(payloads);
            }
        }
        media.flush();
    }

    pub fn detach(&mut self) {
        self.media.detach();
    }
}
