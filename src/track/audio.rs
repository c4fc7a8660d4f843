//! Audio tracks
//!
//! `AudioTrack` drives the shared pipeline for every audio codec. The codec
//! half only knows its AVCC header and how to move access units in and out of
//! RTP payloads.

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::media::{AudioFormat, AudioSlice, FlvTagType};
use crate::rtp::{Delivery, RtpFrame};
use crate::stats::TrackStats;

use super::media::{Media, TrackHandle};

/// Codec-specific part of an audio track
pub trait AudioCodec: Send {
    fn format(&self) -> AudioFormat;

    /// Bytes preceding the access unit in AVCC form
    fn avcc_head(&self) -> &[u8];

    /// Access units completed by one RTP payload
    fn depacketize(&mut self, payload: Bytes) -> Result<Vec<Bytes>>;

    /// Forget partial state after packet loss
    fn reset(&mut self) {}

    /// RTP payloads for one frame
    fn packetize(&self, units: &[AudioSlice], mtu: usize) -> Vec<Bytes>;
}

/// Producer side of an audio track
pub struct AudioTrack<C> {
    media: Media<AudioSlice>,
    codec: C,
    sample_rate: u32,
    channels: u8,
}

impl<C: AudioCodec> AudioTrack<C> {
    pub(crate) fn from_parts(media: Media<AudioSlice>, codec: C) -> Self {
        let sample_rate = media.clock_rate();
        Self {
            media,
            codec,
            sample_rate,
            channels: 0,
        }
    }

    pub fn name(&self) -> &str {
        self.media.name()
    }

    pub fn format(&self) -> AudioFormat {
        self.codec.format()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn media(&self) -> &Media<AudioSlice> {
        &self.media
    }

    pub fn stats(&self) -> &TrackStats {
        self.media.stats()
    }

    pub fn is_attached(&self) -> bool {
        self.media.is_attached()
    }

    pub fn handle(&self) -> TrackHandle<AudioSlice> {
        self.media.handle()
    }

    pub fn set_payload_type(&mut self, payload_type: u8) {
        self.media.set_payload_type(payload_type);
    }

    pub(crate) fn set_format(&mut self, sample_rate: u32, channels: u8) {
        self.sample_rate = sample_rate;
        self.channels = channels;
        self.media.set_clock_rate(sample_rate);
    }

    pub(crate) fn parts_mut(&mut self) -> (&mut Media<AudioSlice>, &mut C) {
        (&mut self.media, &mut self.codec)
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
            self.codec.reset();
        }

        // A new timestamp without a marker means the boundary packet was lost
        let value = self.media.value();
        if !value.rtp().is_empty() && value.pts != frame.timestamp() {
            self.media.value_mut().lossy = true;
            self.flush();
        }

        self.media.set_rtp_timestamp(frame.timestamp());
        self.media.count_input(frame.raw().len());
        match self.codec.depacketize(frame.payload().clone()) {
            Ok(units) => self
                .media
                .value_mut()
                .append_raw(units.into_iter().map(AudioSlice::new)),
            Err(e) => {
                self.media.value_mut().lossy = true;
                self.media.reject("rtp payload", &e);
            }
        }

        let marker = frame.marker();
        self.media.value_mut().append_rtp([frame]);
        if marker {
            // An access unit never spans frames
            self.codec.reset();
            self.flush();
        }
    }

    /// Feed one coded access unit that arrived in AVCC form
    pub(crate) fn write_avcc_frame(&mut self, avcc: Bytes, data: Bytes, timestamp: u32) {
        self.media.set_timestamp_ms(timestamp, 0);
        self.media.count_input(avcc.len());
        let value = self.media.value_mut();
        value.append_avcc(avcc);
        value.append_raw([AudioSlice::new(data)]);
        self.flush();
    }

    /// Feed one bare access unit, timestamped in milliseconds
    pub fn write_raw(&mut self, data: Bytes, timestamp: u32) {
        self.media.set_timestamp_ms(timestamp, 0);
        self.media.count_input(data.len());
        self.media.value_mut().append_raw([AudioSlice::new(data)]);
        self.flush();
    }

    /// Complete the missing forms of the current frame and publish it
    pub fn flush(&mut self) {
        let media = &mut self.media;
        if media.is_attached() && !media.value().raw().is_empty() {
            let config = media.config();
            let (avcc, flv, rtp) = (config.wants_avcc(), config.enable_flv, config.enable_rtp);
            let mtu = media.mtu();
            let time = media.frame_time();

            let value = media.value_mut();
            if avcc {
                value.fill_avcc(self.codec.avcc_head());
            }
            if flv {
                value.fill_flv(FlvTagType::Audio, time);
            }
            if rtp && value.rtp().is_empty() && !value.raw().is_empty() {
                let payloads = self.codec.packetize(value.raw(), mtu);
                media.packetize_rtp(payloads);
            }
        }
        media.flush();
    }

    /// Report a rejected input through the track
    pub(crate) fn reject(&mut self, context: &str, error: &Error) {
        self.media.reject(context, error);
    }

    pub fn detach(&mut self) {
        self.media.detach();
    }
}
