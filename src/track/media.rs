//! Codec-independent track producer
//!
//! `Media` owns the in-progress frame and everything a codec adapter needs to
//! finish it: the RTP reorder window, the packetizer for synthesized RTP, the
//! timeline and the ring the sealed frame is published into.
//!
//! ```text
//!  RTP ──> ReorderQueue ──> adapter depacketizes ──┐
//!  AVCC ─────────────────> adapter splits ─────────┤
//!                                                  v
//!                       value: AvFrame<R> (raw units appended)
//!                                                  │ flush()
//!                                                  v
//!               RingProducer ── publish(Arc) ──> readers
//!                     │
//!                     └── evicted frame, reset and reused as next value
//! ```

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::TrackConfig;
use crate::error::{Error, RecvError, Result, RtpError, SendError, TrackError, TryRecvError};
use crate::media::{AvFrame, DecoderConfiguration, RawUnit};
use crate::rtp::{Arrival, Delivery, ReorderQueue, RtpFrame, RtpPacketizer};
use crate::stats::TrackStats;

use super::ring::{RingBuffer, RingProducer, RingReader, StartAt};
use super::stream::{AnyTrack, StreamSink};

/// Converts RTP ticks to milliseconds across timestamp wraparound
#[derive(Debug, Default)]
struct Timeline {
    last_rtp: Option<u32>,
    ticks: u64,
}

impl Timeline {
    fn to_ms(&mut self, timestamp: u32, clock_rate: u32) -> u32 {
        match self.last_rtp {
            None => self.last_rtp = Some(timestamp),
            Some(last) => {
                let delta = timestamp.wrapping_sub(last) as i32;
                // Timestamps running backwards (B-frames, reordering) do not move the clock
                if delta > 0 {
                    self.ticks += delta as u64;
                    self.last_rtp = Some(timestamp);
                }
            }
        }
        (self.ticks * 1000 / clock_rate.max(1) as u64) as u32
    }
}

fn ssrc_for(name: &str) -> u32 {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish() as u32
}

/// Producer side of one track
pub struct Media<R: RawUnit> {
    name: Arc<str>,
    config: TrackConfig,
    sink: Arc<dyn StreamSink>,
    producer: RingProducer<AvFrame<R>>,
    value: AvFrame<R>,
    decoder_tx: watch::Sender<Arc<DecoderConfiguration<R>>>,
    attached: bool,
    clock_rate: u32,
    sequence: u32,
    last_abs_time: u32,
    timeline: Timeline,
    reorder: ReorderQueue,
    packetizer: RtpPacketizer,
    stats: TrackStats,
}

impl<R: RawUnit> Media<R>
where
    TrackHandle<R>: Into<AnyTrack>,
{
    pub fn new(
        name: &str,
        config: TrackConfig,
        sink: Arc<dyn StreamSink>,
        clock_rate: u32,
        payload_type: u8,
    ) -> Self {
        let (decoder_tx, _) = watch::channel(Arc::new(DecoderConfiguration {
            payload_type,
            ..Default::default()
        }));
        let reorder = if config.rtp_reorder {
            ReorderQueue::new(config.reorder_window)
        } else {
            ReorderQueue::passthrough()
        };

        Self {
            name: Arc::from(name),
            producer: RingBuffer::with_capacity(config.ring_capacity),
            packetizer: RtpPacketizer::new(payload_type, ssrc_for(name), config.rtp_mtu),
            value: AvFrame::new(),
            decoder_tx,
            attached: false,
            clock_rate,
            sequence: 0,
            last_abs_time: 0,
            timeline: Timeline::default(),
            reorder,
            stats: TrackStats::new(name),
            sink,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &TrackConfig {
        &self.config
    }

    pub fn clock_rate(&self) -> u32 {
        self.clock_rate
    }

    pub fn set_clock_rate(&mut self, clock_rate: u32) {
        self.clock_rate = clock_rate;
    }

    pub fn stats(&self) -> &TrackStats {
        &self.stats
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Subscriber handle
    pub fn handle(&self) -> TrackHandle<R> {
        TrackHandle {
            name: Arc::clone(&self.name),
            ring: Arc::clone(self.producer.ring()),
            decoder: self.decoder_tx.subscribe(),
            poll_interval: self.config.poll_interval,
        }
    }

    /// The frame being assembled
    pub fn value(&self) -> &AvFrame<R> {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut AvFrame<R> {
        &mut self.value
    }

    pub fn decoder_configuration(&self) -> Arc<DecoderConfiguration<R>> {
        Arc::clone(&self.decoder_tx.borrow())
    }

    /// Install a new decoder configuration and attach the track if needed
    pub fn set_decoder_configuration(&mut self, mut config: DecoderConfiguration<R>) {
        config.sequence = self.decoder_tx.borrow().sequence + 1;
        self.packetizer.set_payload_type(config.payload_type);

        tracing::info!(
            track = %self.name,
            sequence = config.sequence,
            payload_type = config.payload_type,
            bytes = config.avcc.len(),
            "Decoder configuration updated"
        );
        self.decoder_tx.send_replace(Arc::new(config));

        if !self.attached {
            self.attached = true;
            self.sink.attach_track(self.handle().into());
        }
    }

    /// Log, count and forward rejected input
    pub fn reject(&mut self, context: &str, error: &Error) {
        self.stats.malformed += 1;
        tracing::warn!(track = %self.name, context = %context, error = %error, "Input dropped");
        self.sink.report_error(context, error);
    }

    /// Count input bytes towards the current frame
    pub fn count_input(&mut self, bytes: usize) {
        self.value.base.bytes_in += bytes;
    }

    /// Parse and queue one serialized RTP packet
    pub fn write_rtp(&mut self, raw: Bytes) -> Result<()> {
        let frame = RtpFrame::unmarshal(raw)?;
        self.push_rtp(frame)
    }

    /// Queue one parsed RTP packet
    pub fn push_rtp(&mut self, frame: RtpFrame) -> Result<()> {
        if self.producer.ring().is_closed() {
            return Err(TrackError::Closed(self.name.to_string()).into());
        }
        let expected = self.packetizer.payload_type();
        if frame.payload_type() != expected {
            return Err(RtpError::PayloadTypeMismatch {
                expected,
                actual: frame.payload_type(),
            }
            .into());
        }
        if frame.payload().is_empty() {
            return Err(RtpError::EmptyPayload.into());
        }

        self.stats.rtp_packets += 1;
        let seq = frame.sequence_number();
        match self.reorder.push(frame) {
            Arrival::Accepted | Arrival::Parked => {}
            Arrival::Late | Arrival::Duplicate => {
                self.stats.rtp_late += 1;
                tracing::debug!(track = %self.name, seq = seq, "Late RTP packet dropped");
            }
        }
        Ok(())
    }

    /// Next packet released by the reorder window. Loss before it marks the
    /// current frame lossy.
    pub fn next_rtp_frame(&mut self) -> Option<Delivery> {
        let delivery = self.reorder.next_rtp_frame()?;
        if delivery.lost_before > 0 {
            self.value.lossy = true;
            self.stats.rtp_lost += delivery.lost_before;
            tracing::warn!(
                track = %self.name,
                lost = delivery.lost_before,
                seq = delivery.frame.sequence_number(),
                "RTP packets lost"
            );
        }
        Some(delivery)
    }

    /// Stamp the current frame from an RTP timestamp
    pub fn set_rtp_timestamp(&mut self, timestamp: u32) {
        self.value.pts = timestamp;
        self.value.dts = timestamp;
        self.value.base.abs_time = self.timeline.to_ms(timestamp, self.clock_rate);
    }

    /// Stamp the current frame from a millisecond timestamp and composition offset
    pub fn set_timestamp_ms(&mut self, timestamp: u32, cts: i32) {
        let rate = self.clock_rate as i64;
        let dts = timestamp as i64 * rate / 1000;
        self.value.base.abs_time = timestamp;
        self.value.dts = dts as u32;
        self.value.pts = (dts + cts as i64 * rate / 1000) as u32;
    }

    /// Build RTP packets for the current frame unless it already has some
    pub fn packetize_rtp(&mut self, payloads: Vec<Bytes>) {
        if !self.value.rtp().is_empty() {
            return;
        }
        let packets = self.packetizer.packetize(payloads, self.value.pts);
        self.value.append_rtp(packets);
    }

    pub fn mtu(&self) -> usize {
        self.packetizer.mtu()
    }

    pub fn payload_type(&self) -> u8 {
        self.packetizer.payload_type()
    }

    /// Expect a different RTP payload type on ingest and use it on egress
    pub fn set_payload_type(&mut self, payload_type: u8) {
        self.packetizer.set_payload_type(payload_type);
    }

    /// Absolute time the current frame will be published with
    pub fn frame_time(&self) -> u32 {
        self.value.base.abs_time.max(self.last_abs_time)
    }

    /// Seal the current frame and publish it
    pub fn flush(&mut self) {
        if self.value.raw().is_empty() {
            if !self.value.rtp().is_empty() || self.value.avcc().is_some() {
                self.stats.dropped_frames += 1;
                tracing::debug!(track = %self.name, "Frame dropped, no payload recovered");
            }
            self.value.reset();
            return;
        }

        if !self.attached {
            self.stats.dropped_frames += 1;
            tracing::debug!(track = %self.name, "Frame dropped, track not attached");
            self.value.reset();
            return;
        }

        let abs_time = self.frame_time();
        let raw_len = self.value.raw_len();
        let base = &mut self.value.base;
        base.delta_time = if self.sequence == 0 {
            0
        } else {
            abs_time - self.last_abs_time
        };
        base.abs_time = abs_time;
        base.received_at = Instant::now();
        self.sequence += 1;
        base.sequence = self.sequence;
        if base.bytes_in == 0 {
            base.bytes_in = raw_len;
        }
        self.last_abs_time = abs_time;

        let keyframe = self.value.keyframe;
        self.stats.record_frame(
            self.value.base.bytes_in,
            keyframe,
            self.value.lossy,
            abs_time,
        );

        let frame = std::mem::take(&mut self.value);
        match self.producer.publish(Arc::new(frame), keyframe) {
            Ok(Some(evicted)) => {
                // Reuse the evicted frame's buffers when no reader still holds it
                if let Ok(mut recycled) = Arc::try_unwrap(evicted) {
                    recycled.reset();
                    self.value = recycled;
                }
            }
            Ok(None) => {}
            Err(SendError(_)) => {
                tracing::debug!(track = %self.name, "Frame dropped, track closed");
            }
        }
    }

    /// Tear the track down: readers drain and then see `Closed`
    pub fn detach(&mut self) {
        self.producer.close();
        self.reorder.flush();
        if self.attached {
            self.attached = false;
            self.sink.detach_track(&self.name);
        }
    }
}

impl<R: RawUnit> Drop for Media<R> {
    fn drop(&mut self) {
        self.producer.close();
        if self.attached {
            self.sink.detach_track(&self.name);
        }
    }
}

/// Subscriber-side handle of a track
pub struct TrackHandle<R> {
    name: Arc<str>,
    ring: Arc<RingBuffer<AvFrame<R>>>,
    decoder: watch::Receiver<Arc<DecoderConfiguration<R>>>,
    poll_interval: Duration,
}

impl<R> Clone for TrackHandle<R> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            ring: Arc::clone(&self.ring),
            decoder: self.decoder.clone(),
            poll_interval: self.poll_interval,
        }
    }
}

impl<R> std::fmt::Debug for TrackHandle<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackHandle")
            .field("name", &self.name)
            .field("closed", &self.ring.is_closed())
            .field("sequence", &self.decoder.borrow().sequence)
            .finish()
    }
}

impl<R: RawUnit> TrackHandle<R> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn decoder_configuration(&self) -> Arc<DecoderConfiguration<R>> {
        Arc::clone(&self.decoder.borrow())
    }

    pub fn is_closed(&self) -> bool {
        self.ring.is_closed()
    }

    pub fn subscriber_count(&self) -> usize {
        self.ring.reader_count()
    }

    pub fn subscribe(&self, start: StartAt) -> TrackReader<R> {
        TrackReader {
            reader: self
                .ring
                .subscribe(start)
                .with_poll_interval(self.poll_interval),
            decoder: self.decoder.clone(),
            seen_sequence: 0,
        }
    }
}

/// One subscriber: a ring cursor plus decoder-configuration change tracking
pub struct TrackReader<R> {
    reader: RingReader<AvFrame<R>>,
    decoder: watch::Receiver<Arc<DecoderConfiguration<R>>>,
    seen_sequence: u32,
}

impl<R: RawUnit> TrackReader<R> {
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.reader = self.reader.with_cancellation(token);
        self
    }

    pub async fn recv(&mut self) -> std::result::Result<Arc<AvFrame<R>>, RecvError> {
        self.reader.recv().await
    }

    pub fn try_recv(&mut self) -> std::result::Result<Arc<AvFrame<R>>, TryRecvError> {
        self.reader.try_recv()
    }

    pub fn decoder_configuration(&self) -> Arc<DecoderConfiguration<R>> {
        Arc::clone(&self.decoder.borrow())
    }

    /// The decoder configuration, if it changed since the last call
    pub fn config_change(&mut self) -> Option<Arc<DecoderConfiguration<R>>> {
        let config = self.decoder_configuration();
        if config.sequence == self.seen_sequence {
            return None;
        }
        self.seen_sequence = config.sequence;
        Some(config)
    }

    /// Sequence number of the next frame in the ring
    pub fn position(&self) -> u64 {
        self.reader.position()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::media::{flv::FlvTagType, AudioSlice};

    /// Sink that records what it was told
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub attached: Mutex<Vec<String>>,
        pub detached: Mutex<Vec<String>>,
        pub errors: Mutex<Vec<String>>,
    }

    impl StreamSink for RecordingSink {
        fn attach_track(&self, track: AnyTrack) {
            self.attached.lock().unwrap().push(track.name().to_string());
        }

        fn detach_track(&self, name: &str) {
            self.detached.lock().unwrap().push(name.to_string());
        }

        fn report_error(&self, context: &str, error: &Error) {
            self.errors
                .lock()
                .unwrap()
                .push(format!("{}: {}", context, error));
        }
    }

    fn audio_config() -> DecoderConfiguration<AudioSlice> {
        let avcc = Bytes::from_static(&[0xAF, 0x00, 0x12, 0x10]);
        DecoderConfiguration::new(97, FlvTagType::Audio, avcc.clone(), AudioSlice::new(avcc.slice(2..)))
    }

    fn media(sink: Arc<RecordingSink>, config: TrackConfig) -> Media<AudioSlice> {
        Media::new("test", config, sink, 44100, 97)
    }

    fn write_frame(media: &mut Media<AudioSlice>, ts: u32, data: &'static [u8]) {
        media.set_timestamp_ms(ts, 0);
        media.value_mut().append_raw([AudioSlice::new(Bytes::from_static(data))]);
        media.flush();
    }

    #[test]
    fn test_timeline_wraps() {
        let mut timeline = Timeline::default();
        assert_eq!(timeline.to_ms(u32::MAX - 899, 90_000), 0);
        assert_eq!(timeline.to_ms(8100, 90_000), 100);
        // Backwards timestamps hold the clock
        assert_eq!(timeline.to_ms(4000, 90_000), 100);
        assert_eq!(timeline.to_ms(17100, 90_000), 200);
    }

    #[test]
    fn test_frames_before_attach_are_dropped() {
        let sink = Arc::new(RecordingSink::default());
        let mut media = media(sink.clone(), TrackConfig::default());
        let mut reader = media.handle().subscribe(StartAt::Live);

        write_frame(&mut media, 0, &[1, 2]);
        assert_eq!(media.stats().dropped_frames, 1);
        assert!(media.value().raw().is_empty());
        assert_eq!(reader.try_recv().unwrap_err(), TryRecvError::Empty);
        assert!(sink.attached.lock().unwrap().is_empty());
    }

    #[test]
    fn test_frame_without_raw_units_dropped() {
        let sink = Arc::new(RecordingSink::default());
        let mut media = media(sink, TrackConfig::default());
        media.set_decoder_configuration(audio_config());
        let mut reader = media.handle().subscribe(StartAt::Live);

        media.value_mut().append_avcc(Bytes::from_static(&[0xAF, 0x01]));
        media.flush();

        assert_eq!(media.stats().dropped_frames, 1);
        assert!(media.value().avcc().is_none());
        assert_eq!(reader.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[test]
    fn test_attach_once_and_publish() {
        let sink = Arc::new(RecordingSink::default());
        let mut media = media(sink.clone(), TrackConfig::default());

        media.set_decoder_configuration(audio_config());
        media.set_decoder_configuration(audio_config());
        assert_eq!(*sink.attached.lock().unwrap(), vec!["test".to_string()]);
        assert_eq!(media.decoder_configuration().sequence, 2);

        let mut reader = media.handle().subscribe(StartAt::Live);
        write_frame(&mut media, 0, &[1]);
        write_frame(&mut media, 23, &[2]);
        write_frame(&mut media, 46, &[3]);

        for (i, expected_time) in [0u32, 23, 46].into_iter().enumerate() {
            let frame = reader.try_recv().unwrap();
            assert_eq!(frame.base.sequence, i as u32 + 1);
            assert_eq!(frame.base.abs_time, expected_time);
            assert_eq!(frame.base.delta_time, if i == 0 { 0 } else { 23 });
        }
    }

    #[test]
    fn test_abs_time_never_decreases() {
        let sink = Arc::new(RecordingSink::default());
        let mut media = media(sink, TrackConfig::default());
        media.set_decoder_configuration(audio_config());
        let mut reader = media.handle().subscribe(StartAt::Live);

        write_frame(&mut media, 100, &[1]);
        write_frame(&mut media, 50, &[2]);

        assert_eq!(reader.try_recv().unwrap().base.abs_time, 100);
        let second = reader.try_recv().unwrap();
        assert_eq!(second.base.abs_time, 100);
        assert_eq!(second.base.delta_time, 0);
    }

    #[test]
    fn test_evicted_frame_recycled() {
        let sink = Arc::new(RecordingSink::default());
        let mut media = media(sink, TrackConfig::default().ring_capacity(1));
        media.set_decoder_configuration(audio_config());

        write_frame(&mut media, 0, &[1]);
        write_frame(&mut media, 10, &[2]);

        // The first frame came back reset
        assert!(media.value().raw().is_empty());
        assert!(media.value().avcc().is_none());
        assert_eq!(media.value().base.sequence, 0);
    }

    #[test]
    fn test_payload_type_mismatch() {
        let sink = Arc::new(RecordingSink::default());
        let mut media = media(sink, TrackConfig::default());

        let packet = RtpFrame::new(crate::rtp::RtpHeader::new(0, 1, 0, 1), Bytes::from_static(&[1]));
        let err = media.push_rtp(packet).unwrap_err();
        assert_eq!(
            err,
            Error::Rtp(RtpError::PayloadTypeMismatch {
                expected: 97,
                actual: 0
            })
        );
    }

    #[test]
    fn test_detach_closes_readers() {
        let sink = Arc::new(RecordingSink::default());
        let mut media = media(sink.clone(), TrackConfig::default());
        media.set_decoder_configuration(audio_config());
        let handle = media.handle();
        let mut reader = handle.subscribe(StartAt::Live);

        write_frame(&mut media, 0, &[1]);
        media.detach();
        write_frame(&mut media, 10, &[2]);

        assert!(handle.is_closed());
        assert_eq!(reader.try_recv().unwrap().base.sequence, 1);
        let packet = RtpFrame::new(crate::rtp::RtpHeader::new(97, 1, 0, 1), Bytes::from_static(&[1]));
        assert_eq!(
            media.push_rtp(packet).unwrap_err(),
            Error::Track(TrackError::Closed("test".into()))
        );
        assert_eq!(reader.try_recv().unwrap_err(), TryRecvError::Closed);
        assert_eq!(*sink.detached.lock().unwrap(), vec!["test".to_string()]);
    }

    #[test]
    fn test_drop_detaches() {
        let sink = Arc::new(RecordingSink::default());
        let handle = {
            let mut media = media(sink.clone(), TrackConfig::default());
            media.set_decoder_configuration(audio_config());
            media.handle()
        };

        assert!(handle.is_closed());
        assert_eq!(sink.detached.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_reader_config_change() {
        let sink = Arc::new(RecordingSink::default());
        let mut media = media(sink, TrackConfig::default());
        let mut reader = media.handle().subscribe(StartAt::Live);

        assert!(reader.config_change().is_none());
        media.set_decoder_configuration(audio_config());

        let config = reader.config_change().unwrap();
        assert_eq!(config.sequence, 1);
        assert!(reader.config_change().is_none());
    }
}
