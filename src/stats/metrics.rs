//! Per-track counters

use std::time::{Duration, Instant};

/// Track-level statistics, owned by the producer
#[derive(Debug, Clone)]
pub struct TrackStats {
    /// Track name
    pub track: String,
    pub started_at: Instant,
    /// Input bytes that made it into frames
    pub bytes_in: u64,
    /// Frames published
    pub frames: u64,
    pub keyframes: u64,
    /// Frames marked lossy
    pub lossy_frames: u64,
    /// Frames discarded before publishing: track not attached or nothing recovered
    pub dropped_frames: u64,
    pub rtp_packets: u64,
    /// RTP packets declared missing by the reorder window
    pub rtp_lost: u64,
    /// RTP packets that arrived late or duplicated
    pub rtp_late: u64,
    /// Input rejected as malformed
    pub malformed: u64,
    /// Absolute time of the last frame, in ms
    pub last_timestamp: u32,
}

impl TrackStats {
    pub fn new(track: impl Into<String>) -> Self {
        Self {
            track: track.into(),
            started_at: Instant::now(),
            bytes_in: 0,
            frames: 0,
            keyframes: 0,
            lossy_frames: 0,
            dropped_frames: 0,
            rtp_packets: 0,
            rtp_lost: 0,
            rtp_late: 0,
            malformed: 0,
            last_timestamp: 0,
        }
    }

    /// Account for one published frame
    pub fn record_frame(&mut self, bytes: usize, keyframe: bool, lossy: bool, abs_time: u32) {
        self.frames += 1;
        self.bytes_in += bytes as u64;
        self.last_timestamp = abs_time;
        if keyframe {
            self.keyframes += 1;
        }
        if lossy {
            self.lossy_frames += 1;
        }
    }

    /// Time since the track was created
    pub fn duration(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Bitrate in bits per second over the track's lifetime
    pub fn bitrate(&self) -> u64 {
        bitrate(self.bytes_in, self.duration())
    }

    /// Fraction of RTP packets lost, 0.0..=1.0
    pub fn loss_ratio(&self) -> f64 {
        let expected = self.rtp_packets + self.rtp_lost;
        if expected == 0 {
            0.0
        } else {
            self.rtp_lost as f64 / expected as f64
        }
    }
}

fn bitrate(bytes: u64, elapsed: Duration) -> u64 {
    let secs = elapsed.as_secs();
    if secs > 0 {
        (bytes * 8) / secs
    } else {
        0
    }
}
