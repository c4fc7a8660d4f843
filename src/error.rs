//! Error types
//!
//! Producer-side errors are recovered locally by the track (the offending input
//! is dropped and logged). They are surfaced as values so callers and the stream
//! collaborator can report them.

use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("media error: {0}")]
    Media(#[from] MediaError),

    #[error("rtp error: {0}")]
    Rtp(#[from] RtpError),

    #[error("track error: {0}")]
    Track(#[from] TrackError),

    #[error("config error: {0}")]
    Config(String),
}

/// Codec framing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("invalid AAC packet")]
    InvalidAacPacket,

    #[error("invalid ADTS header")]
    InvalidAdtsHeader,

    #[error("invalid AVC packet")]
    InvalidAvcPacket,

    #[error("AVCC frame too short: {0} bytes")]
    AvccTooShort(usize),

    #[error("AVC frame carries no NAL units")]
    EmptyAvcFrame,

    #[error("decoder configuration too short: {0} bytes")]
    DecoderConfigTooShort(usize),
}

/// RTP parsing and reassembly errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RtpError {
    #[error("buffer too small: need {required} bytes, have {available}")]
    BufferTooSmall { required: usize, available: usize },

    #[error("unsupported RTP version {0}")]
    InvalidVersion(u8),

    #[error("invalid padding length {0}")]
    InvalidPadding(usize),

    #[error("payload type mismatch: expected {expected}, got {actual}")]
    PayloadTypeMismatch { expected: u8, actual: u8 },

    #[error("empty RTP payload")]
    EmptyPayload,

    #[error("malformed {codec} payload")]
    MalformedPayload { codec: &'static str },
}

/// Track lifecycle errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackError {
    #[error("track {0} has no decoder configuration")]
    NotConfigured(String),

    #[error("track {0} is closed")]
    Closed(String),
}

/// Error returned by an async subscriber read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RecvError {
    /// The subscriber fell behind; this many frames were skipped
    #[error("subscriber lagged by {0} frames")]
    Lagged(u64),

    /// The track was torn down and every frame has been read
    #[error("track closed")]
    Closed,

    /// The subscriber's cancellation token fired
    #[error("receive cancelled")]
    Cancelled,
}

/// Error returned by a non-blocking subscriber read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TryRecvError {
    #[error("no new frame")]
    Empty,

    #[error("subscriber lagged by {0} frames")]
    Lagged(u64),

    #[error("track closed")]
    Closed,
}

/// Error returned when publishing into a closed ring; hands the value back
#[derive(Debug, PartialEq, Eq, Error)]
#[error("publishing into a closed ring")]
pub struct SendError<T>(pub T);
