//! Tracks: one producer, many subscribers
//!
//! A codec adapter turns RTP packets or AVCC frames into sealed frames and
//! publishes them into a fixed-capacity ring. Subscribers each own a cursor.
//!
//! # Architecture
//!
//! ```text
//!    RTP / AVCC input
//!          │
//!          ▼
//!   [AacTrack | G711Track | H264Track]   codec adapter (&mut self)
//!          │
//!          ▼
//!       Media<R>  ── attach_track() ──►  StreamSink
//!          │ publish(Arc<AvFrame<R>>)
//!          ▼
//!    RingBuffer<AvFrame<R>>
//!          │
//!   ┌──────┼──────────────┐
//!   ▼      ▼              ▼
//! [TrackReader]     [TrackReader]     recv() / try_recv()
//! ```
//!
//! # Overrun
//!
//! The producer never waits. A subscriber that falls a full ring behind gets
//! one `Lagged(n)` and continues from the oldest retained frame.

pub mod aac;
pub mod audio;
pub mod g711;
pub mod h264;
pub mod media;
pub mod ring;
pub mod stream;

pub use aac::{Aac, AacTrack};
pub use audio::{AudioCodec, AudioTrack};
pub use g711::{G711Law, G711Track, G711};
pub use h264::H264Track;
pub use media::{Media, TrackHandle, TrackReader};
pub use ring::{RingBuffer, RingProducer, RingReader, StartAt};
pub use stream::{AnyTrack, StreamSink, TrackSet};
