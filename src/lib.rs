//! Live media track pipeline
//!
//! Ingests audio and video as RTP packets or AVCC frames, keeps every frame
//! in the forms downstream protocols want (raw units, AVCC, FLV tags, RTP
//! packets) and fans sealed frames out to any number of subscribers through a
//! per-track ring buffer.
//!
//! Derived forms are built lazily and at most once per frame. Subscribers
//! share the same `Arc` frame; nothing is copied per subscriber.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use avring::track::{AacTrack, StartAt, StreamSink, TrackSet};
//! use avring::TrackConfig;
//! use bytes::Bytes;
//!
//! # async fn run() -> avring::Result<()> {
//! let stream = Arc::new(TrackSet::new("live/demo"));
//! let sink: Arc<dyn StreamSink> = stream.clone();
//! let mut aac = AacTrack::new("aac", TrackConfig::default(), sink);
//!
//! aac.write_config(Bytes::from_static(&[0x12, 0x10]))?;
//! let mut reader = aac.handle().subscribe(StartAt::Live);
//!
//! aac.write_raw(Bytes::from_static(&[0x21, 0x10, 0x05]), 0);
//! let frame = reader.recv().await.unwrap();
//! assert_eq!(frame.base.sequence, 1);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod media;
pub mod rtp;
pub mod stats;
pub mod track;

pub use config::TrackConfig;
pub use error::{Error, MediaError, RecvError, Result, RtpError, TrackError, TryRecvError};
pub use media::{AvFrame, DecoderConfiguration};
pub use track::{AnyTrack, StartAt, StreamSink, TrackHandle, TrackReader};
