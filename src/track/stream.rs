//! Stream boundary
//!
//! A track never owns its stream. It is handed an `Arc<dyn StreamSink>` and
//! announces itself through it once its decoder configuration is known.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::error::{Error, Result, TrackError};
use crate::media::{AudioSlice, NaluSlice};

use super::media::TrackHandle;

/// The stream a track belongs to
pub trait StreamSink: Send + Sync {
    /// A track became decodable and can be subscribed to
    fn attach_track(&self, track: AnyTrack);

    /// A track was torn down
    fn detach_track(&self, name: &str);

    /// Input on a track was rejected
    fn report_error(&self, context: &str, error: &Error);
}

/// Subscriber handle for any kind of track
#[derive(Clone)]
pub enum AnyTrack {
    Audio(TrackHandle<AudioSlice>),
    Video(TrackHandle<NaluSlice>),
}

impl AnyTrack {
    pub fn name(&self) -> &str {
        match self {
            AnyTrack::Audio(t) => t.name(),
            AnyTrack::Video(t) => t.name(),
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, AnyTrack::Audio(_))
    }

    pub fn as_audio(&self) -> Option<&TrackHandle<AudioSlice>> {
        match self {
            AnyTrack::Audio(t) => Some(t),
            AnyTrack::Video(_) => None,
        }
    }

    pub fn as_video(&self) -> Option<&TrackHandle<NaluSlice>> {
        match self {
            AnyTrack::Video(t) => Some(t),
            AnyTrack::Audio(_) => None,
        }
    }
}

impl std::fmt::Debug for AnyTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_audio() { "audio" } else { "video" };
        f.debug_struct("AnyTrack")
            .field("kind", &kind)
            .field("name", &self.name())
            .finish()
    }
}

impl From<TrackHandle<AudioSlice>> for AnyTrack {
    fn from(handle: TrackHandle<AudioSlice>) -> Self {
        AnyTrack::Audio(handle)
    }
}

impl From<TrackHandle<NaluSlice>> for AnyTrack {
    fn from(handle: TrackHandle<NaluSlice>) -> Self {
        AnyTrack::Video(handle)
    }
}

/// Minimal stream: keeps attached tracks by name
#[derive(Default)]
pub struct TrackSet {
    name: String,
    tracks: Mutex<HashMap<String, AnyTrack>>,
    errors: AtomicU64,
}

impl TrackSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn get(&self, name: &str) -> Option<AnyTrack> {
        self.lock().get(name).cloned()
    }

    /// Attached audio track by name
    pub fn audio(&self, name: &str) -> Result<TrackHandle<AudioSlice>> {
        match self.get(name) {
            Some(AnyTrack::Audio(track)) => Ok(track),
            _ => Err(TrackError::NotConfigured(name.to_string()).into()),
        }
    }

    /// Attached video track by name
    pub fn video(&self, name: &str) -> Result<TrackHandle<NaluSlice>> {
        match self.get(name) {
            Some(AnyTrack::Video(track)) => Ok(track),
            _ => Err(TrackError::NotConfigured(name.to_string()).into()),
        }
    }

    /// Names of attached tracks, sorted
    pub fn track_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Errors reported by tracks so far
    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, AnyTrack>> {
        self.tracks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StreamSink for TrackSet {
    fn attach_track(&self, track: AnyTrack) {
        tracing::info!(stream = %self.name, track = %track.name(), "Track attached");
        self.lock().insert(track.name().to_string(), track);
    }

    fn detach_track(&self, name: &str) {
        if self.lock().remove(name).is_some() {
            tracing::info!(stream = %self.name, track = %name, "Track detached");
        }
    }

    fn report_error(&self, context: &str, error: &Error) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(stream = %self.name, context = %context, error = %error, "Track error");
    }
}
