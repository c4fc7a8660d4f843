//! Track configuration
//!
//! Every track receives its own `TrackConfig` at construction. Nothing in the
//! pipeline reads process-wide state.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Default reorder window, in packets
pub const DEFAULT_REORDER_WINDOW: usize = 20;

/// Default ring capacity, in frames
pub const DEFAULT_RING_CAPACITY: usize = 256;

/// Default maximum RTP payload size
pub const DEFAULT_RTP_MTU: usize = 1400;

/// Per-track pipeline options
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TrackConfig {
    /// Synthesize RTP packets for frames that did not arrive as RTP
    pub enable_rtp: bool,

    /// Synthesize AVCC frames
    pub enable_avcc: bool,

    /// Synthesize FLV tags (implies AVCC synthesis)
    pub enable_flv: bool,

    /// Reorder inbound RTP packets inside a bounded window
    pub rtp_reorder: bool,

    /// Reorder window size in packets
    pub reorder_window: usize,

    /// Upper bound on how long a waiting subscriber sleeps before re-checking
    #[serde(rename = "poll_interval_ms", with = "millis")]
    pub poll_interval: Duration,

    /// Number of frames retained by the ring buffer
    pub ring_capacity: usize,

    /// Maximum RTP payload size when packetizing
    pub rtp_mtu: usize,

    /// Aggregate small video NAL units into STAP-A packets
    pub rtp_aggregate: bool,
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self {
            enable_rtp: true,
            enable_avcc: true,
            enable_flv: true,
            rtp_reorder: false,
            reorder_window: DEFAULT_REORDER_WINDOW,
            poll_interval: Duration::from_millis(10),
            ring_capacity: DEFAULT_RING_CAPACITY,
            rtp_mtu: DEFAULT_RTP_MTU,
            rtp_aggregate: false,
        }
    }
}

impl TrackConfig {
    /// Parse a config from a TOML document. Missing keys keep their defaults.
    pub fn from_toml(s: &str) -> Result<Self> {
        let config: TrackConfig = toml::from_str(s).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.ring_capacity == 0 {
            return Err(Error::Config("ring_capacity must be non-zero".into()));
        }
        if self.rtp_reorder && self.reorder_window == 0 {
            return Err(Error::Config("reorder_window must be non-zero".into()));
        }
        // AU header section (4) or FU-A header (2) must leave room for data
        if self.rtp_mtu <= 4 {
            return Err(Error::Config("rtp_mtu too small".into()));
        }
        Ok(())
    }

    /// Enable or disable RTP synthesis
    pub fn rtp(mut self, enabled: bool) -> Self {
        self.enable_rtp = enabled;
        self
    }

    /// Enable or disable AVCC synthesis
    pub fn avcc(mut self, enabled: bool) -> Self {
        self.enable_avcc = enabled;
        self
    }

    /// Enable or disable FLV synthesis
    pub fn flv(mut self, enabled: bool) -> Self {
        self.enable_flv = enabled;
        self
    }

    /// Enable RTP reordering with the given window
    pub fn reorder(mut self, window: usize) -> Self {
        self.rtp_reorder = true;
        self.reorder_window = window.max(1);
        self
    }

    /// Set ring capacity
    pub fn ring_capacity(mut self, capacity: usize) -> Self {
        self.ring_capacity = capacity.max(1);
        self
    }

    /// Set RTP MTU
    pub fn mtu(mut self, mtu: usize) -> Self {
        self.rtp_mtu = mtu;
        self
    }

    /// Set subscriber poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Enable STAP-A aggregation
    pub fn aggregate(mut self, enabled: bool) -> Self {
        self.rtp_aggregate = enabled;
        self
    }

    /// Whether frames need an AVCC form
    pub(crate) fn wants_avcc(&self) -> bool {
        self.enable_avcc || self.enable_flv
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
