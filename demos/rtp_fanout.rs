//! RTP fan-out demo
//!
//! Run with: cargo run --example rtp_fanout [CONFIG.toml]
//!
//! Generates an AAC RTP stream with some packets swapped and one dropped,
//! feeds it through an `AacTrack` and fans the frames out to three readers:
//!
//! - a live reader printing every frame
//! - a slow reader that falls behind and reports the lag
//! - a reader that is cancelled half way through
//!
//! Example config:
//!
//! ```toml
//! rtp_reorder = true
//! reorder_window = 8
//! ring_capacity = 16
//! ```

use std::sync::Arc;
use std::time::Duration;

use avring::media::aac::{au_header, AAC_PAYLOAD_TYPE};
use avring::media::AudioSlice;
use avring::rtp::{RtpFrame, RtpHeader};
use avring::track::{AacTrack, StartAt, StreamSink, TrackReader, TrackSet};
use avring::{RecvError, TrackConfig};
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

const FRAMES: u16 = 200;
const SAMPLES_PER_FRAME: u32 = 1024;

fn packet(seq: u16) -> Bytes {
    let mut header = RtpHeader::new(AAC_PAYLOAD_TYPE, seq, seq as u32 * SAMPLES_PER_FRAME, 0x5EED);
    header.marker = true;
    let au = vec![seq as u8; 64];
    let mut payload = au_header(au.len()).to_vec();
    payload.extend_from_slice(&au);
    RtpFrame::new(header, Bytes::from(payload)).raw().clone()
}

/// Sequence numbers in arrival order: the first two of every twenty swapped, 77 lost
fn arrival_order() -> Vec<u16> {
    let mut order: Vec<u16> = (0..FRAMES).filter(|&seq| seq != 77).collect();
    for pair in order.chunks_mut(20) {
        if pair.len() > 1 {
            pair.swap(0, 1);
        }
    }
    order
}

async fn read(name: &'static str, mut reader: TrackReader<AudioSlice>, delay: Duration) {
    let mut frames = 0u64;
    loop {
        match reader.recv().await {
            Ok(frame) => {
                frames += 1;
                if let Some(config) = reader.config_change() {
                    tracing::info!(reader = name, sequence = config.sequence, "Decoder configuration");
                }
                if frame.lossy {
                    tracing::warn!(reader = name, seq = frame.base.sequence, "Lossy frame");
                }
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            Err(RecvError::Lagged(n)) => {
                tracing::warn!(reader = name, skipped = n, "Reader lagged");
            }
            Err(RecvError::Closed) => {
                tracing::info!(reader = name, frames = frames, "Track closed");
                break;
            }
            Err(RecvError::Cancelled) => {
                tracing::info!(reader = name, frames = frames, "Reader cancelled");
                break;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("avring=info".parse()?)
                .add_directive("rtp_fanout=info".parse()?),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => TrackConfig::from_toml(&std::fs::read_to_string(path)?)?,
        None => TrackConfig::default().reorder(8).ring_capacity(16),
    };

    let stream = Arc::new(TrackSet::new("live/demo"));
    let sink: Arc<dyn StreamSink> = stream.clone();
    let mut track = AacTrack::new("aac", config, sink);
    track.write_config(Bytes::from_static(&[0x12, 0x10]))?;

    let handle = stream.audio("aac")?;
    let cancel = CancellationToken::new();
    let readers = vec![
        tokio::spawn(read("live", handle.subscribe(StartAt::Live), Duration::ZERO)),
        tokio::spawn(read(
            "slow",
            handle.subscribe(StartAt::Oldest),
            Duration::from_millis(15),
        )),
        tokio::spawn(read(
            "cancelled",
            handle.subscribe(StartAt::Live).with_cancellation(cancel.clone()),
            Duration::ZERO,
        )),
    ];

    for (i, seq) in arrival_order().into_iter().enumerate() {
        if let Err(e) = track.write_rtp(packet(seq)) {
            tracing::warn!(seq = seq, error = %e, "Packet rejected");
        }
        if i == FRAMES as usize / 2 {
            cancel.cancel();
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let stats = track.stats().clone();
    track.detach();
    for reader in readers {
        reader.await?;
    }

    tracing::info!(
        frames = stats.frames,
        lossy = stats.lossy_frames,
        rtp_lost = stats.rtp_lost,
        loss_ratio = stats.loss_ratio(),
        "Done"
    );
    Ok(())
}
