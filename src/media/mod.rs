//! Media framing
//!
//! This module provides:
//! - The frame model with memoized AVCC/FLV synthesis
//! - FLV tag framing
//! - AAC configuration, ADTS and RFC 3640 payload handling
//! - H.264 NALU parsing and RFC 6184 payload handling

pub mod aac;
pub mod flv;
pub mod frame;
pub mod h264;

pub use aac::{AacData, AacPacketType, AudioSpecificConfig, AuDepacketizer};
pub use flv::{AudioFormat, FlvTagType, VideoCodec, VideoFrameType};
pub use frame::{
    AudioSlice, AvFrame, AvccFrame, BaseFrame, DecoderConfiguration, NaluSlice, RawUnit,
};
pub use h264::{AvcConfig, AvcPacketType, H264Data, NaluDepacketizer, NaluIterator, NaluType};
