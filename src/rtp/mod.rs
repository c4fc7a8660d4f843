//! RTP ingest and egress
//!
//! - `packet`: header parsing and serialization
//! - `reorder`: bounded reorder window with loss accounting
//! - `packetizer`: payloads to numbered, marked packets

pub mod packet;
pub mod packetizer;
pub mod reorder;

pub use packet::{RtpExtension, RtpFrame, RtpHeader, RTP_MIN_HEADER_SIZE, RTP_VERSION};
pub use packetizer::{split_payload, RtpPacketizer};
pub use reorder::{Arrival, Delivery, ReorderQueue};
