//! RTP reorder window
//!
//! Packets are keyed by their distance from the next expected sequence number:
//!
//! ```text
//!   next                                      next + window
//!    |  parked slots (distance 1..window)          |
//!    v                                              v
//! ---[0][1][2][3] ... [window-1]-------------------->  sequence space
//!    ^ emitted immediately        beyond: expire gap
//! ```
//!
//! - distance 0: emitted, followed by any parked run it unblocks
//! - distance inside the window: parked until the gap closes
//! - distance at or past the window: the gap is given up on, missing packets
//!   are counted lost and parked ones released in order
//! - negative distance (half the sequence space): late or duplicate, dropped
//!
//! With reordering disabled packets pass straight through but gaps are still
//! counted.

use std::collections::VecDeque;

use super::packet::RtpFrame;

/// What happened to a pushed packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// Released for processing (possibly with packets it unblocked)
    Accepted,
    /// Held until the gap before it closes
    Parked,
    /// Older than the next expected sequence number
    Late,
    /// Same sequence number as a parked packet
    Duplicate,
}

/// A released packet and the number of packets known missing right before it
#[derive(Debug, Clone)]
pub struct Delivery {
    pub frame: RtpFrame,
    pub lost_before: u64,
}

/// Sequence-number reorder queue
#[derive(Debug)]
pub struct ReorderQueue {
    reorder: bool,
    window: usize,
    next: Option<u16>,
    /// `pending[i]` holds sequence `next + i`
    pending: VecDeque<Option<RtpFrame>>,
    ready: VecDeque<Delivery>,
    /// Losses not yet attached to a delivered packet
    unreported_loss: u64,
    lost: u64,
    late: u64,
}

impl ReorderQueue {
    /// A queue that reorders inside `window` packets
    pub fn new(window: usize) -> Self {
        Self::build(true, window.max(1))
    }

    /// A queue that only detects gaps
    pub fn passthrough() -> Self {
        Self::build(false, 1)
    }

    fn build(reorder: bool, window: usize) -> Self {
        Self {
            reorder,
            window,
            next: None,
            pending: VecDeque::with_capacity(if reorder { window } else { 0 }),
            ready: VecDeque::new(),
            unreported_loss: 0,
            lost: 0,
            late: 0,
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Packets given up on
    pub fn lost(&self) -> u64 {
        self.lost
    }

    /// Packets dropped as late or duplicate
    pub fn late(&self) -> u64 {
        self.late
    }

    /// Packets waiting behind a gap
    pub fn parked(&self) -> usize {
        self.pending.iter().filter(|p| p.is_some()).count()
    }

    /// Feed one packet. Released packets are collected with [`ReorderQueue::next_rtp_frame`].
    pub fn push(&mut self, frame: RtpFrame) -> Arrival {
        let seq = frame.sequence_number();
        let Some(next) = self.next else {
            self.next = Some(seq.wrapping_add(1));
            self.release(frame);
            return Arrival::Accepted;
        };

        let distance = seq.wrapping_sub(next);
        if distance >= 0x8000 {
            self.late += 1;
            return Arrival::Late;
        }
        let distance = distance as usize;

        if !self.reorder {
            self.record_loss(distance as u64);
            self.next = Some(seq.wrapping_add(1));
            self.release(frame);
            return Arrival::Accepted;
        }

        if distance >= self.window {
            self.expire(distance - (self.window - 1));
            return self.push(frame);
        }

        if distance == 0 {
            self.release(frame);
            self.advance();
            self.drain();
            return Arrival::Accepted;
        }

        if self.pending.len() <= distance {
            self.pending.resize(distance + 1, None);
        }
        if self.pending[distance].is_some() {
            self.late += 1;
            return Arrival::Duplicate;
        }
        self.pending[distance] = Some(frame);
        Arrival::Parked
    }

    /// Next released packet, in sequence order
    pub fn next_rtp_frame(&mut self) -> Option<Delivery> {
        self.ready.pop_front()
    }

    /// Give up on everything parked and restart at the next packet
    pub fn flush(&mut self) {
        while !self.pending.is_empty() {
            match self.advance() {
                Some(frame) => self.release(frame),
                None => self.record_loss(1),
            }
        }
        self.next = None;
    }

    fn release(&mut self, frame: RtpFrame) {
        let lost_before = std::mem::take(&mut self.unreported_loss);
        self.ready.push_back(Delivery { frame, lost_before });
    }

    fn record_loss(&mut self, count: u64) {
        self.lost += count;
        self.unreported_loss += count;
    }

    /// Move `next` forward one slot, returning whatever was parked there
    fn advance(&mut self) -> Option<RtpFrame> {
        if let Some(next) = self.next.as_mut() {
            *next = next.wrapping_add(1);
        }
        self.pending.pop_front().flatten()
    }

    /// Release parked packets that are now contiguous with `next`
    fn drain(&mut self) {
        while matches!(self.pending.front(), Some(Some(_))) {
            if let Some(frame) = self.advance() {
                self.release(frame);
            }
        }
    }

    /// Skip `count` sequence numbers
    fn expire(&mut self, count: usize) {
        let walked = count.min(self.window);
        for _ in 0..walked {
            match self.advance() {
                Some(frame) => self.release(frame),
                None => self.record_loss(1),
            }
        }
        if count > walked {
            let skipped = count - walked;
            self.record_loss(skipped as u64);
            if let Some(next) = self.next.as_mut() {
                *next = next.wrapping_add(skipped as u16);
            }
        }
        self.drain();
    }
}
