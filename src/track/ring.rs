//! Single-producer, multi-consumer ring buffer
//!
//! ```text
//!            oldest retained                     write cursor
//!                  |                                   |
//!   slots:  [ s%cap ][ ... ][ ... ][ ... ][ ... ][ ... ]
//!                  ^              ^               ^
//!              reader A       reader B        reader C (live)
//! ```
//!
//! The producer overwrites the oldest slot and bumps the write cursor with
//! release ordering; readers load it with acquire ordering and copy the `Arc`
//! out of the slot under a per-slot lock held only for that copy. A reader that
//! falls more than `capacity` frames behind gets a single `Lagged` error and is
//! moved to the oldest retained frame. The producer never waits for readers.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::{RecvError, SendError, TryRecvError};

/// Where a new reader starts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StartAt {
    /// Only frames published after subscribing
    #[default]
    Live,
    /// The oldest frame still retained
    Oldest,
    /// The most recent retained keyframe, or live if there is none
    Keyframe,
}

struct Slot<T> {
    seq: u64,
    value: Option<Arc<T>>,
}

/// Shared state of one ring
pub struct RingBuffer<T> {
    slots: Box<[Mutex<Slot<T>>]>,
    /// Sequence number the next publish will get
    write: AtomicU64,
    /// Sequence number + 1 of the latest keyframe, 0 if none
    keyframe: AtomicU64,
    closed: AtomicBool,
    readers: AtomicUsize,
    notify: Notify,
}

impl<T> RingBuffer<T> {
    /// Create a ring with `capacity` slots, returning its only producer
    pub fn with_capacity(capacity: usize) -> RingProducer<T> {
        let slots = (0..capacity.max(1))
            .map(|_| {
                Mutex::new(Slot {
                    seq: 0,
                    value: None,
                })
            })
            .collect();

        RingProducer {
            ring: Arc::new(RingBuffer {
                slots,
                write: AtomicU64::new(0),
                keyframe: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                readers: AtomicUsize::new(0),
                notify: Notify::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of frames published so far
    pub fn written(&self) -> u64 {
        self.write.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Live reader count
    pub fn reader_count(&self) -> usize {
        self.readers.load(Ordering::Relaxed)
    }

    /// Attach a reader
    pub fn subscribe(self: &Arc<Self>, start: StartAt) -> RingReader<T> {
        let write = self.written();
        let oldest = self.oldest(write);

        let cursor = match start {
            StartAt::Live => write,
            StartAt::Oldest => oldest,
            StartAt::Keyframe => match self.keyframe.load(Ordering::Acquire) {
                0 => write,
                k if k - 1 >= oldest => k - 1,
                _ => write,
            },
        };

        self.readers.fetch_add(1, Ordering::Relaxed);
        RingReader {
            ring: Arc::clone(self),
            cursor,
            poll_interval: None,
            cancel: CancellationToken::new(),
        }
    }

    fn oldest(&self, write: u64) -> u64 {
        write.saturating_sub(self.slots.len() as u64)
    }

    fn slot(&self, seq: u64) -> MutexGuard<'_, Slot<T>> {
        self.slots[(seq % self.slots.len() as u64) as usize]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.notify.notify_waiters();
        }
    }
}

/// Write side of a ring. There is exactly one per ring.
pub struct RingProducer<T> {
    ring: Arc<RingBuffer<T>>,
}

impl<T> RingProducer<T> {
    /// Shared ring, for handing out to subscribers
    pub fn ring(&self) -> &Arc<RingBuffer<T>> {
        &self.ring
    }

    /// Publish a frame, returning the frame it evicted
    pub fn publish(
        &mut self,
        value: Arc<T>,
        keyframe: bool,
    ) -> Result<Option<Arc<T>>, SendError<Arc<T>>> {
        let ring = &self.ring;
        if ring.is_closed() {
            return Err(SendError(value));
        }

        let seq = ring.write.load(Ordering::Relaxed);
        let evicted = {
            let mut slot = ring.slot(seq);
            slot.seq = seq;
            slot.value.replace(value)
        };
        if keyframe {
            ring.keyframe.store(seq + 1, Ordering::Release);
        }
        ring.write.store(seq + 1, Ordering::Release);
        ring.notify.notify_waiters();

        Ok(evicted)
    }

    /// Stop accepting frames and wake every waiting reader
    pub fn close(&self) {
        self.ring.close();
    }
}

impl<T> Drop for RingProducer<T> {
    fn drop(&mut self) {
        self.ring.close();
    }
}

/// One reader's cursor into a ring
pub struct RingReader<T> {
    ring: Arc<RingBuffer<T>>,
    cursor: u64,
    poll_interval: Option<Duration>,
    cancel: CancellationToken,
}

impl<T> RingReader<T> {
    /// Re-check for frames at least this often while waiting
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// End pending and future reads with `Cancelled` once `token` fires
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Sequence number of the next frame this reader will return
    pub fn position(&self) -> u64 {
        self.cursor
    }

    /// Frames published but not yet read
    pub fn backlog(&self) -> u64 {
        self.ring.written().saturating_sub(self.cursor)
    }

    /// Read the next frame without waiting
    pub fn try_recv(&mut self) -> Result<Arc<T>, TryRecvError> {
        let ring = &self.ring;
        let write = ring.written();

        if self.cursor >= write {
            return Err(if ring.is_closed() {
                TryRecvError::Closed
            } else {
                TryRecvError::Empty
            });
        }

        if write - self.cursor > ring.capacity() as u64 {
            return Err(self.skip_to_oldest(write));
        }

        let value = {
            let slot = ring.slot(self.cursor);
            if slot.seq == self.cursor {
                slot.value.clone()
            } else {
                None
            }
        };

        match value {
            Some(value) => {
                self.cursor += 1;
                Ok(value)
            }
            // Overwritten between loading the cursor and locking the slot
            None => Err(self.skip_to_oldest(ring.written())),
        }
    }

    /// Wait for the next frame
    pub async fn recv(&mut self) -> Result<Arc<T>, RecvError> {
        let ring = Arc::clone(&self.ring);

        loop {
            let notified = ring.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a publish in between is not missed
            notified.as_mut().enable();

            match self.try_recv() {
                Ok(value) => return Ok(value),
                Err(TryRecvError::Lagged(n)) => return Err(RecvError::Lagged(n)),
                Err(TryRecvError::Closed) => return Err(RecvError::Closed),
                Err(TryRecvError::Empty) => {}
            }

            if self.cancel.is_cancelled() {
                return Err(RecvError::Cancelled);
            }

            match self.poll_interval {
                Some(interval) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = self.cancel.cancelled() => return Err(RecvError::Cancelled),
                        _ = tokio::time::sleep(interval) => {}
                    }
                }
                None => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = self.cancel.cancelled() => return Err(RecvError::Cancelled),
                    }
                }
            }
        }
    }

    fn skip_to_oldest(&mut self, write: u64) -> TryRecvError {
        let oldest = self.ring.oldest(write);
        let missed = oldest - self.cursor;
        tracing::debug!(
            from = self.cursor,
            to = oldest,
            missed = missed,
            "Reader lagged, skipping to oldest retained frame"
        );
        self.cursor = oldest;
        TryRecvError::Lagged(missed)
    }
}

impl<T> Drop for RingReader<T> {
    fn drop(&mut self) {
        self.ring.readers.fetch_sub(1, Ordering::Relaxed);
    }
}
