//! Inbound event channel between native threads and the polling thread.
//!
//! # Responsibility
//! - Queue events pushed from arbitrary native callback threads.
//! - Hand queued events to the polling thread in arrival order.
//!
//! # Invariants
//! - `push` never waits longer than the configured push timeout.
//! - A drained event never reappears.
//! - Drained sequences are strictly increasing.
//! - The channel does not look at payloads or correlate ids.

use crate::model::event::{ExtensionEvent, InboundEvent};
use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};
use log::warn;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Push failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    /// The channel was closed at teardown.
    Closed,
    /// The queue stayed full for the whole push timeout.
    Full,
}

impl Display for ChannelError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "event channel is closed"),
            Self::Full => write!(f, "event channel is full"),
        }
    }
}

impl Error for ChannelError {}

/// Bounded multi-producer queue of native events.
#[derive(Debug)]
pub struct EventChannel {
    sender: Sender<InboundEvent>,
    receiver: Receiver<InboundEvent>,
    push_timeout: Duration,
    next_sequence: AtomicU64,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl EventChannel {
    /// Creates a channel holding at most `capacity` undrained events.
    pub fn new(capacity: usize, push_timeout: Duration) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        Self {
            sender,
            receiver,
            push_timeout,
            next_sequence: AtomicU64::new(1),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Appends one event to the tail of the queue.
    ///
    /// Safe to call from any thread, concurrently with other pushes and with
    /// `drain_all`.
    ///
    /// # Errors
    /// - `ChannelError::Closed` after `close`.
    /// - `ChannelError::Full` when no slot frees up within the push timeout.
    pub fn push(&self, event: InboundEvent) -> Result<(), ChannelError> {
        if self.is_closed() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("event=event_push module=channel status=dropped reason=closed");
            return Err(ChannelError::Closed);
        }

        match self.sender.send_timeout(event, self.push_timeout) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "event=event_push module=channel status=dropped reason=full capacity={} timeout_ms={}",
                    self.capacity(),
                    self.push_timeout.as_millis()
                );
                Err(ChannelError::Full)
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(ChannelError::Closed)
            }
        }
    }

    /// Removes and returns every event queued at the time of the call.
    ///
    /// Events pushed while the drain runs are left for the next drain.
    pub fn drain_all(&self) -> Vec<ExtensionEvent> {
        let queued = self.receiver.len();
        let mut drained = Vec::with_capacity(queued);
        for _ in 0..queued {
            let Ok(event) = self.receiver.try_recv() else {
                break;
            };
            let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
            drained.push(ExtensionEvent::stamp(sequence, event));
        }
        drained
    }

    /// Rejects further pushes. Events already queued stay drainable.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of undrained events.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.receiver.capacity().unwrap_or(usize::MAX)
    }

    /// Total events rejected by `push` since creation.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
