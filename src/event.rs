//! Events emitted by the engine, one per poll cycle plus lifecycle markers.
//!
//! The channel is bounded and drops the oldest unread event when full.
//! Events are hints for the observer; the activity log is the record.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Category, WorkItem};

/// A structured event emitted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence number. Gaps mean events were dropped.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    ClaimSuccess {
        category: Category,
        item: Box<WorkItem>,
    },
    NoClaimable,
    AllSlotsFull,
    RecoverableError {
        reason: String,
    },
    FatalError {
        reason: String,
    },
    Stopped,
}

impl EventKind {
    pub fn is_fatal(&self) -> bool {
        matches!(self, EventKind::FatalError { .. })
    }
}

struct Inner {
    queue: VecDeque<Event>,
    next_seq: u64,
    dropped: u64,
}

/// Bounded FIFO between the worker and the observer.
pub struct EventChannel {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl EventChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                queue: VecDeque::with_capacity(capacity.max(1)),
                next_seq: 1,
                dropped: 0,
            }),
        }
    }

    /// Push an event, evicting the oldest unread one if the queue is full.
    pub fn emit(&self, kind: EventKind) -> Event {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let event = Event {
            seq: inner.next_seq,
            timestamp: Utc::now(),
            kind,
        };
        inner.next_seq += 1;
        if inner.queue.len() >= self.capacity {
            inner.queue.pop_front();
            inner.dropped += 1;
            tracing::debug!(seq = event.seq, "event channel full, dropped oldest");
        }
        inner.queue.push_back(event.clone());
        event
    }

    /// Take every unread event, oldest first.
    pub fn drain(&self) -> Vec<Event> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.queue.drain(..).collect()
    }

    /// Discard unread events. Sequence numbers keep counting.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.queue.clear();
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .queue
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total events evicted because the observer fell behind.
    pub fn dropped(&self) -> u64 {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .dropped
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
