//! Snapshot fan-out
//!
//! Every observer gets its own bounded queue. A publish serializes the
//! snapshot once and offers the shared frame to each queue without waiting;
//! an observer whose queue is full misses that frame and nobody else notices.

use crate::error::AnalyticsError;
use crate::types::SessionState;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;
use uuid::Uuid;

/// Default frames buffered per observer
pub const DEFAULT_OBSERVER_QUEUE_CAPACITY: usize = 64;

/// One serialized snapshot, shared by every observer queue
pub type Frame = Arc<str>;

/// Observer identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ObserverId(Uuid);

impl ObserverId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

struct ObserverSlot {
    tx: mpsc::Sender<Frame>,
    dropped: Arc<AtomicU64>,
}

/// Receiving end held by one observer connection
#[derive(Debug)]
pub struct ObserverHandle {
    id: ObserverId,
    rx: mpsc::Receiver<Frame>,
    dropped: Arc<AtomicU64>,
}

impl ObserverHandle {
    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Wait for the next frame; `None` once unregistered
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Next queued frame, if any
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }

    /// Every frame currently queued
    pub fn drain(&mut self) -> Vec<Frame> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Frames this observer missed because its queue was full
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Outcome of one publish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub dropped: usize,
    /// Observers removed because their receiver was gone
    pub pruned: usize,
}

/// Broadcaster counters for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastStats {
    pub observers: usize,
    pub published: u64,
    pub dropped: u64,
}

/// Registry of observers with bounded, drop-on-full queues
#[derive(Clone)]
pub struct StateBroadcaster {
    observers: Arc<RwLock<HashMap<ObserverId, ObserverSlot>>>,
    queue_capacity: usize,
    published: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl Default for StateBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_OBSERVER_QUEUE_CAPACITY)
    }
}

impl StateBroadcaster {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            observers: Arc::new(RwLock::new(HashMap::new())),
            queue_capacity: queue_capacity.max(1),
            published: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Serialize a snapshot into a frame
    pub fn encode(state: &SessionState) -> Result<Frame, AnalyticsError> {
        Ok(Arc::from(serde_json::to_string(state)?))
    }

    /// Add an observer with an empty queue
    pub fn register(&self) -> ObserverHandle {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let dropped = Arc::new(AtomicU64::new(0));
        let id = ObserverId::new();

        self.observers.write().insert(
            id,
            ObserverSlot {
                tx,
                dropped: Arc::clone(&dropped),
            },
        );
        debug!(observer = %id, "observer registered");

        ObserverHandle { id, rx, dropped }
    }

    /// Add an observer whose queue starts with `initial`
    pub fn register_with(&self, initial: &SessionState) -> Result<ObserverHandle, AnalyticsError> {
        let frame = Self::encode(initial)?;
        let handle = self.register();
        if let Some(slot) = self.observers.read().get(&handle.id) {
            // A fresh queue always has room
            let _ = slot.tx.try_send(frame);
        }
        Ok(handle)
    }

    /// Remove an observer, close its queue and discard what was pending.
    /// Returns the number of discarded frames.
    pub fn unregister(&self, mut handle: ObserverHandle) -> usize {
        self.observers.write().remove(&handle.id);
        handle.rx.close();
        let discarded = handle.drain().len();
        debug!(observer = %handle.id, discarded, "observer unregistered");
        discarded
    }

    /// Serialize once and offer the frame to every observer
    pub fn publish(&self, state: &SessionState) -> Result<PublishReport, AnalyticsError> {
        if self.observers.read().is_empty() {
            return Ok(PublishReport::default());
        }
        let frame = Self::encode(state)?;
        Ok(self.publish_frame(frame))
    }

    /// Offer an already-serialized frame to every observer
    pub fn publish_frame(&self, frame: Frame) -> PublishReport {
        let mut report = PublishReport::default();
        let mut closed = Vec::new();

        {
            let observers = self.observers.read();
            for (id, slot) in observers.iter() {
                match slot.tx.try_send(Arc::clone(&frame)) {
                    Ok(()) => report.delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        slot.dropped.fetch_add(1, Ordering::Relaxed);
                        report.dropped += 1;
                        debug!(observer = %id, "observer queue full, frame dropped");
                    }
                    Err(TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }

        if !closed.is_empty() {
            let mut observers = self.observers.write();
            for id in &closed {
                observers.remove(id);
                debug!(observer = %id, "observer gone, pruned");
            }
            report.pruned = closed.len();
        }

        self.published.fetch_add(1, Ordering::Relaxed);
        self.dropped
            .fetch_add(report.dropped as u64, Ordering::Relaxed);
        report
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            observers: self.observer_count(),
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
