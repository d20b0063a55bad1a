//! Event bus for batch lifecycle events

use delivery_core::{BatchEvent, BatchId};

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::debug;

/// Default number of events kept for the events endpoint
pub const DEFAULT_HISTORY: usize = 1000;

/// Event bus distributing lifecycle events with a bounded history
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BatchEvent>,
    history: Arc<RwLock<VecDeque<BatchEvent>>>,
    max_history: usize,
    event_count: Arc<AtomicU64>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new(capacity: usize, max_history: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));

        Self {
            sender,
            history: Arc::new(RwLock::new(VecDeque::with_capacity(max_history))),
            max_history,
            event_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.sender.subscribe()
    }

    /// Publish an event
    pub fn publish(&self, event: BatchEvent) {
        {
            let mut history = self.history.write();
            history.push_back(event.clone());
            while history.len() > self.max_history {
                history.pop_front();
            }
        }

        let total = self.event_count.fetch_add(1, Ordering::Relaxed) + 1;

        // No receivers is fine
        let _ = self.sender.send(event);

        debug!("Event published, total: {}", total);
    }

    /// Get recent events, oldest first
    pub fn get_recent(&self, count: usize) -> Vec<BatchEvent> {
        let history = self.history.read();
        let start = history.len().saturating_sub(count);
        history.iter().skip(start).cloned().collect()
    }

    /// Recent events of one batch, oldest first
    pub fn recent_for_batch(&self, batch_id: BatchId, count: usize) -> Vec<BatchEvent> {
        let history = self.history.read();
        let matching: Vec<BatchEvent> = history
            .iter()
            .filter(|e| e.batch_id() == batch_id)
            .cloned()
            .collect();
        let start = matching.len().saturating_sub(count);
        matching[start..].to_vec()
    }

    /// Get event count
    pub fn get_event_count(&self) -> u64 {
        self.event_count.load(Ordering::Relaxed)
    }

    /// Get subscriber count (approximate)
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024, DEFAULT_HISTORY)
    }
}
