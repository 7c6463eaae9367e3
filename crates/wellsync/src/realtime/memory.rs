//! In-memory change feed.
//!
//! Delivers change events through a tokio broadcast channel. `disconnect`
//! drops the current channel so every open subscription observes a closed
//! channel, which is how tests simulate a lost connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::broadcast;

use wellsync_core::realtime::{ChangeEvent, ChangeFeed, FeedError, Result};

/// Channel capacity for change events.
const CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct MemoryChangeFeed {
    sender: Arc<Mutex<broadcast::Sender<ChangeEvent>>>,
    available: Arc<AtomicBool>,
    capacity: usize,
}

impl MemoryChangeFeed {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(Mutex::new(sender)),
            available: Arc::new(AtomicBool::new(true)),
            capacity,
        }
    }

    /// Publishes an event to every open subscription.
    ///
    /// Returns the number of subscribers that received it. No subscribers
    /// is not an error.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(event)
            .unwrap_or(0)
    }

    /// Closes every open subscription.
    pub fn disconnect(&self) {
        let (sender, _) = broadcast::channel(self.capacity);
        *self.sender.lock().unwrap_or_else(PoisonError::into_inner) = sender;
    }

    /// While unavailable, `subscribe` fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .receiver_count()
    }
}

impl Default for MemoryChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChangeFeed for MemoryChangeFeed {
    async fn subscribe(&self) -> Result<broadcast::Receiver<ChangeEvent>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(FeedError::SubscribeFailed("feed unavailable".to_string()));
        }
        Ok(self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribe())
    }
}
