//! Realtime event listener.
//!
//! A single consumer of the change feed. Every event goes through the same
//! invalidation cascade as local mutations; events are handled one at a
//! time in arrival order. Losing the channel drops back to `Unsubscribed`
//! and every reconnection starts with a conservative catch-up, since missed
//! events cannot be replayed.

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "memory")]
pub use memory::MemoryChangeFeed;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;

use wellsync_core::activity::ActivityId;
use wellsync_core::cache::QueryKey;
use wellsync_core::clock::Clock;
use wellsync_core::realtime::{ChangeEvent, ChangeFeed};

use crate::cascade::Invalidator;
use crate::error::SyncError;
use crate::notify::Notifier;
use crate::store::CacheStore;

/// Connection state of the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Unsubscribed,
    Subscribed,
}

pub struct RealtimeListener {
    feed: Arc<dyn ChangeFeed>,
    store: Arc<CacheStore>,
    invalidator: Invalidator,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    reconnect_delay: Duration,
    state: watch::Sender<ListenerState>,
}

impl RealtimeListener {
    pub fn new(
        feed: Arc<dyn ChangeFeed>,
        store: Arc<CacheStore>,
        invalidator: Invalidator,
        notifier: Notifier,
        clock: Arc<dyn Clock>,
        reconnect_delay: Duration,
    ) -> Self {
        let (state, _) = watch::channel(ListenerState::Unsubscribed);
        Self {
            feed,
            store,
            invalidator,
            notifier,
            clock,
            reconnect_delay,
            state,
        }
    }

    pub fn state(&self) -> watch::Receiver<ListenerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ListenerState) {
        self.state.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }

    /// Routes one event through the cascade. Returns the invalidated keys.
    pub fn handle_event(&self, event: &ChangeEvent) -> Vec<QueryKey> {
        let mut keys = BTreeSet::new();
        match event {
            ChangeEvent::Activity(change) => {
                for date in change.affected_dates() {
                    keys.extend(self.invalidator.cascade(date));
                }

                let record = change.current.as_ref().or(change.previous.as_ref());
                if let Some(record) = record {
                    self.notifier.info(
                        Some(record.id),
                        format!("\"{}\" {}", record.title, change.transition()),
                    );
                }
                tracing::debug!(
                    kind = ?change.kind,
                    activity_id = ?change.activity_id(),
                    keys = keys.len(),
                    "Handled activity change"
                );
            }
            ChangeEvent::State(state) => {
                let id = ActivityId::Stored(state.activity_id);
                let mut dates = self.store.dates_of(id);
                if dates.is_empty() {
                    dates.push(self.clock.today());
                }
                for date in dates {
                    keys.extend(self.invalidator.cascade(date));
                }
                tracing::debug!(
                    kind = ?state.kind,
                    activity_id = %id,
                    keys = keys.len(),
                    "Handled state change"
                );
            }
        }
        keys.into_iter().collect()
    }

    /// Runs until `shutdown` fires, reconnecting after every channel loss.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut first_attempt = true;
        loop {
            let subscription = tokio::select! {
                _ = shutdown.recv() => break,
                subscription = self.feed.subscribe() => subscription,
            };

            match subscription {
                Ok(mut receiver) => {
                    self.set_state(ListenerState::Subscribed);
                    tracing::info!("Realtime subscription established");
                    if !first_attempt {
                        self.invalidator.catch_up();
                    }
                    first_attempt = false;

                    if self.consume(&mut receiver, &mut shutdown).await {
                        break;
                    }
                    self.set_state(ListenerState::Unsubscribed);
                    tracing::warn!(
                        error = %SyncError::ChannelDisconnected,
                        delay_ms = self.reconnect_delay.as_millis() as u64,
                        "Reconnecting"
                    );
                }
                Err(error) => {
                    first_attempt = false;
                    tracing::warn!(error = %error, "Realtime subscription failed");
                }
            }

            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        self.set_state(ListenerState::Unsubscribed);
        tracing::info!("Realtime listener stopped");
    }

    /// Consumes one subscription. Returns true when shutdown was requested.
    async fn consume(
        &self,
        receiver: &mut broadcast::Receiver<ChangeEvent>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> bool {
        loop {
            tokio::select! {
                _ = shutdown.recv() => return true,
                message = receiver.recv() => match message {
                    Ok(event) => {
                        self.handle_event(&event);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Realtime receiver lagged, catching up");
                        self.invalidator.catch_up();
                    }
                    Err(RecvError::Closed) => return false,
                },
            }
        }
    }
}
