//! Sync monitor: a read-only aggregate over the cache store and the
//! in-flight registry.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, watch};

use crate::coordinator::InFlightRegistry;
use crate::store::CacheStore;

/// Snapshot of the engine's synchronization state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SyncStatus {
    /// True while a mutation or a refetch is in flight.
    pub is_syncing: bool,
    /// True only while a local mutation awaits persistence. Refetches do
    /// not count.
    pub has_in_flight_mutation: bool,
    pub in_flight: usize,
    /// Most recent freshness timestamp across all entries.
    pub last_synced_at: Option<DateTime<Utc>>,
    pub tracked_entries: usize,
    pub fetching_entries: usize,
}

pub struct SyncMonitor {
    store: Arc<CacheStore>,
    registry: Arc<InFlightRegistry>,
    status: watch::Sender<SyncStatus>,
}

impl SyncMonitor {
    pub fn new(store: Arc<CacheStore>, registry: Arc<InFlightRegistry>) -> Self {
        let (status, _) = watch::channel(SyncStatus::default());
        let monitor = Self {
            store,
            registry,
            status,
        };
        monitor.publish();
        monitor
    }

    /// Computes the current status on demand.
    pub fn snapshot(&self) -> SyncStatus {
        let in_flight = self.registry.len();
        let stats = self.store.stats();
        SyncStatus {
            is_syncing: in_flight > 0 || stats.fetching_entries > 0,
            has_in_flight_mutation: in_flight > 0,
            in_flight,
            last_synced_at: stats.last_fetched_at,
            tracked_entries: stats.tracked_entries,
            fetching_entries: stats.fetching_entries,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Recomputes the status and notifies subscribers if it changed.
    pub fn publish(&self) -> SyncStatus {
        let next = self.snapshot();
        self.status.send_if_modified(|current| {
            let changed = *current != next;
            *current = next;
            changed
        });
        next
    }

    /// Recomputes on every store or registry revision, and every `interval`
    /// as a fallback, until `shutdown` fires.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut store_changes = self.store.changes();
        let mut registry_changes = self.registry.changes();
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                Ok(()) = store_changes.changed() => {}
                Ok(()) = registry_changes.changed() => {}
                _ = ticker.tick() => {}
            }
            self.publish();
        }
        tracing::debug!("Sync monitor stopped");
    }
}
