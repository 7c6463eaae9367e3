//! Engine facade.
//!
//! Wires the cache store, the mutation coordinator, the invalidation
//! cascade, the realtime listener and the sync monitor around one
//! repository and one clock.

use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::join_all;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use wellsync_core::activity::{Activity, ActivityId, ActivityPatch, ActivityStatus, NewActivity};
use wellsync_core::cache::QueryKey;
use wellsync_core::clock::Clock;
use wellsync_core::realtime::ChangeFeed;
use wellsync_core::recurrence::RecurrenceRule;
use wellsync_core::storage::Repository;

use crate::cascade::Invalidator;
use crate::config::SyncConfig;
use crate::coordinator::{CreateOutcome, InFlightRegistry, MutationCoordinator};
use crate::error::Result;
use crate::monitor::{SyncMonitor, SyncStatus};
use crate::notify::{Notification, Notifier};
use crate::realtime::{ListenerState, RealtimeListener};
use crate::store::{CacheEntry, CacheStore, EntryData};

/// Best currently-known data for a key.
///
/// Reads never fail: stale or absent entries return what is cached (possibly
/// nothing) while a refetch runs in the background.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResult<T> {
    pub data: T,
    pub is_stale: bool,
    pub is_loading: bool,
}

impl<T> ReadResult<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ReadResult<U> {
        ReadResult {
            data: f(self.data),
            is_stale: self.is_stale,
            is_loading: self.is_loading,
        }
    }
}

/// Client-side activity cache with optimistic mutations.
///
/// Cheap to clone; clones share all state. Must be used from within a
/// Tokio runtime, since reads and invalidations spawn refetch tasks.
#[derive(Clone)]
pub struct SyncEngine {
    store: Arc<CacheStore>,
    registry: Arc<InFlightRegistry>,
    invalidator: Invalidator,
    coordinator: Arc<MutationCoordinator>,
    monitor: Arc<SyncMonitor>,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl SyncEngine {
    pub fn new(repository: Arc<dyn Repository>, clock: Arc<dyn Clock>, config: SyncConfig) -> Self {
        let store = Arc::new(CacheStore::new(clock.clone()));
        let registry = Arc::new(InFlightRegistry::new());
        let notifier = Notifier::new(config.notification_capacity);
        let invalidator = Invalidator::new(store.clone(), repository.clone(), clock.clone());
        let coordinator = Arc::new(MutationCoordinator::new(
            store.clone(),
            registry.clone(),
            invalidator.clone(),
            repository,
            notifier.clone(),
            clock.clone(),
        ));
        let monitor = Arc::new(SyncMonitor::new(store.clone(), registry.clone()));
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            store,
            registry,
            invalidator,
            coordinator,
            monitor,
            notifier,
            clock,
            config,
            shutdown_tx,
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Returns the cached data for `key`, starting a refetch when the entry
    /// is absent or stale.
    pub fn read(&self, key: &QueryKey) -> ReadResult<EntryData> {
        self.invalidator.revalidate(key);
        match self.store.get(key) {
            Some(entry) => {
                tracing::trace!(
                    key = %key,
                    is_stale = entry.is_stale,
                    is_loading = entry.is_loading(),
                    "Cache read"
                );
                ReadResult {
                    is_stale: entry.is_stale,
                    is_loading: entry.is_loading(),
                    data: entry.data,
                }
            }
            None => ReadResult {
                data: EntryData::empty_for(key),
                is_stale: true,
                is_loading: false,
            },
        }
    }

    /// Like [`read`](Self::read), for activity keys.
    pub fn read_activities(&self, key: &QueryKey) -> ReadResult<Vec<Activity>> {
        self.read(key).map(|data| match data {
            EntryData::Activities(activities) => activities,
            EntryData::Categories(_) => Vec::new(),
        })
    }

    /// Seeds an entry with authoritative data.
    pub fn prime(&self, key: &QueryKey, data: EntryData) {
        self.store.set(key, data);
    }

    /// Inspects an entry without triggering a refetch.
    pub fn entry(&self, key: &QueryKey) -> Option<CacheEntry> {
        self.store.get(key)
    }

    pub async fn create(
        &self,
        input: NewActivity,
        rule: Option<RecurrenceRule>,
    ) -> Result<CreateOutcome> {
        self.coordinator.create(input, rule).await
    }

    pub async fn update(&self, id: ActivityId, patch: ActivityPatch) -> Result<Activity> {
        self.coordinator.update(id, patch).await
    }

    pub async fn delete(&self, id: ActivityId) -> Result<()> {
        self.coordinator.delete(id).await
    }

    pub async fn toggle_status(&self, id: ActivityId, current: ActivityStatus) -> Result<Activity> {
        self.coordinator.toggle_status(id, current).await
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.monitor.snapshot()
    }

    /// Status updates, pushed while the monitor runs.
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.monitor.subscribe()
    }

    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifier.subscribe()
    }

    /// Starts the realtime listener on `feed`.
    pub fn start_realtime(&self, feed: Arc<dyn ChangeFeed>) -> watch::Receiver<ListenerState> {
        let listener = RealtimeListener::new(
            feed,
            self.store.clone(),
            self.invalidator.clone(),
            self.notifier.clone(),
            self.clock.clone(),
            self.config.reconnect_delay(),
        );
        let state = listener.state();
        let handle = tokio::spawn(listener.run(self.shutdown_tx.subscribe()));
        self.track_task(handle);
        tracing::info!("Realtime listener started");
        state
    }

    /// Starts pushing status updates to [`subscribe_status`](Self::subscribe_status).
    pub fn start_monitor(&self) -> watch::Receiver<SyncStatus> {
        let status = self.monitor.subscribe();
        let handle = tokio::spawn(
            self.monitor
                .clone()
                .run(self.config.monitor_interval(), self.shutdown_tx.subscribe()),
        );
        self.track_task(handle);
        status
    }

    /// Resolves once no mutation and no refetch is in flight.
    pub async fn wait_until_idle(&self) {
        let mut store_changes = self.store.changes();
        let mut registry_changes = self.registry.changes();
        loop {
            if self.registry.is_empty() && self.store.stats().fetching_entries == 0 {
                return;
            }
            tokio::select! {
                _ = store_changes.changed() => {}
                _ = registry_changes.changed() => {}
            }
        }
    }

    /// Drops every cached entry, e.g. at session end.
    pub fn reset(&self) {
        self.store.reset();
    }

    /// Stops background tasks and waits for them to finish.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        let handles: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for result in join_all(handles).await {
            if let Err(error) = result {
                tracing::warn!(error = %error, "Background task ended abnormally");
            }
        }
        tracing::info!("Sync engine stopped");
    }

    fn track_task(&self, handle: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }
}
