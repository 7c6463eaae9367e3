//! Invalidation executor.
//!
//! Turns the pure invalidation plans into stale marks and schedules the
//! refetches on the runtime.

use std::sync::Arc;

use wellsync_core::cache::{plan_catch_up, plan_invalidation, CascadeTarget, QueryKey};
use wellsync_core::clock::Clock;
use wellsync_core::storage::{
    ActivityRepository, CategoryRepository, Repository, RepositoryError,
};

use crate::store::{CacheStore, EntryData, FetchOutcome, FetchTicket};

/// Marks keys stale and refetches them from the repository.
///
/// Cheap to clone; every spawned fetch holds its own copy.
#[derive(Clone)]
pub struct Invalidator {
    store: Arc<CacheStore>,
    repository: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
}

impl Invalidator {
    pub fn new(
        store: Arc<CacheStore>,
        repository: Arc<dyn Repository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            repository,
            clock,
        }
    }

    /// Invalidates every tracked key touched by a change, plus "today".
    ///
    /// Returns the invalidated keys.
    pub fn cascade(&self, target: impl Into<CascadeTarget>) -> Vec<QueryKey> {
        let target = target.into();
        let keys = plan_invalidation(&target, &self.store.keys(), self.clock.today());
        tracing::trace!(target = ?target, keys = keys.len(), "Cascading invalidation");
        self.invalidate_keys(&keys);
        keys
    }

    /// Conservative invalidation after events may have been missed.
    pub fn catch_up(&self) -> Vec<QueryKey> {
        let keys = plan_catch_up(&self.store.keys(), self.clock.today());
        tracing::debug!(keys = keys.len(), "Catching up after missed events");
        self.invalidate_keys(&keys);
        keys
    }

    pub fn invalidate_keys(&self, keys: &[QueryKey]) {
        for key in keys {
            if let Some(ticket) = self.store.mark_stale(key) {
                self.spawn_fetch(ticket);
            }
        }
    }

    /// Starts tracking `key` and refetches it if stale.
    pub fn revalidate(&self, key: &QueryKey) {
        if let Some(ticket) = self.store.track(key) {
            self.spawn_fetch(ticket);
        }
    }

    /// Runs the fetches for tickets handed out by the store.
    pub fn schedule(&self, tickets: impl IntoIterator<Item = FetchTicket>) {
        for ticket in tickets {
            self.spawn_fetch(ticket);
        }
    }

    fn spawn_fetch(&self, ticket: FetchTicket) {
        let this = self.clone();
        tokio::spawn(async move { this.run_fetch(ticket).await });
    }

    async fn run_fetch(&self, mut ticket: FetchTicket) {
        loop {
            tracing::trace!(key = %ticket.key, "Refetching");
            let result = self.fetch(&ticket.key).await;
            match self.store.finish_fetch(ticket, result) {
                FetchOutcome::Again(next) => ticket = next,
                _ => break,
            }
        }
    }

    async fn fetch(&self, key: &QueryKey) -> std::result::Result<EntryData, RepositoryError> {
        match key {
            QueryKey::Day { date } => self
                .repository
                .list_by_date(*date)
                .await
                .map(EntryData::Activities),
            QueryKey::Range { range } => self
                .repository
                .list_by_range(*range)
                .await
                .map(EntryData::Activities),
            QueryKey::Categories => self
                .repository
                .list_categories()
                .await
                .map(EntryData::Categories),
        }
    }
}
