//! Cache store: query key → cached result set.
//!
//! All methods are short synchronous critical sections. Nothing awaits while
//! the lock is held, so a write always runs to completion before another
//! task can observe the entry. Every state change bumps a revision published
//! on a `watch` channel.

mod entry;

pub use entry::{CacheEntry, EntryData};

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::watch;

use wellsync_core::activity::{Activity, ActivityId, ActivityTransform};
use wellsync_core::cache::QueryKey;
use wellsync_core::clock::Clock;
use wellsync_core::storage::RepositoryError;

/// Permission to run one refetch for a key.
///
/// Only the holder of the current ticket may commit into the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    pub key: QueryKey,
    fetch_id: u64,
    epoch: u64,
}

/// What happened to a finished refetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The result replaced the entry's data.
    Committed,
    /// The entry changed locally while fetching; the result was dropped and
    /// the entry stays stale.
    Discarded,
    Failed(RepositoryError),
    /// Another fetch must run for the same key.
    Again(FetchTicket),
}

/// Record-level state captured before a speculative write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeculativeWrite {
    pub key: QueryKey,
    /// Position and record the target id had before the write, if any.
    pub previous: Option<(usize, Activity)>,
}

/// Aggregate counters read by the sync monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreStats {
    pub tracked_entries: usize,
    pub fetching_entries: usize,
    pub last_fetched_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Entries {
    map: HashMap<QueryKey, CacheEntry>,
    next_fetch: u64,
}

impl Entries {
    /// Hands out a fetch ticket if the entry is stale and nothing blocks it.
    ///
    /// `invalidated` records a follow-up when a fetch is already running, so
    /// a change that lands mid-fetch is never lost. Pending local mutations
    /// defer the fetch until the last one is released.
    fn schedule(&mut self, key: &QueryKey, invalidated: bool) -> Option<FetchTicket> {
        let fetch_id = self.next_fetch;
        let entry = self.map.get_mut(key)?;
        if !entry.is_stale {
            return None;
        }
        if entry.is_loading() {
            entry.follow_up |= invalidated;
            return None;
        }
        if entry.has_pending_local_mutation() {
            return None;
        }

        self.next_fetch += 1;
        entry.fetch = Some(fetch_id);
        entry.follow_up = false;
        Some(FetchTicket {
            key: *key,
            fetch_id,
            epoch: entry.epoch,
        })
    }

    /// Applies a speculative transform to one entry and counts it as a
    /// pending local mutation. Freshness is left alone.
    fn apply_speculative(
        &mut self,
        key: &QueryKey,
        transform: &ActivityTransform,
    ) -> Option<SpeculativeWrite> {
        let entry = self.map.get_mut(key)?;
        let previous = entry.apply(transform)?;
        entry.pending += 1;
        Some(SpeculativeWrite { key: *key, previous })
    }
}

/// Shared store of cached query results.
pub struct CacheStore {
    entries: RwLock<Entries>,
    revision: watch::Sender<u64>,
    clock: Arc<dyn Clock>,
}

impl CacheStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            entries: RwLock::new(Entries::default()),
            revision,
            clock,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.revision.send_modify(|revision| *revision = revision.wrapping_add(1));
    }

    /// Subscribes to store revisions.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn get(&self, key: &QueryKey) -> Option<CacheEntry> {
        self.read().map.get(key).cloned()
    }

    /// Every tracked key, sorted.
    pub fn keys(&self) -> Vec<QueryKey> {
        let mut keys: Vec<QueryKey> = self.read().map.keys().copied().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.read().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starts tracking `key` if needed and returns a ticket when a refetch
    /// should start. Repeated reads of a loading entry never queue extra
    /// fetches.
    pub fn track(&self, key: &QueryKey) -> Option<FetchTicket> {
        let mut entries = self.write();
        let created = !entries.map.contains_key(key);
        if created {
            entries.map.insert(*key, CacheEntry::absent(key));
        }
        let ticket = entries.schedule(key, false);
        drop(entries);

        if created || ticket.is_some() {
            self.bump();
        }
        ticket
    }

    /// Replaces the data of `key` with an authoritative result set.
    pub fn set(&self, key: &QueryKey, data: EntryData) {
        let now = self.clock.now();
        let mut entries = self.write();
        let entry = entries
            .map
            .entry(*key)
            .or_insert_with(|| CacheEntry::absent(key));
        entry.data = data;
        entry.fetched_at = Some(now);
        entry.is_stale = false;
        entry.epoch += 1;
        drop(entries);
        self.bump();
    }

    /// The most recent cached copy of a record.
    pub fn latest(&self, id: ActivityId) -> Option<Activity> {
        let entries = self.read();
        let mut keys: Vec<&QueryKey> = entries.map.keys().collect();
        keys.sort();
        keys.into_iter()
            .find_map(|key| entries.map.get(key).and_then(|entry| entry.find(id)))
            .cloned()
    }

    /// Distinct dates of every cached copy of a record.
    pub fn dates_of(&self, id: ActivityId) -> Vec<NaiveDate> {
        let entries = self.read();
        let mut dates: Vec<NaiveDate> = entries
            .map
            .values()
            .filter_map(|entry| entry.find(id).map(Activity::date))
            .collect();
        dates.sort();
        dates.dedup();
        dates
    }

    #[cfg(test)]
    pub(crate) fn apply_speculative(
        &self,
        key: &QueryKey,
        transform: &ActivityTransform,
    ) -> Option<SpeculativeWrite> {
        let write = self.write().apply_speculative(key, transform)?;
        self.bump();
        Some(write)
    }

    /// Speculatively writes record `id` across every activity entry in one
    /// critical section.
    ///
    /// `plan` receives each key, the entry's own copy of the record and the
    /// latest copy found anywhere in the store, and returns the transform to
    /// apply there, if any.
    pub fn speculate<F>(&self, id: ActivityId, mut plan: F) -> Vec<SpeculativeWrite>
    where
        F: FnMut(&QueryKey, Option<&Activity>, Option<&Activity>) -> Option<ActivityTransform>,
    {
        let mut entries = self.write();
        let mut keys: Vec<QueryKey> = entries
            .map
            .keys()
            .filter(|key| key.holds_activities())
            .copied()
            .collect();
        keys.sort();

        let latest = keys
            .iter()
            .find_map(|key| entries.map.get(key).and_then(|entry| entry.find(id)))
            .cloned();

        let mut writes = Vec::new();
        for key in keys {
            let Some(current) = entries.map.get(&key).map(|entry| entry.find(id).cloned()) else {
                continue;
            };
            let Some(transform) = plan(&key, current.as_ref(), latest.as_ref()) else {
                continue;
            };
            writes.extend(entries.apply_speculative(&key, &transform));
        }
        drop(entries);

        if !writes.is_empty() {
            self.bump();
        }
        writes
    }

    /// Settles one speculative write on `key`, optionally applying the
    /// reconciling transform (authoritative upsert or removal, or rollback
    /// restore).
    ///
    /// Returns a ticket when this was the last pending mutation and the
    /// entry is waiting for a refetch.
    pub fn release(
        &self,
        key: &QueryKey,
        reconcile: Option<&ActivityTransform>,
    ) -> Option<FetchTicket> {
        let mut entries = self.write();
        let entry = entries.map.get_mut(key)?;
        if let Some(transform) = reconcile {
            entry.apply(transform);
        }
        entry.pending = entry.pending.saturating_sub(1);
        let ticket = if entry.has_pending_local_mutation() {
            None
        } else {
            entries.schedule(key, false)
        };
        drop(entries);

        self.bump();
        ticket
    }

    /// Applies a reconciling transform without settling a pending write.
    pub fn reconcile(&self, key: &QueryKey, transform: &ActivityTransform) {
        let applied = self
            .write()
            .map
            .get_mut(key)
            .and_then(|entry| entry.apply(transform))
            .is_some();
        if applied {
            self.bump();
        }
    }

    /// Marks `key` stale without touching its data.
    ///
    /// Returns a ticket when the caller should start the refetch. Marking a
    /// key that is already being fetched queues exactly one follow-up.
    pub fn mark_stale(&self, key: &QueryKey) -> Option<FetchTicket> {
        let mut entries = self.write();
        let entry = entries.map.get_mut(key)?;
        entry.is_stale = true;
        let ticket = entries.schedule(key, true);
        drop(entries);

        self.bump();
        ticket
    }

    /// Commits (or discards) the result of a refetch.
    pub fn finish_fetch(
        &self,
        ticket: FetchTicket,
        result: std::result::Result<EntryData, RepositoryError>,
    ) -> FetchOutcome {
        let now = self.clock.now();
        let mut entries = self.write();
        let Some(entry) = entries.map.get_mut(&ticket.key) else {
            return FetchOutcome::Discarded;
        };
        if entry.fetch != Some(ticket.fetch_id) {
            return FetchOutcome::Discarded;
        }

        entry.fetch = None;
        let follow_up = std::mem::take(&mut entry.follow_up);
        let clean = entry.epoch == ticket.epoch && !entry.has_pending_local_mutation();

        let outcome = match result {
            Ok(data) if clean => {
                entry.data = data;
                entry.fetched_at = Some(now);
                entry.is_stale = follow_up;
                entry.epoch += 1;
                FetchOutcome::Committed
            }
            Ok(_) => {
                tracing::warn!(
                    key = %ticket.key,
                    pending = entry.pending,
                    "Discarding refetch superseded by local changes"
                );
                FetchOutcome::Discarded
            }
            Err(error) => {
                tracing::warn!(key = %ticket.key, error = %error, "Refetch failed");
                FetchOutcome::Failed(error)
            }
        };

        let again = follow_up || outcome == FetchOutcome::Discarded;
        let next = if again {
            entries.schedule(&ticket.key, false)
        } else {
            None
        };
        drop(entries);

        self.bump();
        match next {
            Some(next) => FetchOutcome::Again(next),
            None => outcome,
        }
    }

    pub fn stats(&self) -> StoreStats {
        let entries = self.read();
        StoreStats {
            tracked_entries: entries.map.len(),
            fetching_entries: entries.map.values().filter(|e| e.is_loading()).count(),
            last_fetched_at: entries.map.values().filter_map(|e| e.fetched_at).max(),
        }
    }

    /// Drops every entry. Used at session end.
    pub fn reset(&self) {
        self.write().map.clear();
        self.bump();
        tracing::debug!("Cache reset");
    }
}
