//! Registry of in-flight mutations.
//!
//! Each record carries the rollback snapshot of the writes it made. When a
//! mutation settles while a later one on the same record is still in
//! flight, the cache is left to the later mutation and the snapshot is
//! handed over instead.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use wellsync_core::activity::{Activity, ActivityId, ActivityTransform};
use wellsync_core::cache::QueryKey;

use crate::error::Operation;
use crate::store::{CacheStore, FetchTicket, SpeculativeWrite};

/// Issue-ordered mutation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MutationId(u64);

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// The pre-mutation state of one record in one cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSnapshot {
    pub key: QueryKey,
    pub previous: Option<(usize, Activity)>,
    /// Whether this mutation holds a pending count on the entry. Snapshots
    /// inherited from a settled predecessor do not.
    pub held: bool,
}

impl From<SpeculativeWrite> for RecordSnapshot {
    fn from(write: SpeculativeWrite) -> Self {
        Self {
            key: write.key,
            previous: write.previous,
            held: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InFlight {
    pub id: MutationId,
    pub target: ActivityId,
    pub operation: Operation,
    pub snapshots: Vec<RecordSnapshot>,
}

/// How a mutation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// Persisted. Carries the authoritative record, `None` for deletions.
    Confirmed(Option<Activity>),
    Failed,
}

#[derive(Debug, Default)]
struct Records {
    next: u64,
    active: BTreeMap<MutationId, InFlight>,
}

/// In-flight mutations, ordered by issue.
pub struct InFlightRegistry {
    records: Mutex<Records>,
    revision: watch::Sender<u64>,
}

impl Default for InFlightRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InFlightRegistry {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            records: Mutex::new(Records::default()),
            revision,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Records> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.revision.send_modify(|revision| *revision = revision.wrapping_add(1));
    }

    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn len(&self) -> usize {
        self.lock().active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: MutationId) -> Option<InFlight> {
        self.lock().active.get(&id).cloned()
    }

    /// Registers a mutation and runs its speculative writes in the same
    /// critical section, so issue order and speculation order agree.
    pub fn begin<F>(
        &self,
        target: ActivityId,
        operation: Operation,
        speculate: F,
    ) -> MutationId
    where
        F: FnOnce(MutationId) -> Vec<SpeculativeWrite>,
    {
        let mut records = self.lock();
        let id = MutationId(records.next);
        records.next += 1;
        let snapshots = speculate(id).into_iter().map(RecordSnapshot::from).collect();
        records.active.insert(
            id,
            InFlight {
                id,
                target,
                operation,
                snapshots,
            },
        );
        drop(records);

        self.bump();
        id
    }

    /// Settles a mutation and removes it from the registry.
    ///
    /// Without a successor on the same record, the snapshot is used to
    /// reconcile the cache: on success the authoritative record lands in
    /// the entries covering its date and leaves the others, on failure the
    /// snapshot is restored. With a successor, the cache is left alone; a failure hands
    /// the snapshot over, a success rebases the successor's snapshot onto
    /// the authoritative record.
    ///
    /// Returns the refetches unblocked by releasing the pending writes.
    pub fn settle(
        &self,
        id: MutationId,
        settlement: &Settlement,
        store: &CacheStore,
    ) -> Vec<FetchTicket> {
        let mut records = self.lock();
        let Some(record) = records.active.remove(&id) else {
            return Vec::new();
        };

        let successor = records
            .active
            .range_mut((Bound::Excluded(id), Bound::Unbounded))
            .map(|(_, next)| next)
            .find(|next| next.target == record.target);

        let mut tickets = Vec::new();
        match successor {
            Some(next) => {
                match settlement {
                    Settlement::Failed => hand_off(&record.snapshots, next),
                    Settlement::Confirmed(authoritative) => {
                        rebase(next, authoritative.as_ref())
                    }
                }
                tracing::debug!(
                    mutation = %id,
                    successor = %next.id,
                    activity_id = %record.target,
                    "Deferring cache reconciliation to successor"
                );
                for snapshot in record.snapshots.iter().filter(|s| s.held) {
                    tickets.extend(store.release(&snapshot.key, None));
                }
            }
            None => {
                for snapshot in &record.snapshots {
                    let transform = reconcile(snapshot, record.target, settlement);
                    if snapshot.held {
                        tickets.extend(store.release(&snapshot.key, transform.as_ref()));
                    } else if let Some(transform) = transform {
                        store.reconcile(&snapshot.key, &transform);
                    }
                }
            }
        }
        drop(records);

        self.bump();
        tickets
    }
}

/// The transform that settles one snapshot when no successor exists.
///
/// A confirmed record may land on a different date than the speculative
/// copy, e.g. when a failed move was handed over, so it is placed by the
/// key's coverage rather than where the speculative copy sat.
fn reconcile(
    snapshot: &RecordSnapshot,
    target: ActivityId,
    settlement: &Settlement,
) -> Option<ActivityTransform> {
    match settlement {
        Settlement::Failed => Some(ActivityTransform::Restore {
            id: target,
            previous: snapshot.previous.clone(),
        }),
        Settlement::Confirmed(Some(authoritative)) => {
            if snapshot.key.covers(authoritative.date()) {
                Some(ActivityTransform::Upsert {
                    id: target,
                    with: authoritative.clone(),
                })
            } else {
                Some(ActivityTransform::Remove(target))
            }
        }
        Settlement::Confirmed(None) => None,
    }
}

/// The successor now restores to the state before both mutations.
fn hand_off(snapshots: &[RecordSnapshot], next: &mut InFlight) {
    for snapshot in snapshots {
        match next.snapshots.iter_mut().find(|s| s.key == snapshot.key) {
            Some(existing) => existing.previous = snapshot.previous.clone(),
            None => next.snapshots.push(RecordSnapshot {
                key: snapshot.key,
                previous: snapshot.previous.clone(),
                held: false,
            }),
        }
    }
}

/// The successor now restores to the persisted state.
fn rebase(next: &mut InFlight, authoritative: Option<&Activity>) {
    for snapshot in &mut next.snapshots {
        snapshot.previous = match (snapshot.previous.take(), authoritative) {
            (Some((position, _)), Some(record)) => Some((position, record.clone())),
            (_, None) | (None, Some(_)) => None,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{NaiveDate, NaiveDateTime, Utc};
    use uuid::Uuid;
    use wellsync_core::activity::{ActivityPatch, ActivityStatus, NewActivity};
    use wellsync_core::clock::FixedClock;

    use crate::store::EntryData;

    fn at(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn key() -> QueryKey {
        QueryKey::day(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap())
    }

    fn setup() -> (CacheStore, Activity) {
        let store = CacheStore::new(Arc::new(FixedClock::new(
            NaiveDate::from_ymd_opt(2024, 5, 20).unwrap(),
        )));
        let activity = Activity::from_input(
            ActivityId::Stored(Uuid::new_v4()),
            NewActivity::new("Walk", at(8)),
            Utc::now(),
        );
        store.set(&key(), EntryData::Activities(vec![activity.clone()]));
        (store, activity)
    }

    fn toggle(
        registry: &InFlightRegistry,
        store: &CacheStore,
        id: ActivityId,
    ) -> MutationId {
        registry.begin(id, Operation::ToggleStatus, |_| {
            store.speculate(id, |_, current, _| {
                current.map(|record| ActivityTransform::Replace {
                    id,
                    with: ActivityPatch::status(record.status.toggled()).apply_to(record),
                })
            })
        })
    }

    fn status(store: &CacheStore, id: ActivityId) -> ActivityStatus {
        store.get(&key()).unwrap().find(id).unwrap().status
    }

    #[test]
    fn test_ids_follow_issue_order() {
        let registry = InFlightRegistry::new();
        let first = registry.begin(ActivityId::local(), Operation::Create, |_| Vec::new());
        let second = registry.begin(ActivityId::local(), Operation::Create, |_| Vec::new());
        assert!(first < second);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_failure_without_successor_restores() {
        let registry = InFlightRegistry::new();
        let (store, activity) = setup();
        let before = store.get(&key()).unwrap().data;

        let id = toggle(&registry, &store, activity.id);
        assert_eq!(status(&store, activity.id), ActivityStatus::Completed);

        registry.settle(id, &Settlement::Failed, &store);

        let entry = store.get(&key()).unwrap();
        assert_eq!(entry.data, before);
        assert!(!entry.has_pending_local_mutation());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_first_failure_hands_snapshot_to_successor() {
        let registry = InFlightRegistry::new();
        let (store, activity) = setup();
        let before = store.get(&key()).unwrap().data;

        let first = toggle(&registry, &store, activity.id);
        let second = toggle(&registry, &store, activity.id);
        assert_eq!(status(&store, activity.id), ActivityStatus::Planned);

        // The first failure must not clobber the second speculative write.
        registry.settle(first, &Settlement::Failed, &store);
        assert_eq!(status(&store, activity.id), ActivityStatus::Planned);
        assert_eq!(
            registry.get(second).unwrap().snapshots[0].previous,
            Some((0, activity.clone()))
        );

        registry.settle(second, &Settlement::Failed, &store);
        assert_eq!(store.get(&key()).unwrap().data, before);
    }

    #[test]
    fn test_first_success_rebases_successor() {
        let registry = InFlightRegistry::new();
        let (store, activity) = setup();

        let first = toggle(&registry, &store, activity.id);
        let second = toggle(&registry, &store, activity.id);

        let mut confirmed = activity.clone();
        confirmed.status = ActivityStatus::Completed;
        registry.settle(first, &Settlement::Confirmed(Some(confirmed.clone())), &store);
        assert_eq!(status(&store, activity.id), ActivityStatus::Planned);

        registry.settle(second, &Settlement::Failed, &store);
        assert_eq!(status(&store, activity.id), ActivityStatus::Completed);
        assert!(!store.get(&key()).unwrap().has_pending_local_mutation());
    }

    #[test]
    fn test_success_without_successor_replaces() {
        let registry = InFlightRegistry::new();
        let (store, activity) = setup();

        let id = toggle(&registry, &store, activity.id);
        let mut confirmed = activity.clone();
        confirmed.status = ActivityStatus::Completed;
        confirmed.title = "Walk (server)".to_string();
        registry.settle(id, &Settlement::Confirmed(Some(confirmed.clone())), &store);

        assert_eq!(store.get(&key()).unwrap().activities(), &[confirmed]);
    }

    #[test]
    fn test_confirmed_record_lands_by_date_after_failed_move() {
        let registry = InFlightRegistry::new();
        let (store, activity) = setup();
        let later = QueryKey::day(NaiveDate::from_ymd_opt(2024, 5, 3).unwrap());
        store.set(&later, EntryData::Activities(vec![]));
        let id = activity.id;

        let patch = ActivityPatch::default().with_start(
            NaiveDate::from_ymd_opt(2024, 5, 3)
                .unwrap()
                .and_hms_opt(8, 0, 0)
                .unwrap(),
        );
        let moved = registry.begin(id, Operation::Update, |_| {
            store.speculate(id, |key, current, latest| {
                let patched = patch.apply_to(latest?);
                match (current.is_some(), key.covers(patched.date())) {
                    (true, true) => Some(ActivityTransform::Replace { id, with: patched }),
                    (true, false) => Some(ActivityTransform::Remove(id)),
                    (false, true) => Some(ActivityTransform::Insert(patched)),
                    (false, false) => None,
                }
            })
        });
        let toggled = toggle(&registry, &store, id);
        assert!(store.get(&later).unwrap().contains(id));
        assert!(!store.get(&key()).unwrap().contains(id));

        // The move is refused, the toggle persists on the original date.
        registry.settle(moved, &Settlement::Failed, &store);
        let mut confirmed = activity.clone();
        confirmed.status = ActivityStatus::Completed;
        registry.settle(toggled, &Settlement::Confirmed(Some(confirmed.clone())), &store);

        assert_eq!(store.get(&key()).unwrap().activities(), &[confirmed]);
        let later_entry = store.get(&later).unwrap();
        assert!(later_entry.activities().is_empty());
        assert!(!later_entry.has_pending_local_mutation());
        assert!(!store.get(&key()).unwrap().has_pending_local_mutation());
    }

    #[test]
    fn test_settle_unknown_mutation_is_noop() {
        let registry = InFlightRegistry::new();
        let (store, _) = setup();
        let id = registry.begin(ActivityId::local(), Operation::Create, |_| Vec::new());
        registry.settle(id, &Settlement::Failed, &store);
        assert!(registry.settle(id, &Settlement::Failed, &store).is_empty());
    }

    #[test]
    fn test_revision_bumps_on_begin_and_settle() {
        let registry = InFlightRegistry::new();
        let (store, _) = setup();
        let rx = registry.changes();

        let id = registry.begin(ActivityId::local(), Operation::Create, |_| Vec::new());
        let after_begin = *rx.borrow();
        registry.settle(id, &Settlement::Failed, &store);

        assert!(after_begin >= 1);
        assert!(*rx.borrow() > after_begin);
    }
}
