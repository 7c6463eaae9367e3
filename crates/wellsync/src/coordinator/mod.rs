//! Optimistic mutation coordinator.
//!
//! Every mutation follows the same protocol: speculative write to the cache,
//! persistence call, then commit (authoritative replace plus cascade) or
//! rollback. Persistence calls for one record run strictly in issue order.

mod inflight;

pub use inflight::{InFlight, InFlightRegistry, MutationId, RecordSnapshot, Settlement};

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{NaiveDate, NaiveDateTime};
use futures_util::future::join_all;
use tokio::sync::oneshot;
use uuid::Uuid;

use wellsync_core::activity::{
    validate_activity, Activity, ActivityId, ActivityPatch, ActivityStatus, ActivityTransform,
    NewActivity,
};
use wellsync_core::clock::Clock;
use wellsync_core::recurrence::{expand, RecurrenceRule};
use wellsync_core::storage::{ActivityRepository, Repository, RepositoryError};

use crate::cascade::Invalidator;
use crate::error::{Operation, Result, SyncError};
use crate::notify::Notifier;
use crate::store::{CacheStore, SpeculativeWrite};

/// A recurrence occurrence the repository refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceFailure {
    pub occurrence_number: u32,
    pub start: NaiveDateTime,
    pub error: RepositoryError,
}

/// Result of a create. The main record is always persisted; occurrences
/// are independent records and may fail individually.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOutcome {
    pub main: Activity,
    pub instances: Vec<Activity>,
    pub failures: Vec<InstanceFailure>,
}

impl CreateOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// `PartialRecurrenceFailure` when any occurrence failed.
    pub fn partial_failure(&self) -> Option<SyncError> {
        (!self.failures.is_empty()).then(|| SyncError::PartialRecurrenceFailure {
            attempted: self.instances.len() + self.failures.len(),
            failed: self.failures.len(),
        })
    }

    /// The main record followed by every persisted occurrence.
    pub fn records(&self) -> impl Iterator<Item = &Activity> {
        std::iter::once(&self.main).chain(self.instances.iter())
    }
}

/// Position in a record's persistence queue.
///
/// Dropping the turn lets the next mutation on the record proceed.
struct Turn {
    previous: Option<oneshot::Receiver<()>>,
    _done: oneshot::Sender<()>,
}

impl Turn {
    async fn wait(&mut self) {
        if let Some(previous) = self.previous.take() {
            // Err only means the predecessor finished or was dropped.
            let _ = previous.await;
        }
    }
}

pub struct MutationCoordinator {
    store: Arc<CacheStore>,
    registry: Arc<InFlightRegistry>,
    invalidator: Invalidator,
    repository: Arc<dyn Repository>,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    queues: Mutex<HashMap<Uuid, (MutationId, oneshot::Receiver<()>)>>,
}

impl MutationCoordinator {
    pub fn new(
        store: Arc<CacheStore>,
        registry: Arc<InFlightRegistry>,
        invalidator: Invalidator,
        repository: Arc<dyn Repository>,
        notifier: Notifier,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            registry,
            invalidator,
            repository,
            notifier,
            clock,
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Creates an activity, expanding `rule` into a series of independent
    /// records.
    ///
    /// Every occurrence shows up in the covering cache entries before the
    /// repository confirms anything. If the main record is refused, the
    /// whole series is rolled back. Occurrences are created in parallel
    /// once the main record is stored; those that fail are rolled back and
    /// reported in [`CreateOutcome::failures`].
    pub async fn create(
        &self,
        input: NewActivity,
        rule: Option<RecurrenceRule>,
    ) -> Result<CreateOutcome> {
        let now = self.clock.now();
        let mut template = Activity::speculative(input, now);
        let rule = rule.filter(RecurrenceRule::is_recurring);
        template.metadata.rule = rule;
        validate_activity(&template)?;

        let series = match &rule {
            Some(rule) => expand(&template, rule, template.start)?,
            None => vec![template.clone()],
        };
        let dates: BTreeSet<NaiveDate> = series.iter().map(Activity::date).collect();

        let main_mutation = self.begin_insert(&template);
        let drafts: Vec<(Activity, MutationId)> = series
            .into_iter()
            .skip(1)
            .map(|draft| {
                let mutation = self.begin_insert(&draft);
                (draft, mutation)
            })
            .collect();

        let main = match self.repository.create_activity(&template.to_input()).await {
            Ok(main) => main,
            Err(source) => {
                for (_, mutation) in &drafts {
                    self.settle(*mutation, Settlement::Failed);
                }
                self.settle(main_mutation, Settlement::Failed);
                let error = SyncError::MutationRejected {
                    operation: Operation::Create,
                    source,
                };
                self.notifier
                    .error(Operation::Create, template.id, error.to_string());
                return Err(error);
            }
        };
        self.settle(main_mutation, Settlement::Confirmed(Some(main.clone())));

        let results = join_all(drafts.iter().map(|(draft, _)| {
            let mut input = draft.to_input();
            if let Some(stamp) = input.metadata.recurrence.as_mut() {
                stamp.original_id = main.id;
            }
            let repository = &self.repository;
            async move { repository.create_activity(&input).await }
        }))
        .await;

        // Stale marks land before the pending writes are released, so the
        // refetches start as soon as the last one settles.
        for date in dates {
            self.invalidator.cascade(date);
        }

        let mut instances = Vec::new();
        let mut failures = Vec::new();
        for ((draft, mutation), result) in drafts.into_iter().zip(results) {
            match result {
                Ok(stored) => {
                    self.settle(mutation, Settlement::Confirmed(Some(stored.clone())));
                    instances.push(stored);
                }
                Err(error) => {
                    self.settle(mutation, Settlement::Failed);
                    let occurrence_number = draft
                        .metadata
                        .recurrence
                        .map(|stamp| stamp.occurrence_number)
                        .unwrap_or_default();
                    self.notifier.error(
                        Operation::Create,
                        draft.id,
                        format!(
                            "Failed to create occurrence {} of \"{}\": {}",
                            occurrence_number, draft.title, error
                        ),
                    );
                    failures.push(InstanceFailure {
                        occurrence_number,
                        start: draft.start,
                        error,
                    });
                }
            }
        }

        let message = if instances.is_empty() {
            "activity created".to_string()
        } else {
            format!("activity created with {} occurrences", instances.len() + 1)
        };
        self.notifier.success(Operation::Create, main.id, message);
        tracing::debug!(
            activity_id = %main.id,
            instances = instances.len(),
            failures = failures.len(),
            "Create settled"
        );

        Ok(CreateOutcome {
            main,
            instances,
            failures,
        })
    }

    /// Applies a partial update.
    pub async fn update(&self, id: ActivityId, patch: ActivityPatch) -> Result<Activity> {
        self.modify(id, patch, Operation::Update).await
    }

    /// Flips `current`, the status the caller displayed, between
    /// `completed` and `planned`.
    ///
    /// The status patch is applied to the latest speculative copy, so a
    /// toggle issued while an earlier one is in flight keeps that copy's
    /// other fields.
    pub async fn toggle_status(&self, id: ActivityId, current: ActivityStatus) -> Result<Activity> {
        let status = current.toggled();
        self.modify(id, ActivityPatch::status(status), Operation::ToggleStatus)
            .await
    }

    /// Deletes a record.
    pub async fn delete(&self, id: ActivityId) -> Result<()> {
        let uuid = id.stored().ok_or(SyncError::NotPersisted(id))?;
        let date = self.store.latest(id).map(|activity| activity.date());

        let (mutation, mut turn) = self.begin_queued(uuid, id, Operation::Delete, |store| {
            store.speculate(id, |_, current, _| {
                current.map(|_| ActivityTransform::Remove(id))
            })
        });

        turn.wait().await;
        let result = self.repository.delete_activity(uuid).await;
        self.finish_turn(uuid, mutation, turn);

        match result {
            Ok(()) => {
                self.invalidator
                    .cascade(date.unwrap_or_else(|| self.clock.today()));
                self.settle(mutation, Settlement::Confirmed(None));
                self.notifier
                    .success(Operation::Delete, id, "activity deleted");
                Ok(())
            }
            Err(source) => Err(self.reject(mutation, id, Operation::Delete, source)),
        }
    }

    async fn modify(
        &self,
        id: ActivityId,
        patch: ActivityPatch,
        operation: Operation,
    ) -> Result<Activity> {
        let uuid = id.stored().ok_or(SyncError::NotPersisted(id))?;
        let latest = self.store.latest(id);
        if let Some(current) = &latest {
            validate_activity(&patch.apply_to(current))?;
        }
        let previous_date = latest.as_ref().map(Activity::date);

        let (mutation, mut turn) = self.begin_queued(uuid, id, operation, |store| {
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

        turn.wait().await;
        let result = self.repository.update_activity(uuid, &patch).await;
        self.finish_turn(uuid, mutation, turn);

        match result {
            Ok(stored) => {
                if let Some(date) = previous_date.filter(|date| *date != stored.date()) {
                    self.invalidator.cascade(date);
                }
                self.invalidator.cascade(stored.date());
                self.settle(mutation, Settlement::Confirmed(Some(stored.clone())));

                let message = match operation {
                    Operation::ToggleStatus => format!("status changed to {}", stored.status),
                    _ => "activity updated".to_string(),
                };
                self.notifier.success(operation, id, message);
                Ok(stored)
            }
            Err(source) => Err(self.reject(mutation, id, operation, source)),
        }
    }

    fn begin_insert(&self, activity: &Activity) -> MutationId {
        let date = activity.date();
        self.registry
            .begin(activity.id, Operation::Create, |_| {
                self.store.speculate(activity.id, |key, _, _| {
                    key.covers(date)
                        .then(|| ActivityTransform::Insert(activity.clone()))
                })
            })
    }

    /// Registers the mutation, takes its turn in the record's queue and
    /// runs the speculative writes, all in one critical section.
    fn begin_queued<F>(
        &self,
        uuid: Uuid,
        id: ActivityId,
        operation: Operation,
        speculate: F,
    ) -> (MutationId, Turn)
    where
        F: FnOnce(&CacheStore) -> Vec<SpeculativeWrite>,
    {
        let mut turn = None;
        let mutation = self
            .registry
            .begin(id, operation, |mutation| {
                turn = Some(self.enqueue(uuid, mutation));
                speculate(&self.store)
            });
        let turn = turn.unwrap_or_else(|| self.enqueue(uuid, mutation));
        (mutation, turn)
    }

    fn enqueue(&self, uuid: Uuid, mutation: MutationId) -> Turn {
        let (done, next) = oneshot::channel();
        let previous = self
            .queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(uuid, (mutation, next))
            .map(|(_, receiver)| receiver);
        Turn {
            previous,
            _done: done,
        }
    }

    fn finish_turn(&self, uuid: Uuid, mutation: MutationId, turn: Turn) {
        drop(turn);
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        if queues.get(&uuid).is_some_and(|(last, _)| *last == mutation) {
            queues.remove(&uuid);
        }
    }

    fn settle(&self, mutation: MutationId, settlement: Settlement) {
        let tickets = self.registry.settle(mutation, &settlement, &self.store);
        self.invalidator.schedule(tickets);
    }

    fn reject(
        &self,
        mutation: MutationId,
        id: ActivityId,
        operation: Operation,
        source: RepositoryError,
    ) -> SyncError {
        self.settle(mutation, Settlement::Failed);
        let error = SyncError::MutationRejected { operation, source };
        self.notifier.error(operation, id, error.to_string());
        error
    }
}
