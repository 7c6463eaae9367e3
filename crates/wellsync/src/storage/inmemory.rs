//! In-memory repository implementation.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tokio::sync::{RwLock, Semaphore};
use uuid::Uuid;

use wellsync_core::activity::{
    validate_activity, Activity, ActivityId, ActivityPatch, Category, NewActivity,
};
use wellsync_core::realtime::ChangeEvent;
use wellsync_core::storage::{
    ActivityRepository, CategoryRepository, DateRange, RepositoryError, Result,
};

#[cfg(feature = "memory")]
use crate::realtime::MemoryChangeFeed;

/// Repository call kinds that can be scripted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryOp {
    Create,
    Update,
    Delete,
    List,
}

#[derive(Debug, Default)]
struct Script {
    failures: HashMap<RepositoryOp, VecDeque<RepositoryError>>,
    latencies: HashMap<RepositoryOp, VecDeque<Duration>>,
    rejected_dates: HashMap<NaiveDate, RepositoryError>,
    gates: HashMap<RepositoryOp, Arc<Semaphore>>,
}

/// In-memory storage backend for testing.
///
/// Data is not persisted and will be lost when the repository is dropped.
/// Calls can be delayed and made to fail through a script, and committed
/// changes can be published to a [`MemoryChangeFeed`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryActivityRepository {
    activities: Arc<RwLock<HashMap<Uuid, Activity>>>,
    categories: Arc<RwLock<Vec<Category>>>,
    script: Arc<Mutex<Script>>,
    #[cfg(feature = "memory")]
    feed: Option<MemoryChangeFeed>,
}

impl InMemoryActivityRepository {
    /// Creates a new empty in-memory repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes every committed change to `feed`.
    #[cfg(feature = "memory")]
    pub fn with_change_feed(mut self, feed: MemoryChangeFeed) -> Self {
        self.feed = Some(feed);
        self
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes the next call of `op` fail with `error`. Queued failures are
    /// consumed in order.
    pub fn queue_failure(&self, op: RepositoryOp, error: RepositoryError) {
        self.script().failures.entry(op).or_default().push_back(error);
    }

    /// Delays the next calls of `op`, one entry per call.
    pub fn script_latency(&self, op: RepositoryOp, delays: impl IntoIterator<Item = Duration>) {
        self.script()
            .latencies
            .entry(op)
            .or_default()
            .extend(delays);
    }

    /// Refuses every create or update landing on `date`.
    pub fn reject_date(&self, date: NaiveDate, error: RepositoryError) {
        self.script().rejected_dates.insert(date, error);
    }

    /// Holds every later call of `op` until the returned gate grants it a
    /// permit. Each call consumes one permit.
    pub fn hold(&self, op: RepositoryOp) -> Arc<Semaphore> {
        self.script()
            .gates
            .entry(op)
            .or_insert_with(|| Arc::new(Semaphore::new(0)))
            .clone()
    }

    /// Stores a record directly, bypassing the script and the feed.
    pub async fn seed(&self, input: NewActivity) -> Activity {
        let id = Uuid::new_v4();
        let activity = Activity::from_input(ActivityId::Stored(id), input, Utc::now());
        self.activities.write().await.insert(id, activity.clone());
        activity
    }

    pub async fn add_category(&self, category: Category) {
        self.categories.write().await.push(category);
    }

    pub async fn get(&self, id: Uuid) -> Option<Activity> {
        self.activities.read().await.get(&id).cloned()
    }

    /// Every stored record ordered by start.
    pub async fn all(&self) -> Vec<Activity> {
        let activities = self.activities.read().await;
        sorted(activities.values().cloned().collect())
    }

    pub async fn len(&self) -> usize {
        self.activities.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Applies the scripted gate, latency and failure of one call.
    async fn enter(&self, op: RepositoryOp) -> Result<()> {
        let (gate, delay, failure) = {
            let mut script = self.script();
            let delay = script
                .latencies
                .get_mut(&op)
                .and_then(VecDeque::pop_front);
            let failure = script.failures.get_mut(&op).and_then(VecDeque::pop_front);
            (script.gates.get(&op).cloned(), delay, failure)
        };
        if let Some(gate) = gate {
            // Err only once the gate is closed.
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn check_date(&self, activity: &Activity) -> Result<()> {
        match self.script().rejected_dates.get(&activity.date()) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    #[cfg(feature = "memory")]
    fn publish(&self, event: ChangeEvent) {
        if let Some(feed) = &self.feed {
            feed.publish(event);
        }
    }

    #[cfg(not(feature = "memory"))]
    fn publish(&self, _event: ChangeEvent) {}
}

fn sorted(mut activities: Vec<Activity>) -> Vec<Activity> {
    activities.sort_by_key(|activity| activity.start);
    activities
}

fn not_found(id: Uuid) -> RepositoryError {
    RepositoryError::NotFound {
        entity_type: "Activity",
        id: id.to_string(),
    }
}

#[async_trait]
impl ActivityRepository for InMemoryActivityRepository {
    async fn create_activity(&self, input: &NewActivity) -> Result<Activity> {
        self.enter(RepositoryOp::Create).await?;

        let id = Uuid::new_v4();
        let activity = Activity::from_input(ActivityId::Stored(id), input.clone(), Utc::now());
        validate_activity(&activity)
            .map_err(|error| RepositoryError::InvalidData(error.to_string()))?;
        self.check_date(&activity)?;

        self.activities.write().await.insert(id, activity.clone());
        self.publish(ChangeEvent::inserted(activity.clone()));
        Ok(activity)
    }

    async fn update_activity(&self, id: Uuid, patch: &ActivityPatch) -> Result<Activity> {
        self.enter(RepositoryOp::Update).await?;

        let mut activities = self.activities.write().await;
        let previous = activities.get(&id).cloned().ok_or_else(|| not_found(id))?;
        let mut updated = patch.apply_to(&previous);
        updated.updated_at = Utc::now();
        validate_activity(&updated)
            .map_err(|error| RepositoryError::InvalidData(error.to_string()))?;
        self.check_date(&updated)?;

        activities.insert(id, updated.clone());
        drop(activities);

        self.publish(ChangeEvent::updated(previous, updated.clone()));
        Ok(updated)
    }

    async fn delete_activity(&self, id: Uuid) -> Result<()> {
        self.enter(RepositoryOp::Delete).await?;

        let removed = self
            .activities
            .write()
            .await
            .remove(&id)
            .ok_or_else(|| not_found(id))?;
        self.publish(ChangeEvent::deleted(removed));
        Ok(())
    }

    async fn list_by_date(&self, date: NaiveDate) -> Result<Vec<Activity>> {
        self.enter(RepositoryOp::List).await?;

        let activities = self.activities.read().await;
        Ok(sorted(
            activities
                .values()
                .filter(|activity| activity.date() == date)
                .cloned()
                .collect(),
        ))
    }

    async fn list_by_range(&self, range: DateRange) -> Result<Vec<Activity>> {
        self.enter(RepositoryOp::List).await?;

        let activities = self.activities.read().await;
        Ok(sorted(
            activities
                .values()
                .filter(|activity| range.contains(activity.date()))
                .cloned()
                .collect(),
        ))
    }
}

#[async_trait]
impl CategoryRepository for InMemoryActivityRepository {
    async fn list_categories(&self) -> Result<Vec<Category>> {
        self.enter(RepositoryOp::List).await?;
        Ok(self.categories.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use wellsync_core::activity::ActivityStatus;

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_assigns_stored_id() {
        let repo = InMemoryActivityRepository::new();

        let created = repo
            .create_activity(&NewActivity::new("Yoga", at(1, 7)))
            .await
            .unwrap();

        assert!(!created.id.is_local());
        assert_eq!(repo.get(created.id.stored().unwrap()).await, Some(created));
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_input() {
        let repo = InMemoryActivityRepository::new();
        let result = repo.create_activity(&NewActivity::new("  ", at(1, 7))).await;
        assert!(matches!(result, Err(RepositoryError::InvalidData(_))));
        assert!(repo.is_empty().await);
    }

    #[tokio::test]
    async fn test_update_applies_patch() {
        let repo = InMemoryActivityRepository::new();
        let seeded = repo.seed(NewActivity::new("Read", at(2, 21))).await;
        let id = seeded.id.stored().unwrap();

        let updated = repo
            .update_activity(id, &ActivityPatch::status(ActivityStatus::Completed))
            .await
            .unwrap();

        assert_eq!(updated.status, ActivityStatus::Completed);
        assert_eq!(updated.title, "Read");
    }

    #[tokio::test]
    async fn test_update_missing_returns_not_found() {
        let repo = InMemoryActivityRepository::new();
        let id = Uuid::new_v4();
        let result = repo.update_activity(id, &ActivityPatch::default()).await;
        assert_eq!(result, Err(not_found(id)));
    }

    #[tokio::test]
    async fn test_delete_removes_record() {
        let repo = InMemoryActivityRepository::new();
        let seeded = repo.seed(NewActivity::new("Read", at(2, 21))).await;
        let id = seeded.id.stored().unwrap();

        repo.delete_activity(id).await.unwrap();

        assert_eq!(repo.get(id).await, None);
        assert_eq!(repo.delete_activity(id).await, Err(not_found(id)));
    }

    #[tokio::test]
    async fn test_list_by_date_and_range_are_sorted() {
        let repo = InMemoryActivityRepository::new();
        repo.seed(NewActivity::new("late", at(2, 20))).await;
        repo.seed(NewActivity::new("early", at(2, 6))).await;
        repo.seed(NewActivity::new("other", at(5, 9))).await;

        let day = repo
            .list_by_date(NaiveDate::from_ymd_opt(2024, 5, 2).unwrap())
            .await
            .unwrap();
        let titles: Vec<&str> = day.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, vec!["early", "late"]);

        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 5, 7).unwrap(),
        )
        .unwrap();
        assert_eq!(repo.list_by_range(range).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_queued_failures_are_consumed_in_order() {
        let repo = InMemoryActivityRepository::new();
        repo.queue_failure(
            RepositoryOp::Create,
            RepositoryError::ConnectionFailed("offline".to_string()),
        );

        let first = repo.create_activity(&NewActivity::new("a", at(1, 7))).await;
        let second = repo.create_activity(&NewActivity::new("b", at(1, 8))).await;

        assert_eq!(
            first,
            Err(RepositoryError::ConnectionFailed("offline".to_string()))
        );
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_rejected_date() {
        let repo = InMemoryActivityRepository::new();
        let error = RepositoryError::QueryFailed("quota".to_string());
        repo.reject_date(NaiveDate::from_ymd_opt(2024, 5, 8).unwrap(), error.clone());

        assert_eq!(
            repo.create_activity(&NewActivity::new("a", at(8, 7))).await,
            Err(error)
        );
        assert!(repo
            .create_activity(&NewActivity::new("a", at(9, 7)))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_held_calls_wait_for_permits() {
        let repo = InMemoryActivityRepository::new();
        let gate = repo.hold(RepositoryOp::Create);

        let task = {
            let repo = repo.clone();
            tokio::spawn(async move {
                repo.create_activity(&NewActivity::new("Yoga", at(1, 7)))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!task.is_finished());
        assert!(repo.is_empty().await);

        // Other operations are not held.
        repo.list_by_date(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap())
            .await
            .unwrap();

        gate.add_permits(1);
        let created = task.await.unwrap().unwrap();
        assert_eq!(repo.all().await, vec![created]);
    }

    #[cfg(feature = "memory")]
    #[tokio::test]
    async fn test_committed_changes_are_published() {
        use wellsync_core::realtime::{ChangeFeed, ChangeKind};

        let feed = MemoryChangeFeed::new();
        let repo = InMemoryActivityRepository::new().with_change_feed(feed.clone());
        let mut receiver = feed.subscribe().await.unwrap();

        let created = repo
            .create_activity(&NewActivity::new("Yoga", at(1, 7)))
            .await
            .unwrap();

        let ChangeEvent::Activity(change) = receiver.recv().await.unwrap() else {
            panic!("Expected activity change");
        };
        assert_eq!(change.kind, ChangeKind::Insert);
        assert_eq!(change.current, Some(created));
    }
}
