use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::activity::{Activity, ActivityPatch, Category, NewActivity};

use super::{DateRange, Result};

/// Remote persistence for activities.
///
/// Every call either returns the stored state or fails with a
/// [`RepositoryError`](super::RepositoryError) that callers surface verbatim.
#[async_trait]
pub trait ActivityRepository: Send + Sync {
    /// Creates an activity and returns the stored record with its real id.
    async fn create_activity(&self, input: &NewActivity) -> Result<Activity>;

    /// Applies a partial update and returns the stored record.
    async fn update_activity(&self, id: Uuid, patch: &ActivityPatch) -> Result<Activity>;

    /// Deletes an activity by its ID.
    async fn delete_activity(&self, id: Uuid) -> Result<()>;

    /// Lists the activities starting on a date, ordered by start.
    async fn list_by_date(&self, date: NaiveDate) -> Result<Vec<Activity>>;

    /// Lists the activities starting within a date range, ordered by start.
    async fn list_by_range(&self, range: DateRange) -> Result<Vec<Activity>>;
}

/// Remote persistence for activity categories.
#[async_trait]
pub trait CategoryRepository: Send + Sync {
    /// Lists every category of the current user.
    async fn list_categories(&self) -> Result<Vec<Category>>;
}

/// Combined trait for backends that serve both activities and categories.
pub trait Repository: ActivityRepository + CategoryRepository {}

impl<T: ActivityRepository + CategoryRepository> Repository for T {}
