use chrono::{DateTime, Utc};
use serde::Serialize;

use wellsync_core::activity::{Activity, ActivityId, ActivityTransform, Category};
use wellsync_core::cache::QueryKey;

/// The result set cached under one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "items", rename_all = "snake_case")]
pub enum EntryData {
    /// Ordered by start, free of duplicate ids.
    Activities(Vec<Activity>),
    Categories(Vec<Category>),
}

impl EntryData {
    /// The empty result set matching the shape of `key`.
    pub fn empty_for(key: &QueryKey) -> Self {
        if key.holds_activities() {
            EntryData::Activities(Vec::new())
        } else {
            EntryData::Categories(Vec::new())
        }
    }

    pub fn activities(&self) -> Option<&[Activity]> {
        match self {
            EntryData::Activities(activities) => Some(activities),
            EntryData::Categories(_) => None,
        }
    }

    pub fn categories(&self) -> Option<&[Category]> {
        match self {
            EntryData::Categories(categories) => Some(categories),
            EntryData::Activities(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            EntryData::Activities(activities) => activities.len(),
            EntryData::Categories(categories) => categories.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A cached result set plus its freshness bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub data: EntryData,
    /// When the data was last committed from an authoritative result.
    pub fetched_at: Option<DateTime<Utc>>,
    pub is_stale: bool,
    pub(crate) fetch: Option<u64>,
    pub(crate) follow_up: bool,
    pub(crate) pending: u32,
    /// Bumped on every local write; a refetch that started under an older
    /// epoch cannot be committed.
    pub(crate) epoch: u64,
}

impl CacheEntry {
    /// An entry that has never been fetched.
    pub(crate) fn absent(key: &QueryKey) -> Self {
        Self {
            data: EntryData::empty_for(key),
            fetched_at: None,
            is_stale: true,
            fetch: None,
            follow_up: false,
            pending: 0,
            epoch: 0,
        }
    }

    /// Returns true while a refetch is in flight.
    pub fn is_loading(&self) -> bool {
        self.fetch.is_some()
    }

    pub fn has_pending_local_mutation(&self) -> bool {
        self.pending > 0
    }

    pub fn activities(&self) -> &[Activity] {
        self.data.activities().unwrap_or_default()
    }

    pub fn find(&self, id: ActivityId) -> Option<&Activity> {
        self.activities().iter().find(|activity| activity.id == id)
    }

    pub fn contains(&self, id: ActivityId) -> bool {
        self.find(id).is_some()
    }

    /// Applies a single-record transform. `None` when the entry does not
    /// hold activities.
    pub(crate) fn apply(&mut self, transform: &ActivityTransform) -> Option<Option<(usize, Activity)>> {
        match &mut self.data {
            EntryData::Activities(activities) => {
                let previous = transform.apply(activities);
                self.epoch += 1;
                Some(previous)
            }
            EntryData::Categories(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use wellsync_core::activity::NewActivity;

    fn day_key() -> QueryKey {
        QueryKey::day(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap())
    }

    #[test]
    fn test_absent_entry_is_stale_and_empty() {
        let entry = CacheEntry::absent(&day_key());
        assert!(entry.is_stale);
        assert!(!entry.is_loading());
        assert!(entry.data.is_empty());
        assert_eq!(entry.fetched_at, None);
        assert!(entry.data.activities().is_some());
    }

    #[test]
    fn test_categories_key_gets_category_data() {
        let entry = CacheEntry::absent(&QueryKey::Categories);
        assert!(entry.data.categories().is_some());
        assert!(entry.activities().is_empty());
    }

    #[test]
    fn test_apply_bumps_epoch() {
        let mut entry = CacheEntry::absent(&day_key());
        let start = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        let activity = Activity::speculative(NewActivity::new("Yoga", start), Utc::now());

        let previous = entry.apply(&ActivityTransform::Insert(activity.clone()));

        assert_eq!(previous, Some(None));
        assert_eq!(entry.epoch, 1);
        assert!(entry.contains(activity.id));
    }

    #[test]
    fn test_apply_to_categories_is_rejected() {
        let mut entry = CacheEntry::absent(&QueryKey::Categories);
        let previous = entry.apply(&ActivityTransform::Remove(ActivityId::local()));
        assert_eq!(previous, None);
        assert_eq!(entry.epoch, 0);
    }
}
