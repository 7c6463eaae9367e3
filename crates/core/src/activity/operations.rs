use super::error::ActivityError;
use super::types::{Activity, ActivityId};

/// Validates an activity before it is created or after a patch is applied.
pub fn validate_activity(activity: &Activity) -> Result<(), ActivityError> {
    if activity.title.trim().is_empty() {
        return Err(ActivityError::EmptyTitle);
    }
    if activity.title.chars().count() > 200 {
        return Err(ActivityError::TitleTooLong);
    }
    if activity.end.is_some_and(|end| end < activity.start) {
        return Err(ActivityError::InvalidTimeRange);
    }
    Ok(())
}

/// A single-record change to an ordered activity list.
///
/// Every variant touches at most one identifier and keeps the list free of
/// duplicate ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityTransform {
    /// Inserts in start order, or replaces in place when the id is present.
    Insert(Activity),
    /// Swaps the record `id` for `with`. No-op when `id` is absent.
    Replace { id: ActivityId, with: Activity },
    /// Like `Replace`, but inserts `with` in start order when `id` is
    /// absent.
    Upsert { id: ActivityId, with: Activity },
    Remove(ActivityId),
    /// Puts a record back the way it was before a speculative write.
    /// `None` means the record did not exist.
    Restore {
        id: ActivityId,
        previous: Option<(usize, Activity)>,
    },
}

impl ActivityTransform {
    /// The identifier whose prior state `apply` reports.
    pub fn target(&self) -> ActivityId {
        match self {
            ActivityTransform::Insert(activity) => activity.id,
            ActivityTransform::Replace { id, .. }
            | ActivityTransform::Upsert { id, .. }
            | ActivityTransform::Remove(id)
            | ActivityTransform::Restore { id, .. } => *id,
        }
    }

    /// Applies the transform and returns the prior `(position, record)` of
    /// the target id, if it was present.
    pub fn apply(&self, activities: &mut Vec<Activity>) -> Option<(usize, Activity)> {
        match self {
            ActivityTransform::Insert(activity) => {
                match activities.iter().position(|a| a.id == activity.id) {
                    Some(pos) => {
                        let old = std::mem::replace(&mut activities[pos], activity.clone());
                        Some((pos, old))
                    }
                    None => {
                        insert_sorted(activities, activity.clone());
                        None
                    }
                }
            }
            ActivityTransform::Replace { id, with } => {
                let mut pos = activities.iter().position(|a| a.id == *id)?;
                let old = activities.remove(pos);
                if with.id != *id {
                    if let Some(dup) = activities.iter().position(|a| a.id == with.id) {
                        activities.remove(dup);
                        if dup < pos {
                            pos -= 1;
                        }
                    }
                }
                if with.start == old.start {
                    activities.insert(pos, with.clone());
                } else {
                    insert_sorted(activities, with.clone());
                }
                Some((pos, old))
            }
            ActivityTransform::Upsert { id, with } => {
                if activities.iter().any(|a| a.id == *id) {
                    return ActivityTransform::Replace {
                        id: *id,
                        with: with.clone(),
                    }
                    .apply(activities);
                }
                ActivityTransform::Insert(with.clone()).apply(activities);
                None
            }
            ActivityTransform::Remove(id) => {
                let pos = activities.iter().position(|a| a.id == *id)?;
                Some((pos, activities.remove(pos)))
            }
            ActivityTransform::Restore { id, previous } => {
                let current = activities
                    .iter()
                    .position(|a| a.id == *id)
                    .map(|pos| (pos, activities.remove(pos)));
                if let Some((pos, activity)) = previous {
                    activities.retain(|a| a.id != activity.id);
                    let pos = (*pos).min(activities.len());
                    activities.insert(pos, activity.clone());
                }
                current
            }
        }
    }
}

fn insert_sorted(activities: &mut Vec<Activity>, activity: Activity) {
    let pos = activities.partition_point(|a| a.start <= activity.start);
    activities.insert(pos, activity);
}
