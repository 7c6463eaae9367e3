use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::recurrence::{RecurrenceRule, RecurrenceStamp};

/// Identifier of an activity.
///
/// `Stored` ids are assigned by the persistence collaborator. `Local` ids are
/// placeholders for speculative records that have not been persisted yet.
/// The variants never compare equal, so a placeholder cannot collide with a
/// real identifier even if the inner UUIDs happened to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "state", content = "id", rename_all = "snake_case")]
pub enum ActivityId {
    Stored(Uuid),
    Local(Uuid),
}

impl ActivityId {
    /// Generates a fresh placeholder id.
    pub fn local() -> Self {
        ActivityId::Local(Uuid::new_v4())
    }

    /// Returns true if this id is a speculative placeholder.
    pub fn is_local(&self) -> bool {
        matches!(self, ActivityId::Local(_))
    }

    /// Returns the persisted UUID, if any.
    pub fn stored(&self) -> Option<Uuid> {
        match self {
            ActivityId::Stored(id) => Some(*id),
            ActivityId::Local(_) => None,
        }
    }

    /// Derives the placeholder id of a recurrence occurrence.
    ///
    /// Deterministic: the same template id and occurrence number always give
    /// the same placeholder.
    pub fn occurrence(&self, occurrence_number: u32) -> Self {
        let base = match self {
            ActivityId::Stored(id) | ActivityId::Local(id) => id,
        };
        ActivityId::Local(Uuid::new_v5(base, &occurrence_number.to_be_bytes()))
    }
}

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivityId::Stored(id) => write!(f, "{}", id),
            ActivityId::Local(id) => write!(f, "local-{}", id),
        }
    }
}

/// Lifecycle status of an activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    #[default]
    Planned,
    InProgress,
    Completed,
    Cancelled,
    Skipped,
}

impl ActivityStatus {
    /// Status reached by toggling: `Completed` unless already completed, in
    /// which case the activity returns to `Planned`.
    pub fn toggled(self) -> Self {
        if self == ActivityStatus::Completed {
            ActivityStatus::Planned
        } else {
            ActivityStatus::Completed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::Planned => "planned",
            ActivityStatus::InProgress => "in_progress",
            ActivityStatus::Completed => "completed",
            ActivityStatus::Cancelled => "cancelled",
            ActivityStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Open metadata bag attached to an activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityMetadata {
    /// Rule requested when this activity originated a recurring series.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<RecurrenceRule>,
    /// Link to the series this activity was generated for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<RecurrenceStamp>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A scheduled unit of user time with a status lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub id: ActivityId,
    pub title: String,
    pub description: Option<String>,
    pub category_id: Option<Uuid>,
    pub start: NaiveDateTime,
    /// Never earlier than `start` when present.
    pub end: Option<NaiveDateTime>,
    pub status: ActivityStatus,
    #[serde(default)]
    pub metadata: ActivityMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Activity {
    /// Builds a speculative record with a fresh placeholder id.
    pub fn speculative(input: NewActivity, now: DateTime<Utc>) -> Self {
        Self::from_input(ActivityId::local(), input, now)
    }

    /// Builds a record from create input with the given id.
    pub fn from_input(id: ActivityId, input: NewActivity, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title: input.title,
            description: input.description,
            category_id: input.category_id,
            start: input.start,
            end: input.end,
            status: input.status,
            metadata: input.metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// Converts this record back into create input for the persistence collaborator.
    pub fn to_input(&self) -> NewActivity {
        NewActivity {
            title: self.title.clone(),
            description: self.description.clone(),
            category_id: self.category_id,
            start: self.start,
            end: self.end,
            status: self.status,
            metadata: self.metadata.clone(),
        }
    }

    /// Calendar date the activity is filed under.
    pub fn date(&self) -> NaiveDate {
        self.start.date()
    }

    /// Sets a specific ID for this activity (useful for testing).
    pub fn with_id(mut self, id: ActivityId) -> Self {
        self.id = id;
        self
    }
}

/// Input for creating an activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewActivity {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<Uuid>,
    pub start: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<NaiveDateTime>,
    #[serde(default)]
    pub status: ActivityStatus,
    #[serde(default)]
    pub metadata: ActivityMetadata,
}

impl NewActivity {
    /// Creates a planned activity input with just a title and a start.
    pub fn new(title: impl Into<String>, start: NaiveDateTime) -> Self {
        Self {
            title: title.into(),
            description: None,
            category_id: None,
            start,
            end: None,
            status: ActivityStatus::Planned,
            metadata: ActivityMetadata::default(),
        }
    }

    pub fn with_end(mut self, end: NaiveDateTime) -> Self {
        self.end = Some(end);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_category(mut self, category_id: Uuid) -> Self {
        self.category_id = Some(category_id);
        self
    }

    pub fn with_status(mut self, status: ActivityStatus) -> Self {
        self.status = status;
        self
    }
}

/// Partial update of an activity.
///
/// `None` leaves a field untouched. Clearable fields use a nested option so
/// that `Some(None)` clears them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<Option<Uuid>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<Option<NaiveDateTime>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ActivityStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ActivityMetadata>,
}

impl ActivityPatch {
    /// A patch that only changes the status.
    pub fn status(status: ActivityStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_start(mut self, start: NaiveDateTime) -> Self {
        self.start = Some(start);
        self
    }

    pub fn with_end(mut self, end: Option<NaiveDateTime>) -> Self {
        self.end = Some(end);
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = Some(description);
        self
    }

    /// Returns the activity with this patch applied. Bookkeeping timestamps
    /// are left to the persistence collaborator.
    pub fn apply_to(&self, activity: &Activity) -> Activity {
        let mut patched = activity.clone();
        if let Some(title) = &self.title {
            patched.title = title.clone();
        }
        if let Some(description) = &self.description {
            patched.description = description.clone();
        }
        if let Some(category_id) = self.category_id {
            patched.category_id = category_id;
        }
        if let Some(start) = self.start {
            patched.start = start;
        }
        if let Some(end) = self.end {
            patched.end = end;
        }
        if let Some(status) = self.status {
            patched.status = status;
        }
        if let Some(metadata) = &self.metadata {
            patched.metadata = metadata.clone();
        }
        patched
    }
}

/// A user-defined activity category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    /// CSS color value used by the timeline.
    pub color: String,
    pub icon: Option<String>,
}

impl Category {
    pub fn new(name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            color: color.into(),
            icon: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn test_local_and_stored_ids_never_collide() {
        let uuid = Uuid::new_v4();
        assert_ne!(ActivityId::Stored(uuid), ActivityId::Local(uuid));
        assert!(ActivityId::Local(uuid).is_local());
        assert_eq!(ActivityId::Stored(uuid).stored(), Some(uuid));
        assert_eq!(ActivityId::Local(uuid).stored(), None);
    }

    #[test]
    fn test_occurrence_ids_are_deterministic_and_local() {
        let template = ActivityId::local();
        assert_eq!(template.occurrence(2), template.occurrence(2));
        assert_ne!(template.occurrence(2), template.occurrence(3));
        assert!(ActivityId::Stored(Uuid::new_v4()).occurrence(2).is_local());
    }

    #[test]
    fn test_id_display() {
        let uuid = Uuid::nil();
        assert_eq!(
            ActivityId::Stored(uuid).to_string(),
            "00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(
            ActivityId::Local(uuid).to_string(),
            "local-00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_status_toggle() {
        assert_eq!(ActivityStatus::Planned.toggled(), ActivityStatus::Completed);
        assert_eq!(ActivityStatus::InProgress.toggled(), ActivityStatus::Completed);
        assert_eq!(ActivityStatus::Skipped.toggled(), ActivityStatus::Completed);
        assert_eq!(ActivityStatus::Completed.toggled(), ActivityStatus::Planned);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&ActivityStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }

    #[test]
    fn test_patch_applies_only_given_fields() {
        let input = NewActivity::new("Run", at(1, 8, 0))
            .with_end(at(1, 8, 30))
            .with_description("Park loop");
        let activity = Activity::speculative(input, Utc::now());

        let patch = ActivityPatch::default()
            .with_title("Long run")
            .with_description(None);
        let patched = patch.apply_to(&activity);

        assert_eq!(patched.title, "Long run");
        assert_eq!(patched.description, None);
        assert_eq!(patched.start, activity.start);
        assert_eq!(patched.end, activity.end);
        assert_eq!(patched.id, activity.id);
    }

    #[test]
    fn test_input_round_trip_keeps_fields() {
        let input = NewActivity::new("Journal", at(2, 21, 0)).with_status(ActivityStatus::InProgress);
        let activity = Activity::speculative(input.clone(), Utc::now());
        assert_eq!(activity.to_input(), input);
        assert_eq!(activity.date(), NaiveDate::from_ymd_opt(2024, 5, 2).unwrap());
    }

    #[test]
    fn test_metadata_extra_is_flattened() {
        let mut metadata = ActivityMetadata::default();
        metadata
            .extra
            .insert("mood".to_string(), serde_json::json!(4));
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json, serde_json::json!({ "mood": 4 }));
    }
}
