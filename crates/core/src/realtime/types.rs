use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::activity::{Activity, ActivityId, ActivityStatus};

/// What happened to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A committed change to an activity record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityChange {
    pub kind: ChangeKind,
    pub previous: Option<Activity>,
    pub current: Option<Activity>,
}

impl ActivityChange {
    /// The date the change is routed by: the current start, or the previous
    /// start for deletions.
    pub fn affected_date(&self) -> Option<NaiveDate> {
        let primary = match self.kind {
            ChangeKind::Delete => self.previous.as_ref(),
            ChangeKind::Insert | ChangeKind::Update => self.current.as_ref(),
        };
        primary
            .or(self.previous.as_ref())
            .or(self.current.as_ref())
            .map(Activity::date)
    }

    /// Every date the change touched. A rescheduled record touches both its
    /// old and its new day.
    pub fn affected_dates(&self) -> Vec<NaiveDate> {
        let mut dates: Vec<NaiveDate> = self.affected_date().into_iter().collect();
        for activity in [&self.previous, &self.current].into_iter().flatten() {
            if !dates.contains(&activity.date()) {
                dates.push(activity.date());
            }
        }
        dates
    }

    pub fn activity_id(&self) -> Option<ActivityId> {
        self.current
            .as_ref()
            .or(self.previous.as_ref())
            .map(|activity| activity.id)
    }

    /// User-facing description of the change.
    pub fn transition(&self) -> Transition {
        match self.kind {
            ChangeKind::Insert => Transition::Created,
            ChangeKind::Delete => Transition::Deleted,
            ChangeKind::Update => Transition::from_status(
                self.previous.as_ref().map(|a| a.status),
                self.current.as_ref().map(|a| a.status),
            ),
        }
    }
}

/// A change to the secondary per-activity state sub-resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub kind: ChangeKind,
    pub activity_id: Uuid,
}

/// An event delivered by the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "resource", rename_all = "snake_case")]
pub enum ChangeEvent {
    Activity(ActivityChange),
    State(StateChange),
}

impl ChangeEvent {
    pub fn inserted(current: Activity) -> Self {
        ChangeEvent::Activity(ActivityChange {
            kind: ChangeKind::Insert,
            previous: None,
            current: Some(current),
        })
    }

    pub fn updated(previous: Activity, current: Activity) -> Self {
        ChangeEvent::Activity(ActivityChange {
            kind: ChangeKind::Update,
            previous: Some(previous),
            current: Some(current),
        })
    }

    pub fn deleted(previous: Activity) -> Self {
        ChangeEvent::Activity(ActivityChange {
            kind: ChangeKind::Delete,
            previous: Some(previous),
            current: None,
        })
    }

    pub fn state(kind: ChangeKind, activity_id: Uuid) -> Self {
        ChangeEvent::State(StateChange { kind, activity_id })
    }
}

/// Human-readable label for a change, derived from the status delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Created,
    Completed,
    ReturnedToPlanned,
    Updated,
    Deleted,
}

impl Transition {
    /// `Completed` when the record became completed, `ReturnedToPlanned` when
    /// it stopped being completed, `Updated` otherwise.
    pub fn from_status(previous: Option<ActivityStatus>, current: Option<ActivityStatus>) -> Self {
        let was_completed = previous == Some(ActivityStatus::Completed);
        let is_completed = current == Some(ActivityStatus::Completed);
        match (was_completed, is_completed) {
            (false, true) => Transition::Completed,
            (true, false) => Transition::ReturnedToPlanned,
            _ => Transition::Updated,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Transition::Created => "created",
            Transition::Completed => "completed",
            Transition::ReturnedToPlanned => "returned to planned",
            Transition::Updated => "updated",
            Transition::Deleted => "deleted",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
