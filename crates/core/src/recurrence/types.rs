use serde::{Deserialize, Serialize};

use super::RecurrenceError;
use crate::activity::ActivityId;

/// Upper bound on the occurrences of one series, the template included.
///
/// Every occurrence becomes its own persisted record and cache write, so a
/// rule asking for more is rejected instead of expanded.
pub const MAX_OCCURRENCES: u32 = 1000;

/// How often a recurring activity repeats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceKind {
    #[default]
    None,
    Daily,
    Weekly,
    Monthly,
}

/// Recurrence requested for a new activity: "every `interval` units, at most
/// `max_occurrences` times".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub kind: RecurrenceKind,
    pub interval: u32,
    pub max_occurrences: u32,
}

impl RecurrenceRule {
    pub fn new(kind: RecurrenceKind, interval: u32, max_occurrences: u32) -> Self {
        Self {
            kind,
            interval,
            max_occurrences,
        }
    }

    pub fn daily(interval: u32, max_occurrences: u32) -> Self {
        Self::new(RecurrenceKind::Daily, interval, max_occurrences)
    }

    pub fn weekly(interval: u32, max_occurrences: u32) -> Self {
        Self::new(RecurrenceKind::Weekly, interval, max_occurrences)
    }

    pub fn monthly(interval: u32, max_occurrences: u32) -> Self {
        Self::new(RecurrenceKind::Monthly, interval, max_occurrences)
    }

    /// Returns true if the rule produces more than the template itself.
    pub fn is_recurring(&self) -> bool {
        self.kind != RecurrenceKind::None
    }

    /// Rejects zero intervals and occurrence counts outside
    /// `1..=MAX_OCCURRENCES`. Non-recurring rules are always valid.
    pub fn validate(&self) -> Result<(), RecurrenceError> {
        if !self.is_recurring() {
            return Ok(());
        }
        if self.interval == 0 {
            return Err(RecurrenceError::InvalidInterval(self.interval));
        }
        if !(1..=MAX_OCCURRENCES).contains(&self.max_occurrences) {
            return Err(RecurrenceError::InvalidOccurrenceCount(self.max_occurrences));
        }
        Ok(())
    }
}

/// Series link stamped on every generated occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceStamp {
    /// The originating activity. A placeholder until the original is stored.
    pub original_id: ActivityId,
    pub kind: RecurrenceKind,
    pub interval: u32,
    /// 1-based; the template itself is occurrence 1.
    pub occurrence_number: u32,
}
