use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::storage::DateRange;

/// Identifies a cached result set.
///
/// Keys compare by value: two `Range` keys with the same bounds address the
/// same entry. Range keys carry their bounds as data so invalidation can test
/// containment without parsing strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryKey {
    /// Activities starting on one date.
    Day { date: NaiveDate },
    /// Activities starting within an inclusive date range.
    Range { range: DateRange },
    /// The static list of categories.
    Categories,
}

impl QueryKey {
    pub fn day(date: NaiveDate) -> Self {
        QueryKey::Day { date }
    }

    pub fn range(range: DateRange) -> Self {
        QueryKey::Range { range }
    }

    /// Returns true if an activity starting on `date` belongs to this key.
    pub fn covers(&self, date: NaiveDate) -> bool {
        match self {
            QueryKey::Day { date: day } => *day == date,
            QueryKey::Range { range } => range.contains(date),
            QueryKey::Categories => false,
        }
    }

    /// Returns true if this key caches activities.
    pub fn holds_activities(&self) -> bool {
        !matches!(self, QueryKey::Categories)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryKey::Day { date } => write!(f, "activities:{}", date),
            QueryKey::Range { range } => write!(f, "activities:{}", range),
            QueryKey::Categories => f.write_str("categories"),
        }
    }
}
