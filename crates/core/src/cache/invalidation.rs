//! Pure planning of cache invalidations.
//!
//! Given what changed and which keys are currently cached, these functions
//! compute the keys that must be marked stale. They never look at cached
//! data, only at the keys and the bounds the keys carry.

use std::collections::BTreeSet;

use chrono::NaiveDate;

use super::QueryKey;
use crate::storage::DateRange;

/// The date (or dates) a change touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeTarget {
    Day(NaiveDate),
    Span(DateRange),
}

impl CascadeTarget {
    /// Returns true if a cached key must be invalidated for this change alone,
    /// ignoring the "today" rule.
    fn touches(&self, key: &QueryKey) -> bool {
        match (self, key) {
            (_, QueryKey::Categories) => false,
            (CascadeTarget::Day(changed), QueryKey::Day { date }) => date == changed,
            (CascadeTarget::Day(changed), QueryKey::Range { range }) => range.contains(*changed),
            (CascadeTarget::Span(changed), QueryKey::Day { date }) => changed.contains(*date),
            (CascadeTarget::Span(changed), QueryKey::Range { range }) => range.overlaps(changed),
        }
    }
}

impl From<NaiveDate> for CascadeTarget {
    fn from(date: NaiveDate) -> Self {
        CascadeTarget::Day(date)
    }
}

impl From<DateRange> for CascadeTarget {
    fn from(range: DateRange) -> Self {
        CascadeTarget::Span(range)
    }
}

/// Computes the cached keys a change invalidates.
///
/// - the day key of the changed date (every day key inside a changed span),
/// - every range key whose bounds contain the changed date (overlap the span),
/// - the day key of `today`, which the timeline always shows.
///
/// Only keys present in `tracked` are returned, sorted and without duplicates.
pub fn plan_invalidation<'a>(
    target: &CascadeTarget,
    tracked: impl IntoIterator<Item = &'a QueryKey>,
    today: NaiveDate,
) -> Vec<QueryKey> {
    let today_key = QueryKey::day(today);
    tracked
        .into_iter()
        .filter(|key| target.touches(key) || **key == today_key)
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Computes the keys to refresh after the realtime channel reconnects.
///
/// Missed events cannot be replayed, so "today" and every cached range are
/// treated as suspect.
pub fn plan_catch_up<'a>(
    tracked: impl IntoIterator<Item = &'a QueryKey>,
    today: NaiveDate,
) -> Vec<QueryKey> {
    let today_key = QueryKey::day(today);
    tracked
        .into_iter()
        .filter(|key| matches!(key, QueryKey::Range { .. }) || **key == today_key)
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
    }

    fn range(start: u32, end: u32) -> QueryKey {
        QueryKey::range(DateRange::new(date(start), date(end)).unwrap())
    }

    #[test]
    fn test_day_change_marks_day_and_containing_range() {
        let tracked = vec![
            QueryKey::day(date(9)),
            QueryKey::day(date(10)),
            QueryKey::day(date(11)),
            range(8, 12),
            QueryKey::Categories,
        ];

        let keys = plan_invalidation(&CascadeTarget::Day(date(10)), &tracked, date(20));

        assert_eq!(keys, vec![QueryKey::day(date(10)), range(8, 12)]);
    }

    #[test]
    fn test_today_is_always_included() {
        let tracked = vec![QueryKey::day(date(10)), QueryKey::day(date(20))];

        let keys = plan_invalidation(&CascadeTarget::Day(date(10)), &tracked, date(20));

        assert_eq!(keys, vec![QueryKey::day(date(10)), QueryKey::day(date(20))]);
    }

    #[test]
    fn test_today_not_tracked_is_not_invented() {
        let tracked = vec![QueryKey::day(date(10))];

        let keys = plan_invalidation(&CascadeTarget::Day(date(10)), &tracked, date(20));

        assert_eq!(keys, vec![QueryKey::day(date(10))]);
    }

    #[test]
    fn test_range_not_containing_date_is_untouched() {
        let tracked = vec![range(1, 7), range(8, 14)];

        let keys = plan_invalidation(&CascadeTarget::Day(date(7)), &tracked, date(30));

        assert_eq!(keys, vec![range(1, 7)]);
    }

    #[test]
    fn test_span_change_is_bounded_to_its_days() {
        let tracked = vec![
            QueryKey::day(date(4)),
            QueryKey::day(date(5)),
            QueryKey::day(date(7)),
            QueryKey::day(date(8)),
            range(1, 4),
            range(7, 14),
            range(20, 27),
        ];
        let span = DateRange::new(date(5), date(7)).unwrap();

        let keys = plan_invalidation(&CascadeTarget::Span(span), &tracked, date(30));

        assert_eq!(
            keys,
            vec![QueryKey::day(date(5)), QueryKey::day(date(7)), range(7, 14)]
        );
    }

    #[test]
    fn test_categories_never_invalidated() {
        let tracked = vec![QueryKey::Categories];
        let keys = plan_invalidation(&CascadeTarget::Day(date(1)), &tracked, date(1));
        assert!(keys.is_empty());
    }

    #[test]
    fn test_catch_up_covers_today_and_ranges() {
        let tracked = vec![
            QueryKey::day(date(3)),
            QueryKey::day(date(20)),
            range(1, 7),
            range(15, 21),
            QueryKey::Categories,
        ];

        let keys = plan_catch_up(&tracked, date(20));

        assert_eq!(keys, vec![QueryKey::day(date(20)), range(1, 7), range(15, 21)]);
    }
}
