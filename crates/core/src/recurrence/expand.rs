use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};

use super::types::{RecurrenceKind, RecurrenceRule, RecurrenceStamp};
use super::RecurrenceError;
use crate::activity::Activity;

/// Expands a template into the ordered list of its occurrences.
///
/// Occurrence 0 is the template itself, unchanged. Occurrence `i` starts at
/// `series_start` plus `i * interval` units and keeps the template's exact
/// duration. Generated occurrences get placeholder ids derived from the
/// template id and a [`RecurrenceStamp`] pointing back at the template.
///
/// Monthly steps keep the day of month when the target month has it and
/// clamp to the month's last day otherwise (Jan 31 → Feb 29 → Mar 31).
///
/// # Examples
///
/// ```
/// use chrono::{NaiveDate, Utc};
/// use wellsync_core::activity::{Activity, NewActivity};
/// use wellsync_core::recurrence::{expand, RecurrenceRule};
///
/// let start = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap().and_hms_opt(9, 0, 0).unwrap();
/// let template = Activity::speculative(NewActivity::new("Rent", start), Utc::now());
///
/// let series = expand(&template, &RecurrenceRule::monthly(1, 3), start).unwrap();
/// let days: Vec<_> = series.iter().map(|a| a.date().to_string()).collect();
/// assert_eq!(days, vec!["2024-01-31", "2024-02-29", "2024-03-31"]);
/// ```
pub fn expand(
    template: &Activity,
    rule: &RecurrenceRule,
    series_start: NaiveDateTime,
) -> Result<Vec<Activity>, RecurrenceError> {
    if !rule.is_recurring() {
        return Ok(vec![template.clone()]);
    }
    rule.validate()?;

    // Bounded by `validate`.
    let mut series = Vec::with_capacity(rule.max_occurrences as usize);
    series.push(template.clone());

    for i in 1..rule.max_occurrences {
        let occurrence_number = i + 1;
        let out_of_range = RecurrenceError::DateOutOfRange(occurrence_number);

        let start = occurrence_start(rule, series_start, i).ok_or(out_of_range.clone())?;
        let delta = start - template.start;
        let end = match template.end {
            Some(end) => Some(end.checked_add_signed(delta).ok_or(out_of_range)?),
            None => None,
        };

        let mut occurrence = template.clone();
        occurrence.id = template.id.occurrence(occurrence_number);
        occurrence.start = start;
        occurrence.end = end;
        occurrence.metadata.rule = None;
        occurrence.metadata.recurrence = Some(RecurrenceStamp {
            original_id: template.id,
            kind: rule.kind,
            interval: rule.interval,
            occurrence_number,
        });
        series.push(occurrence);
    }

    Ok(series)
}

fn occurrence_start(
    rule: &RecurrenceRule,
    series_start: NaiveDateTime,
    index: u32,
) -> Option<NaiveDateTime> {
    let steps = i64::from(index) * i64::from(rule.interval);
    match rule.kind {
        RecurrenceKind::None => Some(series_start),
        RecurrenceKind::Daily => series_start.checked_add_signed(Duration::try_days(steps)?),
        RecurrenceKind::Weekly => {
            series_start.checked_add_signed(Duration::try_days(steps.checked_mul(7)?)?)
        }
        RecurrenceKind::Monthly => add_months_clamped(series_start, u32::try_from(steps).ok()?),
    }
}

/// Adds calendar months, clamping the day to the last day of the target month.
pub fn add_months_clamped(datetime: NaiveDateTime, months: u32) -> Option<NaiveDateTime> {
    let month0 = i64::from(datetime.month0()) + i64::from(months);
    let year = i32::try_from(i64::from(datetime.year()) + month0.div_euclid(12)).ok()?;
    let month = u32::try_from(month0.rem_euclid(12)).ok()? + 1;

    let day = datetime.day().min(last_day_of_month(year, month)?);
    NaiveDate::from_ymd_opt(year, month, day).map(|date| date.and_time(datetime.time()))
}

/// Returns the number of the last day of the given month.
pub fn last_day_of_month(year: i32, month: u32) -> Option<u32> {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year.checked_add(1)?, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }?;
    first_of_next.pred_opt().map(|date| date.day())
}
