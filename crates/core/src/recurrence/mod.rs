//! Recurrence expansion.
//!
//! A recurring activity is not a first-class series: expanding a template
//! yields independent activities linked only by a [`RecurrenceStamp`] in
//! their metadata.

mod error;
mod expand;
mod types;

pub use error::RecurrenceError;
pub use expand::{add_months_clamped, expand, last_day_of_month};
pub use types::{RecurrenceKind, RecurrenceRule, RecurrenceStamp, MAX_OCCURRENCES};
