use thiserror::Error;

/// Errors that can occur when expanding a recurrence rule.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecurrenceError {
    #[error("Invalid recurrence rule: interval must be positive (got {0})")]
    InvalidInterval(u32),
    #[error(
        "Invalid recurrence rule: occurrence count must be between 1 and {max} (got {0})",
        max = super::types::MAX_OCCURRENCES
    )]
    InvalidOccurrenceCount(u32),
    #[error("Recurrence occurrence {0} falls outside the supported date range")]
    DateOutOfRange(u32),
}
