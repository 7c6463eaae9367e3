use thiserror::Error;

/// Errors that can occur when validating an activity.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActivityError {
    #[error("Activity title cannot be empty")]
    EmptyTitle,
    #[error("Activity title too long (max 200 characters)")]
    TitleTooLong,
    #[error("End must be after or equal to start")]
    InvalidTimeRange,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_error_display() {
        assert_eq!(
            ActivityError::EmptyTitle.to_string(),
            "Activity title cannot be empty"
        );
        assert_eq!(
            ActivityError::InvalidTimeRange.to_string(),
            "End must be after or equal to start"
        );
    }
}
