use thiserror::Error;

/// Errors that can occur when talking to the push channel.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("Subscription failed: {0}")]
    SubscribeFailed(String),
    #[error("Publish failed: {0}")]
    PublishFailed(String),
}

/// Result type for change feed operations.
pub type Result<T> = std::result::Result<T, FeedError>;
