//! Engine error types.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use wellsync_core::activity::{ActivityError, ActivityId};
use wellsync_core::recurrence::RecurrenceError;
use wellsync_core::storage::RepositoryError;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// A mutation the coordinator performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
    ToggleStatus,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::ToggleStatus => "toggle status",
        })
    }
}

/// Errors surfaced by the sync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Rejected before any cache mutation.
    #[error(transparent)]
    InvalidRecurrenceRule(#[from] RecurrenceError),

    /// Rejected before any cache mutation.
    #[error(transparent)]
    InvalidActivity(#[from] ActivityError),

    /// The persistence collaborator refused the mutation; the speculative
    /// change has been rolled back.
    #[error("Failed to {operation}: {source}")]
    MutationRejected {
        operation: Operation,
        #[source]
        source: RepositoryError,
    },

    /// The originating record was stored but some occurrences were not.
    #[error("{failed} of {attempted} recurrence occurrences failed to persist")]
    PartialRecurrenceFailure { attempted: usize, failed: usize },

    #[error("Realtime channel disconnected")]
    ChannelDisconnected,

    #[error("Activity {0} has not been persisted yet")]
    NotPersisted(ActivityId),
}
