//! wellsync - client-side activity cache with optimistic mutations and
//! realtime synchronization.
//!
//! The [`SyncEngine`] ties together the cache store, the mutation
//! coordinator, the invalidation cascade, the realtime listener and the sync
//! monitor. Pure types and planning functions come from `wellsync_core`.

pub mod cascade;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod monitor;
pub mod notify;
pub mod realtime;
pub mod storage;
pub mod store;

pub use config::SyncConfig;
pub use coordinator::{CreateOutcome, InstanceFailure};
pub use engine::{ReadResult, SyncEngine};
pub use error::{Operation, Result, SyncError};
pub use monitor::SyncStatus;
pub use notify::{Notification, NotificationLevel};
pub use realtime::ListenerState;
pub use store::{CacheEntry, EntryData};
