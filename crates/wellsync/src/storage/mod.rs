//! Persistence backends.
//!
//! The engine talks to persistence through the traits defined in
//! `wellsync_core::storage`. Backends are selected via feature flags.
//!
//! # Feature Flags
//!
//! - `inmemory` (default): in-memory repository with latency scripting and
//!   failure injection, for tests and local development.

#[cfg(feature = "inmemory")]
pub mod inmemory;

#[cfg(feature = "inmemory")]
pub use inmemory::{InMemoryActivityRepository, RepositoryOp};
