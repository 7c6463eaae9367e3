//! wellsync_core - pure types and functions for the wellsync activity engine.
//!
//! Nothing in this crate performs I/O, spawns tasks or holds locks. The
//! stateful engine lives in the `wellsync` crate and builds on these pieces.

pub mod activity;
pub mod cache;
pub mod clock;
pub mod realtime;
pub mod recurrence;
pub mod storage;
