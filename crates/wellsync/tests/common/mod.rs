#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use tracing_subscriber::EnvFilter;

use wellsync::realtime::MemoryChangeFeed;
use wellsync::storage::InMemoryActivityRepository;
use wellsync::{SyncConfig, SyncEngine};
use wellsync_core::activity::Activity;
use wellsync_core::clock::FixedClock;

/// "Today" for every scenario.
pub const TODAY: u32 = 20;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
}

pub fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    date(day).and_hms_opt(hour, minute, 0).unwrap()
}

pub fn config() -> SyncConfig {
    SyncConfig {
        notification_capacity: 64,
        reconnect_delay_ms: 10,
        monitor_interval_seconds: 1,
    }
}

pub struct Setup {
    pub engine: SyncEngine,
    pub repository: InMemoryActivityRepository,
    pub feed: MemoryChangeFeed,
}

/// Engine over an in-memory repository that publishes to an in-memory feed.
pub fn setup() -> Setup {
    setup_with_feed(MemoryChangeFeed::new())
}

pub fn setup_with_feed(feed: MemoryChangeFeed) -> Setup {
    init_tracing();
    let repository = InMemoryActivityRepository::new().with_change_feed(feed.clone());
    let engine = SyncEngine::new(
        Arc::new(repository.clone()),
        Arc::new(FixedClock::new(date(TODAY))),
        config(),
    );
    Setup {
        engine,
        repository,
        feed,
    }
}

/// Polls `condition` until it holds or a second has passed.
pub async fn eventually<F: FnMut() -> bool>(mut condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("Condition not reached in time");
}

pub fn assert_unique_ids(activities: &[Activity]) {
    let mut seen = HashSet::new();
    for activity in activities {
        assert!(
            seen.insert(activity.id),
            "Duplicate id {} in {:?}",
            activity.id,
            activities
        );
    }
}
