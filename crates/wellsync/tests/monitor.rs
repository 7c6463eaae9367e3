mod common;

use std::time::Duration;

use wellsync::storage::RepositoryOp;
use wellsync::EntryData;
use wellsync_core::activity::{ActivityStatus, NewActivity};
use wellsync_core::cache::QueryKey;

use common::{at, date, setup};

#[tokio::test]
async fn test_status_follows_mutation_lifecycle() {
    let s = setup();
    let a = s
        .repository
        .seed(NewActivity::new("Walk", at(3, 7, 0)))
        .await;
    let key = QueryKey::day(date(3));
    s.engine.read(&key);
    s.engine.wait_until_idle().await;

    let mut status = s.engine.start_monitor();
    s.repository
        .script_latency(RepositoryOp::Update, [Duration::from_millis(80)]);

    let engine = s.engine.clone();
    let task =
        tokio::spawn(async move { engine.toggle_status(a.id, ActivityStatus::Planned).await });

    let busy = *tokio::time::timeout(
        Duration::from_secs(1),
        status.wait_for(|s| s.in_flight == 1 && s.is_syncing),
    )
    .await
    .expect("mutation not reported")
    .unwrap();
    assert!(busy.has_in_flight_mutation);
    assert_eq!(busy.tracked_entries, 1);

    task.await.unwrap().unwrap();
    let idle = *tokio::time::timeout(
        Duration::from_secs(1),
        status.wait_for(|s| !s.is_syncing),
    )
    .await
    .expect("engine did not settle")
    .unwrap();
    assert_eq!(idle.in_flight, 0);
    assert!(!idle.has_in_flight_mutation);
    assert_eq!(idle.fetching_entries, 0);
    assert!(idle.last_synced_at.is_some());

    s.engine.shutdown().await;
}

#[tokio::test]
async fn test_sync_status_without_monitor_task() {
    let s = setup();
    assert!(!s.engine.sync_status().is_syncing);
    assert_eq!(s.engine.sync_status().last_synced_at, None);

    s.engine
        .prime(&QueryKey::day(date(3)), EntryData::Activities(vec![]));
    let status = s.engine.sync_status();
    assert_eq!(status.tracked_entries, 1);
    assert!(status.last_synced_at.is_some());
}
