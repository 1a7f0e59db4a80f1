use std::sync::Arc;

use kv_watcher::ChannelListener;
use kv_watcher::EventKind;
use kv_watcher::WatchConfig;
use kv_watcher::WatchEvent;
use kv_watcher::WatchRegistry;

use crate::common::*;

#[tokio::test]
async fn test_single_key_set_modify_delete_then_remove() {
    let (store, registry) = setup();
    store.put("a/1", "x").unwrap();
    let (listener, mut rx) = ChannelListener::new();

    assert!(registry.add_watch("a/1", false, Arc::new(listener)));
    assert_eq!(next_events(&mut rx, 1).await, vec![set("a/1", "x")]);

    store.put("a/1", "y").unwrap();
    assert_eq!(next_events(&mut rx, 1).await, vec![modify("a/1", "y")]);

    store.delete("a/1").unwrap();
    assert_eq!(next_events(&mut rx, 1).await, vec![delete("a/1")]);

    assert!(registry.remove_watch("a/1"));
    store.put("a/1", "z").unwrap();
    assert_quiet(&mut rx).await;

    registry.close(true).await;
}

#[tokio::test]
async fn test_prefix_watch_snapshot_then_create() {
    let (store, registry) = setup();
    store.put("team/1", "alice").unwrap();
    store.put("team/2", "bob").unwrap();
    store.put("teams", "not-a-member").unwrap();
    let (listener, mut rx) = ChannelListener::new();

    registry.add_watch("team/", true, Arc::new(listener));
    assert_eq!(
        next_events(&mut rx, 2).await,
        vec![set("team/1", "alice"), set("team/2", "bob")]
    );

    store.put("team/3", "carol").unwrap();
    store.put("teams", "still-not").unwrap();
    assert_eq!(next_events(&mut rx, 1).await, vec![create("team/3", "carol")]);
    assert_quiet(&mut rx).await;

    registry.close(true).await;
}

#[tokio::test]
async fn test_missing_point_key_is_watched_for_creation() {
    let (store, registry) = setup();
    let (listener, mut rx) = ChannelListener::new();

    registry.add_watch("later", false, Arc::new(listener));
    assert_quiet(&mut rx).await;

    store.put("later", "1").unwrap();
    store.put("later", "2").unwrap();
    assert_eq!(
        next_events(&mut rx, 2).await,
        vec![create("later", "1"), modify("later", "2")]
    );

    registry.close(true).await;
}

#[tokio::test]
async fn test_recreated_key_is_reported_as_create() {
    let (store, registry) = setup();
    let (listener, mut rx) = ChannelListener::new();
    registry.add_watch("k", false, Arc::new(listener));
    assert_quiet(&mut rx).await;

    store.put("k", "1").unwrap();
    store.delete("k").unwrap();
    store.put("k", "2").unwrap();

    assert_eq!(
        next_events(&mut rx, 3).await,
        vec![create("k", "1"), delete("k"), create("k", "2")]
    );

    registry.close(true).await;
}

#[tokio::test]
async fn test_batched_deletes_are_dispatched_in_order() {
    let (store, registry) = setup();
    for i in 1..=3 {
        store.put(format!("jobs/{i}"), "queued").unwrap();
    }
    let (listener, mut rx) = ChannelListener::new();
    registry.add_watch("jobs/", true, Arc::new(listener));
    next_events(&mut rx, 3).await;

    store.delete_prefix("jobs/").unwrap();

    assert_eq!(
        next_events(&mut rx, 3).await,
        vec![delete("jobs/1"), delete("jobs/2"), delete("jobs/3")]
    );

    registry.close(true).await;
}

/// Values seen by one watcher must be a gap-free, duplicate-free run that
/// ends at the last write, whatever the interleaving with the writer.
fn assert_contiguous_run(
    events: &[WatchEvent],
    last: u32,
) {
    let values: Vec<u32> = events
        .iter()
        .map(|e| {
            let value = e.value.as_deref().expect("no deletes expected");
            std::str::from_utf8(value).unwrap().parse().unwrap()
        })
        .collect();

    match events[0].kind {
        EventKind::Set => {}
        EventKind::Create => assert_eq!(values[0], 0, "missed the creating write"),
        other => panic!("first event must be Set or Create, got {other:?}"),
    }
    assert!(events[1..].iter().all(|e| e.kind == EventKind::Modify));

    let expected: Vec<u32> = (values[0]..=last).collect();
    assert_eq!(values, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_gap_or_duplicate_across_snapshot_boundary() {
    const WRITES: u32 = 300;
    const WATCHERS: usize = 8;

    let (store, _registry) = setup();

    let writer_store = store.clone();
    let writer = tokio::spawn(async move {
        for i in 0..WRITES {
            writer_store.put("counter", i.to_string()).unwrap();
            tokio::task::yield_now().await;
        }
    });

    // Separate registries so every watcher can use the same literal key
    let mut watchers = Vec::new();
    for _ in 0..WATCHERS {
        let registry = WatchRegistry::new(store.clone(), &WatchConfig::default());
        let (listener, rx) = ChannelListener::new();
        registry.add_watch("counter", false, Arc::new(listener));
        watchers.push((registry, rx));
        tokio::task::yield_now().await;
    }

    writer.await.unwrap();
    let last = WRITES - 1;

    for (registry, mut rx) in watchers {
        let mut events = Vec::new();
        loop {
            let event = next_events(&mut rx, 1).await.remove(0);
            let done = event.value.as_deref() == Some(last.to_string().as_bytes());
            events.push(event);
            if done {
                break;
            }
        }
        assert_contiguous_run(&events, last);
        assert_quiet(&mut rx).await;
        registry.clear_watch();
    }
}
