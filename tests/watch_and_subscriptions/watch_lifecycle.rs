use std::sync::Arc;
use std::time::Duration;

use kv_watcher::ChannelListener;
use kv_watcher::Error;
use kv_watcher::StoreClient;
use tokio::time::timeout;

use crate::common::*;

#[tokio::test]
async fn test_duplicate_add_does_not_start_second_session() {
    let (store, registry) = setup();
    store.put("dup", "1").unwrap();
    let (first, mut first_rx) = ChannelListener::new();
    let (second, mut second_rx) = ChannelListener::new();

    assert!(registry.add_watch("dup", false, Arc::new(first)));
    assert!(!registry.add_watch("dup", true, Arc::new(second)));

    assert_eq!(next_events(&mut first_rx, 1).await, vec![set("dup", "1")]);
    // The rejected listener was dropped without ever being called
    assert!(second_rx.recv().await.is_none());
    assert_eq!(registry.running_sessions(), 1);

    registry.close(true).await;
}

#[tokio::test]
async fn test_remove_unknown_key_has_no_side_effect() {
    let (store, registry) = setup();
    let (listener, mut rx) = ChannelListener::new();
    registry.add_watch("kept", false, Arc::new(listener));

    assert!(!registry.remove_watch("never-added"));
    assert_eq!(registry.keys(), vec!["kept".to_string()]);

    store.put("kept", "v").unwrap();
    assert_eq!(next_events(&mut rx, 1).await, vec![create("kept", "v")]);

    registry.close(true).await;
}

#[tokio::test]
async fn test_close_with_wait_leaves_no_live_listener() {
    let (store, registry) = setup();
    let (listener, mut rx) = ChannelListener::new();
    let listener = Arc::new(listener);
    for i in 0..10 {
        store.put(format!("svc/{i}"), "up").unwrap();
        registry.add_watch(format!("svc/{i}"), false, listener.clone());
    }
    drop(listener);
    next_events(&mut rx, 10).await;

    registry.close(true).await;

    // Every session has exited and released its listener, so no callback
    // can fire any more and the channel reports closed.
    let closed = timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(matches!(closed, Ok(None)));
    assert!(matches!(store.read("svc/0", false).await, Err(Error::Connection(_))));
}

#[tokio::test]
async fn test_clear_watch_then_rewatch() {
    let (store, registry) = setup();
    let (listener, mut rx) = ChannelListener::new();
    let listener = Arc::new(listener);
    registry.add_watch("x", false, listener.clone());
    registry.add_watch("y/", true, listener.clone());

    registry.clear_watch();
    assert_eq!(registry.watch_count(), 0);

    store.put("x", "1").unwrap();
    store.put("y/1", "1").unwrap();
    assert_quiet(&mut rx).await;

    assert!(registry.add_watch("x", false, listener.clone()));
    assert_eq!(next_events(&mut rx, 1).await, vec![set("x", "1")]);

    registry.close(true).await;
}

#[tokio::test]
async fn test_close_ends_sessions_blocked_on_stream() {
    let (_store, registry) = setup();
    let (listener, _rx) = ChannelListener::new();
    registry.add_watch("idle", true, Arc::new(listener));
    tokio::time::sleep(Duration::from_millis(20)).await;

    timeout(Duration::from_secs(1), registry.close(true))
        .await
        .expect("close(wait) must not hang on an idle stream");
}
