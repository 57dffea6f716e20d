// Integration tests for the event manager
//
// These run the full bus (distributor + cleanup workers) against the
// in-memory store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;

use beacon_core::{
    BusConfig, EventManager, EventPriority, EventRegistry, EventStore, InMemoryEventStore,
    NewEvent, NotificationPayload, Recv, TaskResultPayload,
};

fn registry() -> Arc<EventRegistry> {
    Arc::new(
        EventRegistry::builder()
            .register::<NotificationPayload>("notification")
            .register::<TaskResultPayload>("task_result")
            .build(),
    )
}

async fn start_manager(config: BusConfig) -> (Arc<EventManager>, Arc<InMemoryEventStore>) {
    let store = Arc::new(InMemoryEventStore::new());
    let manager = EventManager::start(store.clone(), registry(), config)
        .await
        .expect("manager should start");
    (manager, store)
}

fn notification(n: u32) -> serde_json::Value {
    json!({"title": format!("note {n}"), "message": "hello"})
}

/// Give the distributor a moment to fan out
async fn settle() {
    tokio::time::sleep(Duration::from_millis(150)).await;
}

#[tokio::test]
async fn test_create_then_pending_returns_one_unread_row() {
    let (manager, store) = start_manager(BusConfig::default()).await;

    // Offline target
    let event = manager
        .create_event("notification", 1, EventPriority::Normal, None, notification(1))
        .await
        .unwrap();
    let pending = store.find_pending_for(1, "notification").await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, event.id);
    assert!(!pending[0].is_read);

    // Online target: the row is still pending until acknowledged
    let registration = manager.register_stream(2, "notification").await.unwrap();
    manager
        .create_event("notification", 2, EventPriority::Normal, None, notification(2))
        .await
        .unwrap();
    let pending = store.find_pending_for(2, "notification").await.unwrap();
    assert_eq!(pending.len(), 1);

    manager.unregister_stream(2, registration.stream_id);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_unknown_event_type_is_rejected() {
    let (manager, store) = start_manager(BusConfig::default()).await;

    let err = manager
        .create_event("no_such_type", 1, EventPriority::Normal, None, json!({}))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        beacon_core::BusError::UnknownEventType(name) if name == "no_such_type"
    ));
    assert!(store.is_empty().await);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_offline_target_skips_dispatch_but_recovers() {
    let (manager, _store) = start_manager(BusConfig::default()).await;

    let event = manager
        .create_event("notification", 7, EventPriority::Normal, None, notification(1))
        .await
        .unwrap();
    settle().await;

    let stats = manager.stats();
    assert_eq!(stats.created, 1);
    assert_eq!(stats.dispatched, 0);
    assert_eq!(stats.dropped, 0);

    // The stored row is injected when the user connects
    let registration = manager.register_stream(7, "notification").await.unwrap();
    match registration.queue.recv_timeout(Duration::from_secs(1)).await {
        Recv::Event(recovered) => assert_eq!(recovered.id, event.id),
        other => panic!("expected recovered event, got {other:?}"),
    }
    assert_eq!(manager.stats().recovered, 1);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_recovery_ordering_priority_desc_then_created_asc() {
    let (manager, store) = start_manager(BusConfig::default()).await;
    let base = Utc::now();

    // A(low, t1), B(high, t2 > t1), C(high, t3 > t2) -> [B, C, A]
    let a = store
        .save(NewEvent {
            created_at: base,
            ..NewEvent::new("notification", 1, notification(1)).with_priority(EventPriority::Low)
        })
        .await
        .unwrap();
    let b = store
        .save(NewEvent {
            created_at: base + ChronoDuration::seconds(1),
            ..NewEvent::new("notification", 1, notification(2)).with_priority(EventPriority::High)
        })
        .await
        .unwrap();
    let c = store
        .save(NewEvent {
            created_at: base + ChronoDuration::seconds(2),
            ..NewEvent::new("notification", 1, notification(3)).with_priority(EventPriority::High)
        })
        .await
        .unwrap();

    let registration = manager.register_stream(1, "notification").await.unwrap();
    let order: Vec<_> = registration
        .queue
        .drain()
        .into_iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(order, vec![b.id, c.id, a.id]);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_expired_event_is_invisible_and_purged() {
    let config = BusConfig::default().with_cleanup_interval(Duration::from_millis(50));
    let (manager, store) = start_manager(config).await;

    let registration = manager.register_stream(1, "notification").await.unwrap();

    // Already past its expiry at creation time
    let event = manager
        .create_event(
            "notification",
            1,
            EventPriority::Normal,
            Some(ChronoDuration::minutes(-1)),
            notification(1),
        )
        .await
        .unwrap();
    settle().await;

    // Excluded from live dispatch and from recovery
    assert!(registration.queue.is_empty());
    assert!(store
        .find_pending_for(1, "notification")
        .await
        .unwrap()
        .is_empty());

    // The next cleanup cycle removes the row
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(store.get(event.id).await.is_none());

    manager.shutdown().await;
}

#[tokio::test]
async fn test_connection_cap_evicts_first_opened() {
    let config = BusConfig::default().with_max_connections_per_user(2);
    let (manager, _store) = start_manager(config).await;

    let first = manager.register_stream(1, "notification").await.unwrap();
    let second = manager.register_stream(1, "notification").await.unwrap();
    let third = manager.register_stream(1, "notification").await.unwrap();

    // The first-opened stream's queue is closed so its handler unwinds
    match first.queue.recv_timeout(Duration::from_millis(50)).await {
        Recv::Closed => {}
        other => panic!("expected closed queue on evicted stream, got {other:?}"),
    }
    assert!(!second.queue.is_closed());
    assert!(!third.queue.is_closed());
    assert_eq!(manager.stats().evicted_connections, 1);

    // The evicted handler's unregister is a safe no-op
    manager.unregister_stream(1, first.stream_id);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_mark_read_is_idempotent() {
    let (manager, _store) = start_manager(BusConfig::default()).await;

    let event = manager
        .create_event("notification", 1, EventPriority::Normal, None, notification(1))
        .await
        .unwrap();

    assert!(manager.mark_read(event.id, 1).await.unwrap());
    assert!(!manager.mark_read(event.id, 1).await.unwrap());

    manager.shutdown().await;
}

#[tokio::test]
async fn test_mark_read_batch_skips_foreign_rows() {
    let (manager, store) = start_manager(BusConfig::default()).await;

    let mine = manager
        .create_event("notification", 1, EventPriority::Normal, None, notification(1))
        .await
        .unwrap();
    let theirs = manager
        .create_event("notification", 2, EventPriority::Normal, None, notification(2))
        .await
        .unwrap();

    let updated = manager
        .mark_read_batch(&[mine.id, theirs.id], 1)
        .await
        .unwrap();
    assert_eq!(updated, 1);
    assert!(store.get(mine.id).await.unwrap().is_read);
    assert!(!store.get(theirs.id).await.unwrap().is_read);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_live_dispatch_reaches_all_matching_connections() {
    let (manager, _store) = start_manager(BusConfig::default()).await;

    let one = manager.register_stream(1, "notification").await.unwrap();
    let two = manager.register_stream(1, "notification").await.unwrap();

    let event = manager
        .create_event("notification", 1, EventPriority::Normal, None, notification(1))
        .await
        .unwrap();

    for registration in [&one, &two] {
        match registration.queue.recv_timeout(Duration::from_secs(1)).await {
            Recv::Event(received) => assert_eq!(received.id, event.id),
            other => panic!("expected live event on both connections, got {other:?}"),
        }
    }
    assert_eq!(manager.stats().dispatched, 2);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_live_dispatch_filters_by_subscribed_type() {
    let (manager, store) = start_manager(BusConfig::default()).await;

    let registration = manager.register_stream(1, "notification").await.unwrap();

    // Same user, different event type: stored, not delivered to this stream
    let event = manager
        .create_event(
            "task_result",
            1,
            EventPriority::Normal,
            None,
            json!({"task": "import", "success": true}),
        )
        .await
        .unwrap();
    settle().await;
    assert!(registration.queue.is_empty());
    assert!(store.get(event.id).await.is_some());

    // A stream of the matching type recovers it
    let matching = manager.register_stream(1, "task_result").await.unwrap();
    match matching.queue.recv_timeout(Duration::from_secs(1)).await {
        Recv::Event(recovered) => assert_eq!(recovered.id, event.id),
        other => panic!("expected recovered event, got {other:?}"),
    }

    manager.shutdown().await;
}

#[tokio::test]
async fn test_end_to_end_offline_create_connect_read_purge() {
    let config = BusConfig::default().with_cleanup_interval(Duration::from_millis(50));
    let (manager, store) = start_manager(config).await;

    // User 9 has no connection; producer creates event X
    let x = manager
        .create_event("notification", 9, EventPriority::Normal, None, notification(1))
        .await
        .unwrap();

    // User 9 opens a stream: X arrives before any heartbeat would fire
    let registration = manager.register_stream(9, "notification").await.unwrap();
    let received = match registration
        .queue
        .recv_timeout(manager.config().heartbeat_interval)
        .await
    {
        Recv::Event(event) => event,
        other => panic!("expected X before a heartbeat, got {other:?}"),
    };
    assert_eq!(received.id, x.id);

    // User marks X read; a cleanup cycle removes it from the store
    assert!(manager.mark_read(x.id, 9).await.unwrap());
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(store.get(x.id).await.is_none());

    manager.unregister_stream(9, registration.stream_id);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_startup_purges_stale_rows_without_redelivery() {
    let store = Arc::new(InMemoryEventStore::new());
    let read = store
        .save(NewEvent::new("notification", 1, notification(1)))
        .await
        .unwrap();
    store.mark_read(read.id, 1).await.unwrap();
    store
        .save(
            NewEvent::new("notification", 1, notification(2))
                .with_expires_at(Utc::now() - ChronoDuration::minutes(5)),
        )
        .await
        .unwrap();
    let live = store
        .save(NewEvent::new("notification", 1, notification(3)))
        .await
        .unwrap();

    let manager = EventManager::start(store.clone(), registry(), BusConfig::default())
        .await
        .unwrap();

    assert_eq!(store.len().await, 1);
    assert!(store.get(live.id).await.is_some());

    manager.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_streams_and_is_reentrant() {
    let (manager, _store) = start_manager(BusConfig::default()).await;

    let registration = manager.register_stream(1, "notification").await.unwrap();
    manager.shutdown().await;

    match registration.queue.recv_timeout(Duration::from_millis(50)).await {
        Recv::Closed => {}
        other => panic!("expected closed stream after shutdown, got {other:?}"),
    }

    // Second call returns immediately
    manager.shutdown().await;
}
