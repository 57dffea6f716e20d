// Offline creation and recovery-on-connect, end to end in memory
//
// Run with: cargo run -p beacon-core --example in_memory_bus

use std::sync::Arc;
use std::time::Duration;

use beacon_core::{
    BusConfig, EventManager, EventPriority, EventRegistry, InMemoryEventStore,
    NotificationPayload, Recv,
};
use serde_json::json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("beacon_core=debug")
        .init();

    let registry = Arc::new(
        EventRegistry::builder()
            .register::<NotificationPayload>("notification")
            .build(),
    );
    let store = Arc::new(InMemoryEventStore::new());
    let manager = EventManager::start(store, registry, BusConfig::default()).await?;

    // The user is offline: the event is stored, not dispatched
    let event = manager
        .create_event(
            "notification",
            42,
            EventPriority::High,
            None,
            json!({"title": "Deploy finished", "message": "v0.1.0 is live"}),
        )
        .await?;
    println!("stored event {} while user 42 was offline", event.id);

    // The user connects: the stored event is recovered into the new stream
    let registration = manager.register_stream(42, "notification").await?;
    match registration.queue.recv_timeout(Duration::from_secs(1)).await {
        Recv::Event(recovered) => {
            println!(
                "recovered on connect: {}",
                recovered.payload["title"].as_str().unwrap_or_default()
            );
            manager.mark_read(recovered.id, 42).await?;
        }
        other => println!("unexpected: {other:?}"),
    }

    manager.unregister_stream(42, registration.stream_id);
    manager.shutdown().await;
    Ok(())
}
