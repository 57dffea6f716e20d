// Per-User Server-Push Event Bus
//
// This crate provides the DB-agnostic core of the notification subsystem:
// durable events are created, persisted, fanned out to live connections,
// recovered on reconnect, and reclaimed once read or expired.
//
// Key design decisions:
// - Durability precedes delivery: events hit the store before the dispatch
//   queue, so a dropped live copy is never a lost event
// - Uses a trait (EventStore) for pluggable persistence backends
// - Bounded queues everywhere: the central dispatch queue rejects on
//   overflow (logged), per-connection queues drop their oldest entry
// - The registry and manager are constructed once and dependency-injected,
//   never process-global state
// - Live dispatch filters on the connection's subscribed event type

pub mod config;
pub mod connections;
pub mod error;
pub mod event;
pub mod manager;
pub mod queue;
pub mod registry;
pub mod store;

// In-memory store for examples and testing
pub mod memory;

// Re-exports for convenience
pub use config::BusConfig;
pub use connections::{AddedConnection, ConnectionManager, StreamHandle};
pub use error::{BusError, Result};
pub use event::{Event, EventPriority, NewEvent};
pub use manager::{BusStats, EventManager, StreamRegistration};
pub use memory::InMemoryEventStore;
pub use queue::{DeliveryQueue, QueueFull, Recv};
pub use registry::{
    EventRegistry, EventRegistryBuilder, NotificationPayload, PayloadCodec, TaskResultPayload,
    TypedCodec,
};
pub use store::{EventStore, StoreError};
