// Event manager — orchestrates creation, live dispatch, recovery, cleanup
//
// Constructed once at process start and passed explicitly to the transport.
// Owns the central dispatch queue, exactly one distributor task, and exactly
// one cleanup task. Durability precedes delivery: an event reaches the
// dispatch queue only after the store accepted it, so a lost live copy is
// never a lost event.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::config::BusConfig;
use crate::connections::ConnectionManager;
use crate::error::{BusError, Result};
use crate::event::{Event, EventPriority, NewEvent};
use crate::queue::{DeliveryQueue, Recv};
use crate::registry::EventRegistry;
use crate::store::EventStore;

/// Counters kept by the manager, exposed through the health endpoint
#[derive(Debug, Default)]
struct BusMetrics {
    created: AtomicU64,
    dispatched: AtomicU64,
    dropped: AtomicU64,
    recovered: AtomicU64,
    evicted_connections: AtomicU64,
}

/// Snapshot of the bus counters
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct BusStats {
    /// Events accepted and stored
    pub created: u64,
    /// Live copies pushed into connection queues
    pub dispatched: u64,
    /// Live copies dropped at the central dispatch queue
    pub dropped: u64,
    /// Stored events injected into new connections
    pub recovered: u64,
    /// Connections evicted under the per-user cap
    pub evicted_connections: u64,
}

/// A registered stream: the id and the queue its handler drains
pub struct StreamRegistration {
    pub stream_id: Uuid,
    pub queue: Arc<DeliveryQueue>,
}

/// Orchestrates the event bus
///
/// Single-initialization contract: call [`EventManager::start`] once, share
/// the returned `Arc`, and run [`EventManager::shutdown`] before process
/// exit.
pub struct EventManager {
    store: Arc<dyn EventStore>,
    registry: Arc<EventRegistry>,
    connections: ConnectionManager,
    dispatch: Arc<DeliveryQueue>,
    config: BusConfig,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    metrics: BusMetrics,
}

impl EventManager {
    /// Purge stale rows left over from a previous run, then spawn the
    /// distributor and cleanup workers
    pub async fn start(
        store: Arc<dyn EventStore>,
        registry: Arc<EventRegistry>,
        config: BusConfig,
    ) -> Result<Arc<Self>> {
        let purged = store.purge_stale_on_startup().await?;
        if purged > 0 {
            tracing::info!(purged, "purged stale events on startup");
        }

        let manager = Arc::new(Self {
            connections: ConnectionManager::new(
                config.max_connections_per_user,
                config.stream_queue_capacity,
            ),
            dispatch: Arc::new(DeliveryQueue::new(config.dispatch_queue_capacity)),
            store,
            registry,
            config,
            shutdown: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
            metrics: BusMetrics::default(),
        });

        let distributor = tokio::spawn({
            let manager = manager.clone();
            async move { manager.run_distributor().await }
        });
        let cleanup = tokio::spawn({
            let manager = manager.clone();
            async move { manager.run_cleanup().await }
        });
        manager.workers.lock().extend([distributor, cleanup]);

        Ok(manager)
    }

    /// Create and persist an event, then enqueue it for live dispatch when
    /// the target user currently holds a connection
    ///
    /// The producer contract is "stored", not "delivered": a full dispatch
    /// queue is logged and counted, never returned, because the stored row
    /// is recovered on the user's next connect.
    pub async fn create_event(
        &self,
        event_type: &str,
        target_user_id: i64,
        priority: EventPriority,
        expire_after: Option<chrono::Duration>,
        payload: serde_json::Value,
    ) -> Result<Event> {
        let payload = self.registry.decode(event_type, &payload)?;

        let mut event = NewEvent::new(event_type, target_user_id, payload).with_priority(priority);
        if let Some(ttl) = expire_after {
            event.expires_at = Some(Utc::now() + ttl);
        }

        let event = self.store.save(event).await?;
        self.metrics.created.fetch_add(1, Ordering::Relaxed);

        // Best-effort check-then-enqueue: a connection opened between this
        // check and the enqueue misses the live push but still recovers the
        // stored row on its next connect.
        if self.connections.is_online(target_user_id) {
            if let Err(rejected) = self.dispatch.try_push(event.clone()) {
                self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    event_id = %rejected.0.id,
                    target_user_id,
                    "dispatch queue full, dropping live copy"
                );
            }
        } else {
            tracing::debug!(
                event_id = %event.id,
                target_user_id,
                "user offline, event stored for recovery"
            );
        }

        Ok(event)
    }

    /// Open a stream for a user
    ///
    /// Allocates the connection (evicting the user's oldest at the cap),
    /// then injects recoverable stored events into the new queue before
    /// live traffic resumes.
    pub async fn register_stream(
        &self,
        user_id: i64,
        event_type: &str,
    ) -> Result<StreamRegistration> {
        let added = self.connections.add_connection(user_id, event_type);
        if let Some(evicted) = added.evicted {
            self.metrics
                .evicted_connections
                .fetch_add(1, Ordering::Relaxed);
            tracing::info!(
                user_id,
                stream_id = %evicted,
                "evicted oldest connection at per-user cap"
            );
        }
        let handle = added.handle;

        let pending = match self.store.find_pending_for(user_id, event_type).await {
            Ok(pending) => pending,
            Err(error) => {
                self.connections.remove_connection(user_id, handle.stream_id);
                return Err(BusError::from(error));
            }
        };

        let mut recovered = 0u64;
        for event in pending {
            if event.is_expired() {
                // Terminal since the query ran; the cleanup worker purges it
                continue;
            }
            if let Some(dropped) = handle.queue.push_evict(event) {
                tracing::warn!(
                    event_id = %dropped.id,
                    user_id,
                    "recovery overflowed the connection queue, dropped oldest"
                );
            }
            recovered += 1;
        }
        if recovered > 0 {
            self.metrics.recovered.fetch_add(recovered, Ordering::Relaxed);
            tracing::debug!(user_id, recovered, "recovered stored events into new stream");
        }

        Ok(StreamRegistration {
            stream_id: handle.stream_id,
            queue: handle.queue,
        })
    }

    /// Remove one stream. Safe to call twice; the second call is a no-op.
    pub fn unregister_stream(&self, user_id: i64, stream_id: Uuid) {
        self.connections.remove_connection(user_id, stream_id);
    }

    /// Mark one event read; false means it was already read or not owned
    pub async fn mark_read(&self, event_id: Uuid, user_id: i64) -> Result<bool> {
        Ok(self.store.mark_read(event_id, user_id).await?)
    }

    /// Mark a batch of events read, skipping ids not owned by the caller
    pub async fn mark_read_batch(&self, event_ids: &[Uuid], user_id: i64) -> Result<u64> {
        Ok(self.store.mark_read_batch(event_ids, user_id).await?)
    }

    /// Users holding an open connection for `event_type`; lets producers
    /// skip side effects for known-offline broadcast targets
    pub fn users_with_open_type(&self, event_type: &str) -> HashSet<i64> {
        self.connections.users_with_open_type(event_type)
    }

    pub fn registry(&self) -> &EventRegistry {
        &self.registry
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Snapshot of the bus counters
    pub fn stats(&self) -> BusStats {
        BusStats {
            created: self.metrics.created.load(Ordering::Relaxed),
            dispatched: self.metrics.dispatched.load(Ordering::Relaxed),
            dropped: self.metrics.dropped.load(Ordering::Relaxed),
            recovered: self.metrics.recovered.load(Ordering::Relaxed),
            evicted_connections: self.metrics.evicted_connections.load(Ordering::Relaxed),
        }
    }

    /// Ordered shutdown; must complete before process exit
    ///
    /// Stops the workers, closes every live connection, re-persists
    /// anything still on the dispatch queue, then runs a final purge.
    /// Safe to call twice; the second call returns immediately.
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        tracing::info!("shutting down event manager");
        self.shutdown.cancel();

        for user_id in self.connections.tracked_users() {
            self.connections.remove_all(user_id);
        }

        // Nothing on the dispatch queue has been delivered; put it back in
        // the store rather than lose it. Failures here are logged only —
        // shutdown still completes.
        for event in self.dispatch.drain() {
            if event.is_terminal() {
                continue;
            }
            if let Err(error) = self.store.save(NewEvent::from(&event)).await {
                tracing::error!(%error, event_id = %event.id, "failed to re-persist in-flight event");
            }
        }

        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        let mut workers = workers.into_iter();

        if let Some(distributor) = workers.next() {
            self.join_worker("distributor", distributor).await;
        }

        if let Err(error) = self.store.purge_terminal().await {
            tracing::error!(%error, "final cleanup failed during shutdown");
        }

        if let Some(cleanup) = workers.next() {
            self.join_worker("cleanup", cleanup).await;
        }

        tracing::info!("event manager shutdown complete");
    }

    async fn join_worker(&self, name: &str, handle: JoinHandle<()>) {
        match tokio::time::timeout(self.config.shutdown_join_timeout, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => tracing::warn!(%error, worker = name, "worker task panicked"),
            Err(_) => tracing::warn!(worker = name, "worker did not stop within the join timeout"),
        }
    }

    /// Single background loop draining the central dispatch queue
    async fn run_distributor(self: Arc<Self>) {
        tracing::debug!("event distributor started");
        loop {
            let recv = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                recv = self.dispatch.recv_timeout(self.config.dispatch_poll_interval) => recv,
            };
            let event = match recv {
                Recv::Event(event) => event,
                Recv::Timeout => continue,
                Recv::Closed => break,
            };
            // The event may have turned terminal while queued
            if event.is_terminal() {
                continue;
            }
            self.fan_out(event);
        }
        tracing::debug!("event distributor stopped");
    }

    /// Push a copy into every live connection queue of the target user
    /// whose subscription matches the event type
    fn fan_out(&self, event: Event) {
        for handle in self.connections.streams_for(event.target_user_id) {
            if handle.event_type != event.event_type {
                continue;
            }
            if let Some(dropped) = handle.queue.push_evict(event.clone()) {
                tracing::warn!(
                    event_id = %dropped.id,
                    stream_id = %handle.stream_id,
                    "connection queue full, dropped oldest"
                );
            }
            self.metrics.dispatched.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Periodic reclamation of read and expired rows
    async fn run_cleanup(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.cleanup_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so the startup purge
        // is not repeated straight away
        interval.tick().await;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            match self.store.purge_terminal().await {
                Ok(purged) => {
                    if purged > 0 {
                        tracing::info!(purged, "cleanup purged terminal events");
                    }
                }
                // A failed cycle never stops the worker
                Err(error) => tracing::error!(%error, "event cleanup failed, retrying next cycle"),
            }
        }
        tracing::debug!("cleanup worker stopped");
    }
}
