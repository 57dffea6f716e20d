// Live connection tracking
//
// Tracks per-user, per-connection delivery queues and enforces the
// per-user connection cap with oldest-first eviction. All mutations are
// serialized by a single mutex; reads copy a snapshot out from under the
// lock so dispatch never holds it while pushing into queues.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::queue::DeliveryQueue;

/// One live connection, cheap to clone for dispatch snapshots
#[derive(Clone)]
pub struct StreamHandle {
    pub stream_id: Uuid,
    pub user_id: i64,
    /// Event type this connection subscribed to; the distributor only
    /// pushes matching events
    pub event_type: String,
    pub queue: Arc<DeliveryQueue>,
    pub connected_at: DateTime<Utc>,
    /// Monotonic admission order, breaks connected_at ties on eviction
    seq: u64,
}

/// Result of adding a connection
pub struct AddedConnection {
    pub handle: StreamHandle,
    /// Stream evicted to stay under the per-user cap, if any
    pub evicted: Option<Uuid>,
}

struct Inner {
    by_user: HashMap<i64, HashMap<Uuid, StreamHandle>>,
    /// event_type -> users holding at least one connection of that type
    type_users: HashMap<String, HashSet<i64>>,
    next_seq: u64,
}

/// Tracks live per-user delivery queues
pub struct ConnectionManager {
    max_per_user: usize,
    queue_capacity: usize,
    inner: Mutex<Inner>,
}

impl ConnectionManager {
    pub fn new(max_per_user: usize, queue_capacity: usize) -> Self {
        Self {
            max_per_user: max_per_user.max(1),
            queue_capacity,
            inner: Mutex::new(Inner {
                by_user: HashMap::new(),
                type_users: HashMap::new(),
                next_seq: 0,
            }),
        }
    }

    /// Allocate a new bounded queue for a connection
    ///
    /// At the per-user cap the single oldest connection is evicted first.
    /// Eviction is a side effect, not a rejection: the evicted queue is
    /// closed so its handler unwinds and unregisters on its own.
    pub fn add_connection(&self, user_id: i64, event_type: &str) -> AddedConnection {
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;

        let mut evicted = None;
        let mut evicted_type = None;
        {
            let conns = inner.by_user.entry(user_id).or_default();
            if conns.len() >= self.max_per_user {
                let oldest = conns.values().min_by_key(|h| h.seq).map(|h| h.stream_id);
                if let Some(stream_id) = oldest {
                    if let Some(handle) = conns.remove(&stream_id) {
                        handle.queue.close();
                        evicted = Some(stream_id);
                        evicted_type = Some(handle.event_type);
                    }
                }
            }
        }
        if let Some(event_type) = evicted_type {
            Self::prune_type(&mut inner, user_id, &event_type);
        }

        let handle = StreamHandle {
            stream_id: Uuid::now_v7(),
            user_id,
            event_type: event_type.to_string(),
            queue: Arc::new(DeliveryQueue::new(self.queue_capacity)),
            connected_at: Utc::now(),
            seq,
        };
        inner
            .by_user
            .entry(user_id)
            .or_default()
            .insert(handle.stream_id, handle.clone());
        inner
            .type_users
            .entry(event_type.to_string())
            .or_default()
            .insert(user_id);

        AddedConnection { handle, evicted }
    }

    /// Remove one connection; drops the user entry when it was the last.
    /// Safe to call twice — the second call is a no-op.
    pub fn remove_connection(&self, user_id: i64, stream_id: Uuid) {
        let mut inner = self.inner.lock();
        let mut removed_type = None;
        if let Some(conns) = inner.by_user.get_mut(&user_id) {
            if let Some(handle) = conns.remove(&stream_id) {
                handle.queue.close();
                removed_type = Some(handle.event_type);
            }
            if conns.is_empty() {
                inner.by_user.remove(&user_id);
            }
        }
        if let Some(event_type) = removed_type {
            Self::prune_type(&mut inner, user_id, &event_type);
        }
    }

    /// Drop every connection a user holds (forced logout, shutdown)
    pub fn remove_all(&self, user_id: i64) {
        let mut inner = self.inner.lock();
        if let Some(conns) = inner.by_user.remove(&user_id) {
            for handle in conns.values() {
                handle.queue.close();
            }
        }
        for users in inner.type_users.values_mut() {
            users.remove(&user_id);
        }
        inner.type_users.retain(|_, users| !users.is_empty());
    }

    /// Snapshot of a user's live connections, copied out under the lock
    pub fn streams_for(&self, user_id: i64) -> Vec<StreamHandle> {
        let inner = self.inner.lock();
        inner
            .by_user
            .get(&user_id)
            .map(|conns| conns.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Users currently holding at least one connection subscribed to
    /// `event_type`. Lets producers skip work for known-offline targets.
    pub fn users_with_open_type(&self, event_type: &str) -> HashSet<i64> {
        self.inner
            .lock()
            .type_users
            .get(event_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Whether the user holds at least one live connection
    pub fn is_online(&self, user_id: i64) -> bool {
        self.inner.lock().by_user.contains_key(&user_id)
    }

    pub fn connection_count(&self, user_id: i64) -> usize {
        self.inner
            .lock()
            .by_user
            .get(&user_id)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    /// Users with any live connection (shutdown bookkeeping)
    pub fn tracked_users(&self) -> Vec<i64> {
        self.inner.lock().by_user.keys().copied().collect()
    }

    /// Drop the user from the per-type index unless another of their
    /// connections still carries that type
    fn prune_type(inner: &mut Inner, user_id: i64, event_type: &str) {
        let still_open = inner
            .by_user
            .get(&user_id)
            .is_some_and(|conns| conns.values().any(|h| h.event_type == event_type));
        if !still_open {
            if let Some(users) = inner.type_users.get_mut(event_type) {
                users.remove(&user_id);
                if users.is_empty() {
                    inner.type_users.remove(event_type);
                }
            }
        }
    }
}
