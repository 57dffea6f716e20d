// In-memory implementation of EventStore for examples and testing
//
// Keeps all rows in memory with the same semantics as the Postgres
// implementation in beacon-storage.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::event::{Event, NewEvent};
use crate::store::{EventStore, StoreError};

/// In-memory event store
#[derive(Debug, Default, Clone)]
pub struct InMemoryEventStore {
    events: Arc<RwLock<HashMap<Uuid, Event>>>,
}

impl InMemoryEventStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of rows currently stored
    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }

    /// Fetch one row by id
    pub async fn get(&self, event_id: Uuid) -> Option<Event> {
        self.events.read().await.get(&event_id).cloned()
    }

    /// Clear all rows (for testing)
    pub async fn clear(&self) {
        self.events.write().await.clear();
    }

    /// Pre-populate with events (useful for testing)
    pub async fn seed(&self, events: impl IntoIterator<Item = Event>) {
        let mut guard = self.events.write().await;
        for event in events {
            guard.insert(event.id, event);
        }
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn save(&self, event: NewEvent) -> Result<Event, StoreError> {
        let event = Event {
            id: Uuid::now_v7(),
            event_type: event.event_type,
            payload: event.payload,
            target_user_id: event.target_user_id,
            priority: event.priority,
            created_at: event.created_at,
            expires_at: event.expires_at,
            is_read: false,
        };
        self.events.write().await.insert(event.id, event.clone());
        Ok(event)
    }

    async fn mark_read(&self, event_id: Uuid, user_id: i64) -> Result<bool, StoreError> {
        let mut events = self.events.write().await;
        match events.get_mut(&event_id) {
            Some(event) if event.target_user_id == user_id && !event.is_read => {
                event.is_read = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_read_batch(
        &self,
        event_ids: &[Uuid],
        user_id: i64,
    ) -> Result<u64, StoreError> {
        let mut events = self.events.write().await;
        let mut updated = 0;
        for event_id in event_ids {
            if let Some(event) = events.get_mut(event_id) {
                if event.target_user_id == user_id && !event.is_read {
                    event.is_read = true;
                    updated += 1;
                }
            }
        }
        Ok(updated)
    }

    async fn find_pending_for(
        &self,
        user_id: i64,
        event_type: &str,
    ) -> Result<Vec<Event>, StoreError> {
        let events = self.events.read().await;
        let mut pending: Vec<Event> = events
            .values()
            .filter(|e| {
                e.target_user_id == user_id
                    && e.event_type == event_type
                    && !e.is_read
                    && !e.is_expired()
            })
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(pending)
    }

    async fn purge_terminal(&self) -> Result<u64, StoreError> {
        let mut events = self.events.write().await;
        let before = events.len();
        events.retain(|_, e| !e.is_terminal());
        Ok((before - events.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventPriority;
    use chrono::{Duration, Utc};
    use serde_json::json;

    #[tokio::test]
    async fn test_save_assigns_id_and_unread() {
        let store = InMemoryEventStore::new();
        let event = store
            .save(NewEvent::new("notification", 1, json!({"n": 1})))
            .await
            .unwrap();
        assert!(!event.is_read);
        assert_eq!(store.get(event.id).await.unwrap().target_user_id, 1);
    }

    #[tokio::test]
    async fn test_mark_read_is_idempotent() {
        let store = InMemoryEventStore::new();
        let event = store
            .save(NewEvent::new("notification", 1, json!({})))
            .await
            .unwrap();
        assert!(store.mark_read(event.id, 1).await.unwrap());
        assert!(!store.mark_read(event.id, 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_mark_read_checks_ownership() {
        let store = InMemoryEventStore::new();
        let event = store
            .save(NewEvent::new("notification", 1, json!({})))
            .await
            .unwrap();
        assert!(!store.mark_read(event.id, 2).await.unwrap());
        assert!(!store.get(event.id).await.unwrap().is_read);
    }

    #[tokio::test]
    async fn test_find_pending_ordering() {
        let store = InMemoryEventStore::new();
        let base = Utc::now();
        // A: low priority, oldest; B and C: high priority in creation order
        let a = NewEvent {
            created_at: base,
            ..NewEvent::new("notification", 1, json!({"k": "a"}))
                .with_priority(EventPriority::Low)
        };
        let b = NewEvent {
            created_at: base + Duration::seconds(1),
            ..NewEvent::new("notification", 1, json!({"k": "b"}))
                .with_priority(EventPriority::High)
        };
        let c = NewEvent {
            created_at: base + Duration::seconds(2),
            ..NewEvent::new("notification", 1, json!({"k": "c"}))
                .with_priority(EventPriority::High)
        };
        store.save(a).await.unwrap();
        store.save(b).await.unwrap();
        store.save(c).await.unwrap();

        let pending = store.find_pending_for(1, "notification").await.unwrap();
        let keys: Vec<_> = pending.iter().map(|e| e.payload["k"].clone()).collect();
        assert_eq!(keys, vec![json!("b"), json!("c"), json!("a")]);
    }

    #[tokio::test]
    async fn test_purge_terminal() {
        let store = InMemoryEventStore::new();
        let read = store
            .save(NewEvent::new("notification", 1, json!({})))
            .await
            .unwrap();
        store.mark_read(read.id, 1).await.unwrap();
        store
            .save(
                NewEvent::new("notification", 1, json!({}))
                    .with_expires_at(Utc::now() - Duration::minutes(1)),
            )
            .await
            .unwrap();
        let live = store
            .save(NewEvent::new("notification", 1, json!({})))
            .await
            .unwrap();

        assert_eq!(store.purge_terminal().await.unwrap(), 2);
        assert_eq!(store.len().await, 1);
        assert!(store.get(live.id).await.is_some());
    }
}
