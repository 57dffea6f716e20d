// Event store contract
//
// The persistence boundary consumed by the event manager. Implementations
// must be thread-safe; every operation runs in its own unit-of-work scope
// and no transaction ever spans a queue operation.

use async_trait::async_trait;
use uuid::Uuid;

use crate::event::{Event, NewEvent};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Create a database error
    pub fn database(msg: impl Into<String>) -> Self {
        StoreError::Database(msg.into())
    }
}

/// Durable persistence for events and their read/expired state
#[async_trait]
pub trait EventStore: Send + Sync + 'static {
    /// Durable write; assigns the id. Must complete before the event is
    /// eligible for live dispatch.
    async fn save(&self, event: NewEvent) -> Result<Event, StoreError>;

    /// Mark one event read. Returns false if it was already read or does
    /// not belong to `user_id` — idempotent, never an error.
    async fn mark_read(&self, event_id: Uuid, user_id: i64) -> Result<bool, StoreError>;

    /// Mark a batch read. Only rows owned by `user_id` are updated; others
    /// are skipped silently. Returns the number of rows updated.
    async fn mark_read_batch(&self, event_ids: &[Uuid], user_id: i64)
        -> Result<u64, StoreError>;

    /// Unread, unexpired events for recovery on connect, ordered by
    /// priority descending then created_at ascending.
    async fn find_pending_for(
        &self,
        user_id: i64,
        event_type: &str,
    ) -> Result<Vec<Event>, StoreError>;

    /// Delete every read or expired row. Returns the number deleted.
    async fn purge_terminal(&self) -> Result<u64, StoreError>;

    /// Crash-recovery hygiene at process start: drop anything already read
    /// or expired without re-delivering it.
    async fn purge_stale_on_startup(&self) -> Result<u64, StoreError> {
        self.purge_terminal().await
    }
}
