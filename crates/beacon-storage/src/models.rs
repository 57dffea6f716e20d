// Row models for the events table

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use beacon_core::{Event, EventPriority};

/// One row of the events table
#[derive(Debug, Clone, FromRow)]
pub struct EventRow {
    pub id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub target_user_id: i64,
    /// Numeric priority rank (0 = low .. 3 = critical)
    pub priority: i16,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl EventRow {
    pub fn into_event(self) -> Event {
        Event {
            id: self.id,
            event_type: self.event_type,
            payload: self.payload,
            target_user_id: self.target_user_id,
            priority: EventPriority::from_rank(self.priority).unwrap_or_default(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            is_read: self.is_read,
        }
    }
}
