// Event domain types
//
// An event is a durable, single-recipient notification record. Rows are
// append-only except for the single is_read transition; a read or expired
// event is terminal and must never reach a connection queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Delivery priority
///
/// Orders recovery delivery only (priority descending, then creation
/// ascending); live dispatch is arrival-ordered.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum EventPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl EventPriority {
    /// Numeric rank the store persists and orders by (0 = low .. 3 = critical)
    pub fn rank(self) -> i16 {
        match self {
            EventPriority::Low => 0,
            EventPriority::Normal => 1,
            EventPriority::High => 2,
            EventPriority::Critical => 3,
        }
    }

    /// Inverse of [`rank`](Self::rank)
    pub fn from_rank(rank: i16) -> Option<Self> {
        match rank {
            0 => Some(EventPriority::Low),
            1 => Some(EventPriority::Normal),
            2 => Some(EventPriority::High),
            3 => Some(EventPriority::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventPriority::Low => write!(f, "low"),
            EventPriority::Normal => write!(f, "normal"),
            EventPriority::High => write!(f, "high"),
            EventPriority::Critical => write!(f, "critical"),
        }
    }
}

/// A persisted event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Event {
    /// Assigned by the store on first write; immutable afterward
    pub id: Uuid,
    /// Key into the event registry
    pub event_type: String,
    /// Payload validated against the type's registered codec
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub payload: serde_json::Value,
    /// The single recipient
    pub target_user_id: i64,
    pub priority: EventPriority,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub is_read: bool,
}

impl Event {
    /// True once `expires_at` is in the past
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }

    /// Read or expired. Terminal events are skipped by dispatch and recovery
    /// and removed by the cleanup worker.
    pub fn is_terminal(&self) -> bool {
        self.is_read || self.is_expired()
    }
}

/// An event that has not been saved yet; the store assigns the id
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: String,
    pub payload: serde_json::Value,
    pub target_user_id: i64,
    pub priority: EventPriority,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewEvent {
    /// Create an unsaved event with normal priority and no expiry
    pub fn new(
        event_type: impl Into<String>,
        target_user_id: i64,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            target_user_id,
            priority: EventPriority::default(),
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set an absolute expiry time
    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

impl From<&Event> for NewEvent {
    /// Used by the shutdown drain to re-persist an in-flight event
    fn from(event: &Event) -> Self {
        Self {
            event_type: event.event_type.clone(),
            payload: event.payload.clone(),
            target_user_id: event.target_user_id,
            priority: event.priority,
            created_at: event.created_at,
            expires_at: event.expires_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_priority_ordering() {
        assert!(EventPriority::Critical > EventPriority::High);
        assert!(EventPriority::High > EventPriority::Normal);
        assert!(EventPriority::Normal > EventPriority::Low);
    }

    #[test]
    fn test_priority_rank_round_trip() {
        for priority in [
            EventPriority::Low,
            EventPriority::Normal,
            EventPriority::High,
            EventPriority::Critical,
        ] {
            assert_eq!(EventPriority::from_rank(priority.rank()), Some(priority));
        }
        assert_eq!(EventPriority::from_rank(7), None);
    }

    #[test]
    fn test_expiry() {
        let mut event = Event {
            id: Uuid::now_v7(),
            event_type: "notification".to_string(),
            payload: serde_json::json!({}),
            target_user_id: 1,
            priority: EventPriority::Normal,
            created_at: Utc::now(),
            expires_at: None,
            is_read: false,
        };
        assert!(!event.is_expired());
        assert!(!event.is_terminal());

        event.expires_at = Some(Utc::now() - Duration::minutes(1));
        assert!(event.is_expired());
        assert!(event.is_terminal());

        event.expires_at = Some(Utc::now() + Duration::minutes(5));
        assert!(!event.is_expired());

        event.is_read = true;
        assert!(event.is_terminal());
    }
}
