// Error types for the event bus

use thiserror::Error;

use crate::store::StoreError;

/// Result type alias for event bus operations
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur while creating, delivering, or acknowledging events
#[derive(Debug, Error)]
pub enum BusError {
    /// Event type was never registered
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// Payload did not match the shape registered for its event type
    #[error("invalid payload for event type '{event_type}': {reason}")]
    Payload { event_type: String, reason: String },

    /// Central dispatch queue is at capacity
    #[error("dispatch queue is full")]
    DispatchQueueFull,

    /// Persistence operation failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Error while emitting frames on one connection
    #[error("stream error: {0}")]
    Stream(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl BusError {
    /// Create an unknown-event-type error
    pub fn unknown_event_type(name: impl Into<String>) -> Self {
        BusError::UnknownEventType(name.into())
    }

    /// Create a payload validation error
    pub fn payload(event_type: impl Into<String>, reason: impl Into<String>) -> Self {
        BusError::Payload {
            event_type: event_type.into(),
            reason: reason.into(),
        }
    }

    /// Create a stream error
    pub fn stream(msg: impl Into<String>) -> Self {
        BusError::Stream(msg.into())
    }
}
