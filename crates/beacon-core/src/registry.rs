// Event type registry
//
// Maps an event-type name to the payload codec for that type. The registry
// is populated once at process start, before any traffic is accepted, and
// is read-only afterwards. It is passed explicitly to whatever consumes it;
// there is no process-global instance.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{BusError, Result};

/// Validates and normalizes raw payloads for one event type
pub trait PayloadCodec: Send + Sync {
    /// Decode a raw payload, returning its normalized JSON form
    fn decode(&self, raw: &serde_json::Value) -> std::result::Result<serde_json::Value, String>;
}

/// Codec backed by a serde payload type
///
/// Round-trips the raw value through `T`, so unknown-shaped payloads fail
/// at creation time instead of at render time on the client.
pub struct TypedCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for TypedCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PayloadCodec for TypedCodec<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    fn decode(&self, raw: &serde_json::Value) -> std::result::Result<serde_json::Value, String> {
        let typed: T = serde_json::from_value(raw.clone()).map_err(|e| e.to_string())?;
        serde_json::to_value(typed).map_err(|e| e.to_string())
    }
}

/// Immutable mapping from event-type name to payload codec
pub struct EventRegistry {
    codecs: HashMap<String, Arc<dyn PayloadCodec>>,
}

impl EventRegistry {
    /// Start building a registry
    pub fn builder() -> EventRegistryBuilder {
        EventRegistryBuilder {
            codecs: HashMap::new(),
        }
    }

    /// Decode a raw payload for `event_type`
    ///
    /// Fails with [`BusError::UnknownEventType`] if the name was never
    /// registered, [`BusError::Payload`] if the payload shape is wrong.
    pub fn decode(&self, event_type: &str, raw: &serde_json::Value) -> Result<serde_json::Value> {
        let codec = self
            .codecs
            .get(event_type)
            .ok_or_else(|| BusError::unknown_event_type(event_type))?;
        codec
            .decode(raw)
            .map_err(|reason| BusError::payload(event_type, reason))
    }

    /// Whether `event_type` was registered
    pub fn contains(&self, event_type: &str) -> bool {
        self.codecs.contains_key(event_type)
    }

    /// Registered event type names
    pub fn event_types(&self) -> Vec<&str> {
        self.codecs.keys().map(String::as_str).collect()
    }
}

/// Builder for [`EventRegistry`]
///
/// Registration is idempotent: re-registering a name replaces its codec.
pub struct EventRegistryBuilder {
    codecs: HashMap<String, Arc<dyn PayloadCodec>>,
}

impl EventRegistryBuilder {
    /// Register a serde payload type under `event_type`
    pub fn register<T>(mut self, event_type: impl Into<String>) -> Self
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        self.codecs
            .insert(event_type.into(), Arc::new(TypedCodec::<T>::new()));
        self
    }

    /// Register a custom codec under `event_type`
    pub fn register_codec(
        mut self,
        event_type: impl Into<String>,
        codec: Arc<dyn PayloadCodec>,
    ) -> Self {
        self.codecs.insert(event_type.into(), codec);
        self
    }

    /// Finish building; the registry is immutable from here on
    pub fn build(self) -> EventRegistry {
        EventRegistry {
            codecs: self.codecs,
        }
    }
}

// ============================================================================
// Built-in payload types
// ============================================================================

/// User-facing notification payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub message: String,
    /// Display severity: "info", "warning", or "danger"
    #[serde(default = "default_severity")]
    pub severity: String,
    /// Optional link the client navigates to on click
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

fn default_severity() -> String {
    "info".to_string()
}

/// Completion notice for a background task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResultPayload {
    /// Name of the task that finished
    pub task: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> EventRegistry {
        EventRegistry::builder()
            .register::<NotificationPayload>("notification")
            .register::<TaskResultPayload>("task_result")
            .build()
    }

    #[test]
    fn test_decode_known_type() {
        let registry = registry();
        let decoded = registry
            .decode(
                "notification",
                &json!({"title": "Backup", "message": "Backup finished"}),
            )
            .unwrap();
        assert_eq!(decoded["title"], "Backup");
        assert_eq!(decoded["severity"], "info");
    }

    #[test]
    fn test_decode_unknown_type() {
        let registry = registry();
        let err = registry.decode("no_such_type", &json!({})).unwrap_err();
        assert!(matches!(err, BusError::UnknownEventType(name) if name == "no_such_type"));
    }

    #[test]
    fn test_decode_bad_shape() {
        let registry = registry();
        let err = registry
            .decode("task_result", &json!({"task": "import"}))
            .unwrap_err();
        assert!(matches!(err, BusError::Payload { .. }));
    }

    #[test]
    fn test_registration_is_idempotent() {
        let registry = EventRegistry::builder()
            .register::<NotificationPayload>("notification")
            .register::<NotificationPayload>("notification")
            .build();
        assert_eq!(registry.event_types().len(), 1);
    }
}
