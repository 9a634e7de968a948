//! Container lifecycle event types.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use memgate_core::ContainerId;
use serde::{Deserialize, Serialize};

/// Attribute carrying the container name on runtime events.
pub const NAME_ATTRIBUTE: &str = "name";

/// Lifecycle transition reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    Create,
    Start,
    Die,
    Destroy,
    /// Any action memgate does not account for (`pause`, `exec_start: ...`, ...).
    Other(String),
}

impl EventKind {
    /// Parse a runtime action name.
    pub fn from_action(action: &str) -> Self {
        match action {
            "create" => Self::Create,
            "start" => Self::Start,
            "die" => Self::Die,
            "destroy" => Self::Destroy,
            other => Self::Other(other.to_string()),
        }
    }

    /// The runtime action name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Create => "create",
            Self::Start => "start",
            Self::Die => "die",
            Self::Destroy => "destroy",
            Self::Other(action) => action,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for EventKind {
    fn from(action: String) -> Self {
        Self::from_action(&action)
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Type of runtime object an event is about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ObjectKind {
    #[default]
    Container,
    /// Networks, volumes, images and anything else the runtime reports.
    Other(String),
}

impl ObjectKind {
    /// Parse a runtime object type.
    pub fn from_type(object_type: &str) -> Self {
        match object_type {
            "container" => Self::Container,
            other => Self::Other(other.to_string()),
        }
    }

    /// The runtime object type.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Container => "container",
            Self::Other(object_type) => object_type,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ObjectKind {
    fn from(object_type: String) -> Self {
        Self::from_type(&object_type)
    }
}

impl From<ObjectKind> for String {
    fn from(object: ObjectKind) -> Self {
        object.as_str().to_string()
    }
}

/// A runtime lifecycle event, usually about a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// Object the event is about.
    pub id: ContainerId,
    /// Type of that object; absent means container.
    #[serde(default)]
    pub object: ObjectKind,
    /// Transition kind.
    pub kind: EventKind,
    /// Runtime-supplied attributes (name, image, labels, ...).
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// When memgate received the event.
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl LifecycleEvent {
    /// Create an event without attributes.
    pub fn new(id: impl Into<ContainerId>, kind: EventKind) -> Self {
        Self {
            id: id.into(),
            object: ObjectKind::Container,
            kind,
            attributes: BTreeMap::new(),
            received_at: Utc::now(),
        }
    }

    /// Create a create event for a named container.
    pub fn created(id: impl Into<ContainerId>, name: &str) -> Self {
        Self::new(id, EventKind::Create).with_attribute(NAME_ATTRIBUTE, name)
    }

    /// Create a start event for a named container.
    pub fn started(id: impl Into<ContainerId>, name: &str) -> Self {
        Self::new(id, EventKind::Start).with_attribute(NAME_ATTRIBUTE, name)
    }

    /// Create a die event for a named container.
    pub fn died(id: impl Into<ContainerId>, name: &str) -> Self {
        Self::new(id, EventKind::Die).with_attribute(NAME_ATTRIBUTE, name)
    }

    /// Create a destroy event for a named container.
    pub fn destroyed(id: impl Into<ContainerId>, name: &str) -> Self {
        Self::new(id, EventKind::Destroy).with_attribute(NAME_ATTRIBUTE, name)
    }

    /// Add an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Set the object type.
    #[must_use]
    pub fn with_object(mut self, object: ObjectKind) -> Self {
        self.object = object;
        self
    }

    /// Check if the event is about a container.
    #[must_use]
    pub const fn is_container(&self) -> bool {
        matches!(self.object, ObjectKind::Container)
    }

    /// Container name, if the runtime supplied one.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.attributes.get(NAME_ATTRIBUTE).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_action() {
        assert_eq!(EventKind::from_action("create"), EventKind::Create);
        assert_eq!(EventKind::from_action("die"), EventKind::Die);
        assert_eq!(
            EventKind::from_action("exec_start: sh"),
            EventKind::Other("exec_start: sh".to_string())
        );
    }

    #[test]
    fn test_event_serializes_kind_as_action() {
        let event = LifecycleEvent::started("abc", "k8s_app");
        let json = serde_json::to_value(&event).ok();
        assert_eq!(
            json.as_ref().and_then(|v| v.get("kind")).and_then(|k| k.as_str()),
            Some("start")
        );
    }

    #[test]
    fn test_event_deserializes_without_optional_fields() {
        let parsed: Result<LifecycleEvent, _> =
            serde_json::from_str(r#"{"id":"abc","kind":"destroy"}"#);
        let event = parsed.ok();
        assert_eq!(event.as_ref().map(|e| e.kind.clone()), Some(EventKind::Destroy));
        assert!(event.as_ref().is_some_and(LifecycleEvent::is_container));
        assert_eq!(event.and_then(|e| e.name().map(str::to_string)), None);
    }

    #[test]
    fn test_name_attribute() {
        let event = LifecycleEvent::created("abc", "web");
        assert_eq!(event.name(), Some("web"));
    }

    #[test]
    fn test_object_type_parses_from_wire() {
        let parsed: Result<LifecycleEvent, _> =
            serde_json::from_str(r#"{"id":"net1","object":"network","kind":"create"}"#);
        let event = parsed.ok();
        assert_eq!(
            event.as_ref().map(|e| e.object.clone()),
            Some(ObjectKind::Other("network".to_string()))
        );
        assert!(event.is_some_and(|e| !e.is_container()));
        assert_eq!(ObjectKind::from_type("container"), ObjectKind::Container);
    }
}
