//! Registry change events and the sink they are published to.
//!
//! This is the only coupling between discovery and messaging: the loop
//! emits events, whatever implements [`EventSink`] delivers them.

use serde_json::Value;

use super::descriptor::BackendDescriptor;

/// Topic clients subscribe to for newly discovered backends.
pub const TOPIC_ADD: &str = "/topic/add";
/// Topic clients subscribe to for backends that went away.
pub const TOPIC_REMOVE: &str = "/topic/remove";

/// A membership change of the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    /// A backend appeared this cycle.
    Added(BackendDescriptor),
    /// A backend disappeared this cycle; carries its last known descriptor.
    Removed(BackendDescriptor),
}

impl RegistryEvent {
    /// Destination the event is published on.
    pub fn topic(&self) -> &'static str {
        match self {
            RegistryEvent::Added(_) => TOPIC_ADD,
            RegistryEvent::Removed(_) => TOPIC_REMOVE,
        }
    }

    /// The backend concerned.
    pub fn descriptor(&self) -> &BackendDescriptor {
        match self {
            RegistryEvent::Added(d) | RegistryEvent::Removed(d) => d,
        }
    }

    /// Message body: the descriptor's normalized info.
    pub fn payload(&self) -> Value {
        self.descriptor().info.to_value()
    }
}

/// Receives registry events. Implementations must not block: the discovery
/// loop calls this inline between cycles.
pub trait EventSink: Send + Sync {
    /// Delivers one event.
    fn publish(&self, event: &RegistryEvent);
}
