//! # Transport Collaborator Interface
//!
//! The queue monitor does not speak the switch-management wire protocol
//! itself. Framing, login, action/response correlation and socket I/O belong
//! to a [`Transport`] implementation; the monitor only opens and closes it,
//! sends actions through it, and listens to its two broadcast channels:
//!
//! - **lifecycle**: [`LifecycleEvent`]s describing the connection itself
//! - **events**: [`RawEvent`] key/value payloads streamed by the switch
//!
//! ```text
//!   QueueMonitor ──open/close──▶ Transport ──socket──▶ switch
//!        ▲   └──send(Action)──▶     │
//!        │                          │
//!        └──── lifecycle / events ◀─┘
//! ```
//!
//! Field names are matched case-insensitively, since switches are not
//! consistent about header casing across versions.

pub mod mock;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::TransportError;

/// Connection lifecycle notifications raised by a transport
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// Login completed; the connection is usable
    Connected,
    /// The connection was closed by either side
    Closed { reason: Option<String> },
    /// The switch rejected the login
    InvalidCredentials,
    /// Socket or protocol failure
    Error(String),
}

/// Ordered, case-insensitive key/value map used by events, actions and responses
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fields {
    entries: IndexMap<String, (String, String)>,
}

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field, replacing any value stored under the same key
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.entries.insert(key.to_ascii_lowercase(), (key, value.into()));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&key.to_ascii_lowercase())
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_ascii_lowercase())
    }

    /// Fields in insertion order with their original key spelling
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.values().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Fields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut fields = Fields::new();
        for (k, v) in iter {
            fields.insert(k, v);
        }
        fields
    }
}

/// A raw event payload as delivered by the switch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub fields: Fields,
}

impl RawEvent {
    /// Start an event with the given discriminant
    pub fn new(kind: &str) -> Self {
        let mut fields = Fields::new();
        fields.insert("Event", kind);
        Self { fields }
    }

    /// Builder-style field setter
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.fields.insert(key, value);
        self
    }

    /// The discriminant naming the event kind
    pub fn kind(&self) -> Option<&str> {
        self.fields.get("Event")
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key)
    }
}

impl From<Fields> for RawEvent {
    fn from(fields: Fields) -> Self {
        Self { fields }
    }
}

/// An outbound control action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    pub fields: Fields,
}

impl Action {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Fields::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.fields.insert(key, value);
        self
    }

    /// Set a field only when a value is supplied
    pub fn with_opt(self, key: &str, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(value) => self.with(key, value),
            None => self,
        }
    }

    /// Snapshot of every queue and its members
    pub fn queue_status() -> Self {
        Action::new("QueueStatus")
    }

    /// Pause or unpause an interface, in one queue or in all of them
    pub fn queue_pause(
        interface: &str,
        paused: bool,
        queue: Option<&str>,
        reason: Option<&str>,
    ) -> Self {
        Action::new("QueuePause")
            .with("Interface", interface)
            .with("Paused", if paused { "true" } else { "false" })
            .with_opt("Queue", queue)
            .with_opt("Reason", reason)
    }

    /// Add an interface to a queue
    pub fn queue_add(queue: &str, interface: &str, options: &AddMemberOptions) -> Self {
        Action::new("QueueAdd")
            .with("Queue", queue)
            .with("Interface", interface)
            .with_opt("Penalty", options.penalty.map(|p| p.to_string()))
            .with_opt("Paused", options.paused.map(|p| if p { "true" } else { "false" }))
            .with_opt("MemberName", options.member_name.as_deref())
            .with_opt("StateInterface", options.state_interface.as_deref())
    }

    /// Remove an interface from a queue
    pub fn queue_remove(queue: &str, interface: &str) -> Self {
        Action::new("QueueRemove")
            .with("Queue", queue)
            .with("Interface", interface)
    }
}

/// Optional parameters for adding a queue member
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddMemberOptions {
    pub member_name: Option<String>,
    pub penalty: Option<u32>,
    pub paused: Option<bool>,
    pub state_interface: Option<String>,
}

/// Response to an [`Action`], including any event list it produced
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    /// Outcome string, `Success` or `Error`
    pub response: String,
    pub message: Option<String>,
    pub fields: Fields,
    /// Entries of a list-style response, in arrival order
    pub events: Vec<RawEvent>,
}

impl ActionResponse {
    pub fn success() -> Self {
        Self {
            response: "Success".to_string(),
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            response: "Error".to_string(),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_events(mut self, events: Vec<RawEvent>) -> Self {
        self.events = events;
        self
    }

    pub fn is_success(&self) -> bool {
        self.response.eq_ignore_ascii_case("success")
    }

    pub fn is_error(&self) -> bool {
        self.response.eq_ignore_ascii_case("error")
    }
}

/// The narrow interface the monitor needs from a protocol client.
///
/// `open` only *starts* a connection; success is reported later as
/// [`LifecycleEvent::Connected`]. `send` resolves with `Ok(None)` when the
/// transport got an empty response.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;

    async fn send(&self, action: Action) -> Result<Option<ActionResponse>, TransportError>;

    /// New subscription to lifecycle notifications
    fn lifecycle(&self) -> broadcast::Receiver<LifecycleEvent>;

    /// New subscription to raw switch events
    fn events(&self) -> broadcast::Receiver<RawEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_case_insensitive() {
        let event = RawEvent::new("QueueMemberPause").with("Interface", "SIP/100");
        assert_eq!(event.kind(), Some("QueueMemberPause"));
        assert_eq!(event.get("interface"), Some("SIP/100"));
        assert_eq!(event.get("INTERFACE"), Some("SIP/100"));
        assert_eq!(event.get("Queue"), None);
    }

    #[test]
    fn test_fields_keep_order_and_spelling() {
        let fields: Fields = vec![("Queue", "A"), ("Interface", "SIP/1"), ("queue", "B")]
            .into_iter()
            .collect();
        let items: Vec<_> = fields.iter().collect();
        assert_eq!(items, vec![("queue", "B"), ("Interface", "SIP/1")]);
    }

    #[test]
    fn test_pause_action_fields() {
        let action = Action::queue_pause("SIP/100", true, Some("support"), Some("Lunch"));
        assert_eq!(action.name, "QueuePause");
        assert_eq!(action.fields.get("Paused"), Some("true"));
        assert_eq!(action.fields.get("Queue"), Some("support"));
        assert_eq!(action.fields.get("Reason"), Some("Lunch"));

        let action = Action::queue_pause("SIP/100", false, None, None);
        assert_eq!(action.fields.get("Paused"), Some("false"));
        assert!(!action.fields.contains("Queue"));
    }

    #[test]
    fn test_add_action_optional_fields() {
        let options = AddMemberOptions {
            member_name: Some("Alice".into()),
            penalty: Some(2),
            ..Default::default()
        };
        let action = Action::queue_add("sales", "SIP/200", &options);
        assert_eq!(action.fields.get("MemberName"), Some("Alice"));
        assert_eq!(action.fields.get("Penalty"), Some("2"));
        assert!(!action.fields.contains("Paused"));
    }

    #[test]
    fn test_response_outcome() {
        assert!(ActionResponse::success().is_success());
        let err = ActionResponse::error("No such queue");
        assert!(err.is_error());
        assert!(!err.is_success());
    }
}
