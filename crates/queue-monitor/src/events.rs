//! Outbound notifications
//!
//! Everything the monitor reports to its host flows through one typed
//! [`QueueMonitorEvent`] enum, broadcast to any number of subscribers through
//! an [`EventSink`]. Subscribers that fall behind lose the oldest events
//! (tokio broadcast semantics) but never block the monitor.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::error::ConnectionErrorCode;
use crate::types::{Member, Queue};

/// Default capacity of the notification channel
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Notifications emitted by the queue monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueueMonitorEvent {
    /// The transport reported a completed login
    Connected,

    /// The connection is down
    Disconnected,

    /// Another connect attempt is scheduled after `delay`
    Reconnecting { delay: Duration },

    /// A classified connection failure
    ConnectionError {
        code: ConnectionErrorCode,
        message: String,
    },

    /// The cache changed; carries every queue
    QueuesUpdated { queues: Vec<Queue> },

    MemberAdded { queue: String, member: Member },

    MemberRemoved { queue: String, member: Member },

    /// Merged status change for one agent across `queues`
    MemberStatusChanged {
        queues: Vec<String>,
        member: Member,
        paused: bool,
    },

    /// Merged pause change for one agent across `queues`
    MemberPauseChanged {
        queues: Vec<String>,
        member: Member,
        paused: bool,
    },
}

impl QueueMonitorEvent {
    /// Short name of the notification, as used in logs
    pub fn name(&self) -> &'static str {
        match self {
            QueueMonitorEvent::Connected => "connected",
            QueueMonitorEvent::Disconnected => "disconnected",
            QueueMonitorEvent::Reconnecting { .. } => "reconnecting",
            QueueMonitorEvent::ConnectionError { .. } => "connectionError",
            QueueMonitorEvent::QueuesUpdated { .. } => "queuesUpdated",
            QueueMonitorEvent::MemberAdded { .. } => "memberAdded",
            QueueMonitorEvent::MemberRemoved { .. } => "memberRemoved",
            QueueMonitorEvent::MemberStatusChanged { .. } => "memberStatusChanged",
            QueueMonitorEvent::MemberPauseChanged { .. } => "memberPauseChanged",
        }
    }

    /// Whether this notification describes the connection rather than the cache
    pub fn is_connection_event(&self) -> bool {
        matches!(
            self,
            QueueMonitorEvent::Connected
                | QueueMonitorEvent::Disconnected
                | QueueMonitorEvent::Reconnecting { .. }
                | QueueMonitorEvent::ConnectionError { .. }
        )
    }
}

/// Cloneable handle used by every component to publish notifications
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<QueueMonitorEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event; having no subscribers is not an error
    pub fn emit(&self, event: QueueMonitorEvent) {
        trace!("📣 {}", event.name());
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueMonitorEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
