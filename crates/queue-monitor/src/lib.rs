//! # Queue Monitor for RVOIP
//!
//! This crate keeps a live, in-memory view of a switch's call queues and the
//! agents logged into them. It consumes the switch's management event stream,
//! survives an unreliable long-lived connection, and exposes read accessors
//! plus a small set of control commands.
//!
//! ## Features
//!
//! - **Event Coalescing**: Per-agent status and pause bursts across several queues
//!   collapse into one merged update and one notification
//! - **Connection Resilience**: Bounded-timeout connect attempts and an unbounded
//!   fixed-delay reconnect loop
//! - **Queue Cache**: Full resync on switch boot, incremental add/remove, agent views
//! - **Command Gateway**: Pause, unpause, add and remove members with state checks
//!   and response timeouts
//! - **Typed Notifications**: One [`QueueMonitorEvent`] enum over a broadcast channel
//!
//! ## Architecture
//!
//! - [`transport`]: The narrow interface to the wire-protocol client, plus a mock
//! - [`parser`]: Validation of raw payloads into typed events and snapshots
//! - [`cache`]: The queue/member map and its read accessors
//! - [`coalescer`]: Debounced merging of per-agent updates
//! - [`connection`]: Connect / timeout / reconnect / shutdown state machine
//! - [`gateway`]: Timed request/response for outbound actions
//! - [`monitor`]: The owned [`QueueMonitor`] instance wiring everything together
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rvoip_queue_monitor::prelude::*;
//! use rvoip_queue_monitor::transport::mock::MockTransport;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = QueueMonitorConfig::new("127.0.0.1", 5038, "admin", "secret");
//!     let monitor = QueueMonitor::new(config, Arc::new(MockTransport::new()))?;
//!
//!     let mut events = monitor.subscribe();
//!     monitor.connect().await;
//!
//!     while let Ok(event) = events.recv().await {
//!         println!("{}", event.name());
//!     }
//!
//!     monitor.shutdown().await;
//!     Ok(())
//! }
//! ```

// Core modules
pub mod error;
pub mod config;
pub mod types;

// Switch interface
pub mod transport;
pub mod parser;

// Cache and event processing
pub mod events;
pub mod cache;
pub mod coalescer;

// Connection and commands
pub mod connection;
pub mod gateway;
pub mod monitor;

// Re-exports for convenience
pub use config::QueueMonitorConfig;
pub use error::{CommandError, ConnectionErrorCode, QueueMonitorError, Result};
pub use events::QueueMonitorEvent;
pub use monitor::{MonitorStats, QueueMonitor};
pub use transport::{Action, ActionResponse, AddMemberOptions, RawEvent, Transport};
pub use types::{Agent, ConnectionState, DeviceStatus, Member, Queue, QueueMember};

/// Prelude module for convenient imports
pub mod prelude {
    // Core types
    pub use crate::{QueueMonitor, QueueMonitorConfig, QueueMonitorError, QueueMonitorEvent, Result};

    // Data model
    pub use crate::types::{
        Agent, ConnectionState, DeviceStatus, Member, Membership, Queue, QueueMember,
    };

    // Transport seam
    pub use crate::transport::{
        Action, ActionResponse, AddMemberOptions, LifecycleEvent, RawEvent, Transport,
    };

    // Errors
    pub use crate::error::{CommandError, ConnectionErrorCode, TransportError};

    pub use crate::monitor::MonitorStats;
}
