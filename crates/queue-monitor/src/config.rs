use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{QueueMonitorError, Result};

/// Default management port of the switch
pub const DEFAULT_PORT: u16 = 5038;

/// Queue monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QueueMonitorConfig {
    /// Switch address and credentials, handed to the transport
    pub transport: TransportConfig,

    /// Connect/reconnect timing
    pub connection: ConnectionConfig,

    /// Event coalescing timing
    pub coalescing: CoalescingConfig,

    /// Command gateway settings
    pub commands: CommandConfig,
}

/// Switch identity and credentials.
///
/// The monitor never opens sockets itself; transport implementations read
/// this to know where and how to log in.
#[derive(Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Ask the switch to stream events after login
    pub events: bool,
}

impl std::fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("events", &self.events)
            .finish()
    }
}

/// Connection lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Fixed delay between a disconnect and the next connect attempt
    pub reconnect_interval: Duration,

    /// How long a single connect attempt may take
    pub connect_timeout: Duration,
}

/// Event coalescing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoalescingConfig {
    /// Quiet period after the latest event for an extension before it is applied
    pub debounce_window: Duration,

    /// Upper bound on how long resets may defer a pending update.
    /// `None` lets a steady event stream defer it indefinitely.
    pub max_deferral: Option<Duration>,
}

/// Command gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Response timeout used when a caller does not give one
    pub default_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            username: String::new(),
            password: String::new(),
            events: true,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_millis(5000),
            connect_timeout: Duration::from_millis(10000),
        }
    }
}

impl Default for CoalescingConfig {
    fn default() -> Self {
        Self {
            debounce_window: Duration::from_millis(500),
            max_deferral: None,
        }
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_millis(5000),
        }
    }
}

impl QueueMonitorConfig {
    /// Configuration for the given switch with default timings
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            transport: TransportConfig {
                host: host.into(),
                port,
                username: username.into(),
                password: password.into(),
                events: true,
            },
            ..Default::default()
        }
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.connection.reconnect_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connection.connect_timeout = timeout;
        self
    }

    pub fn with_debounce_window(mut self, window: Duration) -> Self {
        self.coalescing.debounce_window = window;
        self
    }

    /// Force pending updates to fire no later than `cap` after their first event
    pub fn with_max_deferral(mut self, cap: Duration) -> Self {
        self.coalescing.max_deferral = Some(cap);
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.commands.default_timeout = timeout;
        self
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<()> {
        if self.transport.host.is_empty() {
            return Err(QueueMonitorError::config("host cannot be empty"));
        }

        if self.transport.port == 0 {
            return Err(QueueMonitorError::config("port must be greater than 0"));
        }

        if self.connection.reconnect_interval.is_zero() {
            return Err(QueueMonitorError::config("reconnect_interval must be greater than 0"));
        }

        if self.connection.connect_timeout.is_zero() {
            return Err(QueueMonitorError::config("connect_timeout must be greater than 0"));
        }

        if self.coalescing.debounce_window.is_zero() {
            return Err(QueueMonitorError::config("debounce_window must be greater than 0"));
        }

        if let Some(cap) = self.coalescing.max_deferral {
            if cap < self.coalescing.debounce_window {
                return Err(QueueMonitorError::config(format!(
                    "max_deferral ({:?}) cannot be shorter than debounce_window ({:?})",
                    cap, self.coalescing.debounce_window
                )));
            }
        }

        if self.commands.default_timeout.is_zero() {
            return Err(QueueMonitorError::config("default_timeout must be greater than 0"));
        }

        Ok(())
    }
}
