//! Cached queue and member records
//!
//! These are the strongly-typed shapes the cache stores. Raw event payloads are
//! converted into them at the boundary (see [`crate::parser`]), so every value
//! held here has already been validated.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ring strategy assigned to queues first seen through a member-added event.
pub const DEFAULT_STRATEGY: &str = "ringall";

/// Device state reported for a queue member.
///
/// The switch reports these as small integers. Only [`DeviceStatus::NotInUse`]
/// counts as "available" when selecting agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DeviceStatus {
    #[default]
    Unknown,
    /// Registered and idle (code 1)
    NotInUse,
    InUse,
    Busy,
    Invalid,
    Unavailable,
    Ringing,
    RingInUse,
    OnHold,
    /// Any code this crate does not name
    Other(u32),
}

impl DeviceStatus {
    /// Numeric code as used on the wire
    pub fn code(&self) -> u32 {
        match self {
            DeviceStatus::Unknown => 0,
            DeviceStatus::NotInUse => 1,
            DeviceStatus::InUse => 2,
            DeviceStatus::Busy => 3,
            DeviceStatus::Invalid => 4,
            DeviceStatus::Unavailable => 5,
            DeviceStatus::Ringing => 6,
            DeviceStatus::RingInUse => 7,
            DeviceStatus::OnHold => 8,
            DeviceStatus::Other(code) => *code,
        }
    }

    /// Whether an agent in this state can take a call
    pub fn is_available(&self) -> bool {
        matches!(self, DeviceStatus::NotInUse)
    }
}

impl From<u32> for DeviceStatus {
    fn from(code: u32) -> Self {
        match code {
            0 => DeviceStatus::Unknown,
            1 => DeviceStatus::NotInUse,
            2 => DeviceStatus::InUse,
            3 => DeviceStatus::Busy,
            4 => DeviceStatus::Invalid,
            5 => DeviceStatus::Unavailable,
            6 => DeviceStatus::Ringing,
            7 => DeviceStatus::RingInUse,
            8 => DeviceStatus::OnHold,
            other => DeviceStatus::Other(other),
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStatus::Other(code) => write!(f, "other({})", code),
            status => write!(f, "{:?}", status),
        }
    }
}

/// How a member came to belong to a queue
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Membership {
    Static,
    #[default]
    Dynamic,
    Realtime,
    Other(String),
}

impl From<&str> for Membership {
    fn from(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "static" => Membership::Static,
            "dynamic" | "" => Membership::Dynamic,
            "realtime" => Membership::Realtime,
            _ => Membership::Other(value.to_string()),
        }
    }
}

impl fmt::Display for Membership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Membership::Static => f.write_str("static"),
            Membership::Dynamic => f.write_str("dynamic"),
            Membership::Realtime => f.write_str("realtime"),
            Membership::Other(s) => f.write_str(s),
        }
    }
}

/// An agent's registration within one queue.
///
/// Identified inside its queue by `extension`; the same extension may appear in
/// several queues as independent records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Member {
    /// Interface identifier, e.g. `SIP/1001`
    pub extension: String,
    pub name: String,
    pub state_interface: String,
    pub membership: Membership,
    pub penalty: u32,
    pub calls_taken: u32,
    /// Epoch seconds, 0 when never
    pub last_call: i64,
    pub last_pause: i64,
    pub login_time: i64,
    pub in_call: bool,
    pub status: DeviceStatus,
    pub paused: bool,
    pub paused_reason: String,
    pub wrapup_time: u32,
}

impl Member {
    /// Create a member with only its interface set
    pub fn new(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
            ..Default::default()
        }
    }

    /// Ready for a call: idle device and not paused
    pub fn is_available(&self) -> bool {
        self.status.is_available() && !self.paused
    }

    pub fn last_call_at(&self) -> Option<DateTime<Utc>> {
        epoch_to_datetime(self.last_call)
    }

    pub fn last_pause_at(&self) -> Option<DateTime<Utc>> {
        epoch_to_datetime(self.last_pause)
    }

    pub fn logged_in_at(&self) -> Option<DateTime<Utc>> {
        epoch_to_datetime(self.login_time)
    }
}

fn epoch_to_datetime(secs: i64) -> Option<DateTime<Utc>> {
    if secs <= 0 {
        return None;
    }
    Utc.timestamp_opt(secs, 0).single()
}

/// A call-distribution queue with its aggregate counters and members
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Queue {
    pub name: String,
    /// Maximum waiting callers, 0 for unlimited
    pub max: u32,
    pub strategy: String,
    pub calls: u32,
    pub holdtime: u32,
    pub talktime: u32,
    pub completed: u32,
    pub abandoned: u32,
    /// Service level threshold in seconds
    pub service_level: u32,
    pub service_level_perf: f64,
    pub service_level_perf2: f64,
    pub weight: u32,
    /// Insertion-ordered, unique by extension
    pub members: Vec<Member>,
}

impl Queue {
    /// Queue with zeroed counters and the default strategy
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max: 0,
            strategy: DEFAULT_STRATEGY.to_string(),
            calls: 0,
            holdtime: 0,
            talktime: 0,
            completed: 0,
            abandoned: 0,
            service_level: 0,
            service_level_perf: 0.0,
            service_level_perf2: 0.0,
            weight: 0,
            members: Vec::new(),
        }
    }

    pub fn member(&self, extension: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.extension == extension)
    }

    pub fn contains(&self, extension: &str) -> bool {
        self.member(extension).is_some()
    }

    pub(crate) fn position(&self, extension: &str) -> Option<usize> {
        self.members.iter().position(|m| m.extension == extension)
    }
}

/// A member annotated with the queue it was read from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMember {
    pub queue: String,
    pub member: Member,
}

/// One physical agent seen across every queue it belongs to.
///
/// Field values come from the first queue (in cache order) that holds the
/// extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub member: Member,
    pub queues: Vec<String>,
}

impl Agent {
    pub fn extension(&self) -> &str {
        &self.member.extension
    }
}

/// Lifecycle state of the switch connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(label)
    }
}
