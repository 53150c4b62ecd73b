//! Boundary validation of raw switch payloads
//!
//! Every raw event is converted here into a typed [`QueueEvent`] before it can
//! touch the cache. Numeric fields that are present but malformed reject the
//! whole event; absent numeric fields read as zero.

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::error::ParseError;
use crate::transport::RawEvent;
use crate::types::{DeviceStatus, Member, Membership, Queue};

/// Event kinds the monitor reacts to
pub mod kinds {
    pub const FULLY_BOOTED: &str = "FullyBooted";
    pub const MEMBER_STATUS: &str = "QueueMemberStatus";
    pub const MEMBER_ADDED: &str = "QueueMemberAdded";
    pub const MEMBER_REMOVED: &str = "QueueMemberRemoved";
    pub const MEMBER_PAUSE: &str = "QueueMemberPause";
    pub const QUEUE_PARAMS: &str = "QueueParams";
    pub const QUEUE_MEMBER: &str = "QueueMember";
}

/// Pause-only update carried by a `QueueMemberPause` event
#[derive(Debug, Clone, PartialEq)]
pub struct PauseUpdate {
    pub extension: String,
    pub paused: bool,
    pub reason: String,
    /// Kept from the existing record when the event omits it
    pub last_pause: Option<i64>,
}

/// A validated raw event
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    /// The switch finished starting; the cache should be rebuilt
    FullyBooted,
    MemberStatus { queue: String, member: Member },
    MemberPause { queue: String, update: PauseUpdate },
    MemberAdded { queue: String, member: Member },
    MemberRemoved { queue: String, extension: String },
    /// Any kind the monitor does not handle
    Other(String),
}

/// Validate and convert one raw event
pub fn parse_event(raw: &RawEvent) -> Result<QueueEvent, ParseError> {
    let kind = raw.kind().ok_or(ParseError::MissingEventKind)?;

    let event = if kind.eq_ignore_ascii_case(kinds::FULLY_BOOTED) {
        QueueEvent::FullyBooted
    } else if kind.eq_ignore_ascii_case(kinds::MEMBER_STATUS) {
        QueueEvent::MemberStatus {
            queue: required(raw, "Queue")?.to_string(),
            member: member_from_event(raw)?,
        }
    } else if kind.eq_ignore_ascii_case(kinds::MEMBER_ADDED) {
        QueueEvent::MemberAdded {
            queue: required(raw, "Queue")?.to_string(),
            member: member_from_event(raw)?,
        }
    } else if kind.eq_ignore_ascii_case(kinds::MEMBER_PAUSE) {
        QueueEvent::MemberPause {
            queue: required(raw, "Queue")?.to_string(),
            update: pause_from_event(raw)?,
        }
    } else if kind.eq_ignore_ascii_case(kinds::MEMBER_REMOVED) {
        QueueEvent::MemberRemoved {
            queue: required(raw, "Queue")?.to_string(),
            extension: required(raw, "Interface")?.to_string(),
        }
    } else {
        QueueEvent::Other(kind.to_string())
    };

    Ok(event)
}

/// Build the queue map from a queue-status response.
///
/// A `QueueParams` entry opens a new queue; following `QueueMember` entries
/// belong to it. Malformed queue entries are skipped along with their members,
/// malformed or duplicate member entries are skipped alone. A repeated queue
/// keeps the figures of its first entry and collects the members of both.
pub fn parse_queue_status(entries: &[RawEvent]) -> IndexMap<String, Queue> {
    let mut queues: IndexMap<String, Queue> = IndexMap::new();
    let mut current: Option<String> = None;

    for entry in entries {
        let Some(kind) = entry.kind() else {
            continue;
        };

        if kind.eq_ignore_ascii_case(kinds::QUEUE_PARAMS) {
            match queue_from_params(entry) {
                Ok(queue) if queues.contains_key(&queue.name) => {
                    warn!("⚠️ Queue {} listed twice, merging its members", queue.name);
                    current = Some(queue.name);
                }
                Ok(queue) => {
                    current = Some(queue.name.clone());
                    queues.insert(queue.name.clone(), queue);
                }
                Err(e) => {
                    warn!("⚠️ Skipping malformed queue entry: {}", e);
                    current = None;
                }
            }
        } else if kind.eq_ignore_ascii_case(kinds::QUEUE_MEMBER) {
            let Some(queue) = current.as_ref().and_then(|name| queues.get_mut(name)) else {
                debug!("Member entry outside of a queue context, skipping");
                continue;
            };
            match member_from_snapshot(entry) {
                Ok(member) if queue.contains(&member.extension) => {
                    warn!(
                        "⚠️ Duplicate member {} in queue {}, skipping",
                        member.extension, queue.name
                    );
                }
                Ok(member) => queue.members.push(member),
                Err(e) => {
                    warn!("⚠️ Skipping malformed member entry in queue {}: {}", queue.name, e)
                }
            }
        }
    }

    queues
}

fn queue_from_params(raw: &RawEvent) -> Result<Queue, ParseError> {
    let mut queue = Queue::new(required(raw, "Queue")?);
    queue.max = uint(raw, "Max")?;
    if let Some(strategy) = raw.get("Strategy").filter(|s| !s.is_empty()) {
        queue.strategy = strategy.to_string();
    }
    queue.calls = uint(raw, "Calls")?;
    queue.holdtime = uint(raw, "Holdtime")?;
    queue.talktime = uint(raw, "TalkTime")?;
    queue.completed = uint(raw, "Completed")?;
    queue.abandoned = uint(raw, "Abandoned")?;
    queue.service_level = uint(raw, "ServiceLevel")?;
    queue.service_level_perf = float(raw, "ServicelevelPerf")?;
    queue.service_level_perf2 = float(raw, "ServicelevelPerf2")?;
    queue.weight = uint(raw, "Weight")?;
    Ok(queue)
}

fn member_from_event(raw: &RawEvent) -> Result<Member, ParseError> {
    let extension = required(raw, "Interface")?;
    member_with(raw, extension, raw.get("MemberName"))
}

fn member_from_snapshot(raw: &RawEvent) -> Result<Member, ParseError> {
    let extension = match raw.get("Location").filter(|s| !s.is_empty()) {
        Some(location) => location,
        None => required(raw, "Interface")?,
    };
    member_with(raw, extension, raw.get("Name").or_else(|| raw.get("MemberName")))
}

fn member_with(raw: &RawEvent, extension: &str, name: Option<&str>) -> Result<Member, ParseError> {
    Ok(Member {
        extension: extension.to_string(),
        name: name.unwrap_or(extension).to_string(),
        state_interface: raw.get("StateInterface").unwrap_or(extension).to_string(),
        membership: Membership::from(raw.get("Membership").unwrap_or_default()),
        penalty: uint(raw, "Penalty")?,
        calls_taken: uint(raw, "CallsTaken")?,
        last_call: int(raw, "LastCall")?,
        last_pause: int(raw, "LastPause")?,
        login_time: int(raw, "LoginTime")?,
        in_call: flag(raw, "InCall")?,
        status: DeviceStatus::from(uint(raw, "Status")?),
        paused: flag(raw, "Paused")?,
        paused_reason: raw.get("PausedReason").unwrap_or_default().to_string(),
        wrapup_time: uint(raw, "Wrapuptime")?,
    })
}

fn pause_from_event(raw: &RawEvent) -> Result<PauseUpdate, ParseError> {
    let last_pause = match raw.get("LastPause").filter(|s| !s.trim().is_empty()) {
        Some(_) => Some(int(raw, "LastPause")?),
        None => None,
    };
    let reason = raw
        .get("PausedReason")
        .or_else(|| raw.get("Reason"))
        .unwrap_or_default();

    Ok(PauseUpdate {
        extension: required(raw, "Interface")?.to_string(),
        paused: flag(raw, "Paused")?,
        reason: reason.to_string(),
        last_pause,
    })
}

fn required<'a>(raw: &'a RawEvent, field: &'static str) -> Result<&'a str, ParseError> {
    raw.get(field)
        .filter(|v| !v.is_empty())
        .ok_or(ParseError::MissingField(field))
}

fn uint(raw: &RawEvent, field: &'static str) -> Result<u32, ParseError> {
    number::<u32>(raw, field).map(|v| v.unwrap_or(0))
}

fn int(raw: &RawEvent, field: &'static str) -> Result<i64, ParseError> {
    number::<i64>(raw, field).map(|v| v.unwrap_or(0))
}

fn float(raw: &RawEvent, field: &'static str) -> Result<f64, ParseError> {
    let value = number::<f64>(raw, field)?.unwrap_or(0.0);
    if !value.is_finite() {
        return Err(ParseError::InvalidNumber {
            field,
            value: value.to_string(),
        });
    }
    Ok(value)
}

fn number<T: std::str::FromStr>(
    raw: &RawEvent,
    field: &'static str,
) -> Result<Option<T>, ParseError> {
    match raw.get(field).map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value.parse::<T>().map(Some).map_err(|_| ParseError::InvalidNumber {
            field,
            value: value.to_string(),
        }),
    }
}

fn flag(raw: &RawEvent, field: &'static str) -> Result<bool, ParseError> {
    match raw.get(field).map(str::trim) {
        None | Some("") => Ok(false),
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(ParseError::InvalidFlag {
                field,
                value: value.to_string(),
            }),
        },
    }
}
