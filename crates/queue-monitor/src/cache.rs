use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::parser::PauseUpdate;
use crate::types::{Agent, Member, Queue, QueueMember};

/// Cache shared between the monitor, its event router and the coalescer
pub type SharedCache = Arc<RwLock<QueueCache>>;

/// Authoritative in-memory view of queues and their members.
///
/// Queues keep the order in which they were first seen; members keep
/// insertion order and are unique by extension within a queue.
#[derive(Debug, Default)]
pub struct QueueCache {
    queues: IndexMap<String, Queue>,
}

impl QueueCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedCache {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Swap in a freshly built map, dropping everything previously cached
    pub fn replace_all(&mut self, queues: IndexMap<String, Queue>) {
        info!(
            "📋 Installing queue snapshot: {} queues (was {})",
            queues.len(),
            self.queues.len()
        );
        self.queues = queues;
    }

    /// Append `member` to `queue`, creating the queue on first sight.
    ///
    /// Returns `false` when the extension is already a member.
    pub fn add_member(&mut self, queue: &str, member: Member) -> bool {
        let entry = self.queues.entry(queue.to_string()).or_insert_with(|| {
            debug!("Creating queue {} on first member", queue);
            Queue::new(queue)
        });

        if entry.contains(&member.extension) {
            debug!("Member {} already in queue {}, ignoring add", member.extension, queue);
            return false;
        }

        info!("➕ Member {} added to queue {}", member.extension, queue);
        entry.members.push(member);
        true
    }

    /// Remove `extension` from `queue`, returning the removed record
    pub fn remove_member(&mut self, queue: &str, extension: &str) -> Option<Member> {
        let entry = self.queues.get_mut(queue)?;
        let index = entry.position(extension)?;
        info!("➖ Member {} removed from queue {}", extension, queue);
        Some(entry.members.remove(index))
    }

    /// Replace a member's record in place with a full status payload
    pub fn apply_status(&mut self, queue: &str, member: &Member) -> bool {
        let Some(slot) = self.member_mut(queue, &member.extension) else {
            return false;
        };
        *slot = member.clone();
        true
    }

    /// Merge pause fields onto an existing member record
    pub fn apply_pause(&mut self, queue: &str, update: &PauseUpdate) -> bool {
        let Some(slot) = self.member_mut(queue, &update.extension) else {
            return false;
        };
        slot.paused = update.paused;
        slot.paused_reason = update.reason.clone();
        if let Some(last_pause) = update.last_pause {
            slot.last_pause = last_pause;
        }
        true
    }

    fn member_mut(&mut self, queue: &str, extension: &str) -> Option<&mut Member> {
        self.queues
            .get_mut(queue)?
            .members
            .iter_mut()
            .find(|m| m.extension == extension)
    }

    /// Every cached queue
    pub fn queues(&self) -> Vec<Queue> {
        self.queues.values().cloned().collect()
    }

    pub fn queue(&self, name: &str) -> Option<Queue> {
        self.queues.get(name).cloned()
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.queues.keys().cloned().collect()
    }

    /// A member as found in one specific queue
    pub fn member(&self, queue: &str, extension: &str) -> Option<Member> {
        self.queues.get(queue)?.member(extension).cloned()
    }

    /// The agent behind `extension`, across every queue holding it.
    ///
    /// Field values are taken from the first queue in cache order.
    pub fn agent(&self, extension: &str) -> Option<Agent> {
        let mut found: Option<Agent> = None;
        for queue in self.queues.values() {
            let Some(member) = queue.member(extension) else {
                continue;
            };
            match found.as_mut() {
                Some(agent) => agent.queues.push(queue.name.clone()),
                None => {
                    found = Some(Agent {
                        member: member.clone(),
                        queues: vec![queue.name.clone()],
                    })
                }
            }
        }
        found
    }

    /// Members of `queue` that are idle and not paused, in member order
    pub fn available_agents(&self, queue: &str) -> Vec<Member> {
        self.queues
            .get(queue)
            .map(|q| q.members.iter().filter(|m| m.is_available()).cloned().collect())
            .unwrap_or_default()
    }

    /// Members of `queue` annotated with the queue name
    pub fn queue_members(&self, queue: &str) -> Vec<QueueMember> {
        self.queues
            .get(queue)
            .map(|q| {
                q.members
                    .iter()
                    .map(|m| QueueMember {
                        queue: q.name.clone(),
                        member: m.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every distinct extension with the queues it belongs to
    pub fn agents(&self) -> Vec<Agent> {
        let mut agents: IndexMap<&str, Agent> = IndexMap::new();
        for queue in self.queues.values() {
            for member in &queue.members {
                agents
                    .entry(member.extension.as_str())
                    .and_modify(|agent| {
                        if !agent.queues.contains(&queue.name) {
                            agent.queues.push(queue.name.clone());
                        }
                    })
                    .or_insert_with(|| Agent {
                        member: member.clone(),
                        queues: vec![queue.name.clone()],
                    });
            }
        }
        agents.into_values().collect()
    }

    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    /// Member records across all queues (an agent in two queues counts twice)
    pub fn member_count(&self) -> usize {
        self.queues.values().map(|q| q.members.len()).sum()
    }
}
