//! # Per-Agent Event Coalescing
//!
//! The switch reports one status or pause event per (queue, extension) pair,
//! so an agent logged into five queues produces five events for one logical
//! change. The coalescer buffers these per extension and applies them as one
//! merged update once the extension has been quiet for the debounce window.
//!
//! ```text
//!  t=0    Pause(A, SIP/100)  ──▶ pending{SIP/100: queues=[A]}      timer armed
//!  t=100  Pause(B, SIP/100)  ──▶ pending{SIP/100: queues=[A, B]}   timer re-armed
//!  t=600  timer fires        ──▶ apply to A and B, emit one memberPauseChanged
//! ```
//!
//! ## Rules
//!
//! - The newest payload wins; the queue list keeps first-contribution order
//!   without duplicates.
//! - Every event resets the timer to a full window. With no
//!   [`CoalescingConfig::max_deferral`] a steady stream faster than the window
//!   defers the update indefinitely; with a cap the entry fires no later than
//!   `cap` after its first event.
//! - Timers carry a generation number. A timer that lost a race with a reset
//!   finds a newer generation in the table and does nothing.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::cache::SharedCache;
use crate::config::CoalescingConfig;
use crate::events::{EventSink, QueueMonitorEvent};
use crate::parser::PauseUpdate;
use crate::types::Member;

/// The payload held for an extension while its window is open
#[derive(Debug, Clone, PartialEq)]
pub enum MemberUpdate {
    /// Full replacement of the member record
    Status(Member),
    /// Merge of the pause fields only
    Pause(PauseUpdate),
}

impl MemberUpdate {
    pub fn extension(&self) -> &str {
        match self {
            MemberUpdate::Status(member) => &member.extension,
            MemberUpdate::Pause(update) => &update.extension,
        }
    }
}

struct PendingEvent {
    update: MemberUpdate,
    queues: Vec<String>,
    generation: u64,
    first_seen: Instant,
    timer: JoinHandle<()>,
}

struct CoalescerInner {
    window: Duration,
    max_deferral: Option<Duration>,
    cache: SharedCache,
    sink: EventSink,
    pending: DashMap<String, PendingEvent>,
    next_generation: AtomicU64,
    closed: AtomicBool,
}

/// Debounces per-extension member updates across queues
#[derive(Clone)]
pub struct EventCoalescer {
    inner: Arc<CoalescerInner>,
}

impl EventCoalescer {
    pub fn new(config: &CoalescingConfig, cache: SharedCache, sink: EventSink) -> Self {
        Self {
            inner: Arc::new(CoalescerInner {
                window: config.debounce_window,
                max_deferral: config.max_deferral,
                cache,
                sink,
                pending: DashMap::new(),
                next_generation: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Record an update for one queue and (re)arm the extension's timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn push(&self, queue: &str, update: MemberUpdate) {
        if self.inner.closed.load(Ordering::SeqCst) {
            debug!("Coalescer closed, dropping update for {}", update.extension());
            return;
        }

        let now = Instant::now();
        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        let extension = update.extension().to_string();

        match self.inner.pending.entry(extension.clone()) {
            Entry::Occupied(mut occupied) => {
                let pending = occupied.get_mut();
                if !pending.queues.iter().any(|q| q == queue) {
                    pending.queues.push(queue.to_string());
                }
                pending.update = update;
                pending.timer.abort();
                pending.generation = generation;
                let delay = self.inner.delay_since(pending.first_seen, now);
                trace!(
                    "⏱️ Re-arming {} for {:?} ({} queues pending)",
                    extension,
                    delay,
                    pending.queues.len()
                );
                pending.timer = self.inner.arm(extension, generation, delay);
            }
            Entry::Vacant(vacant) => {
                trace!("⏱️ Arming {} for {:?}", extension, self.inner.window);
                let timer = self.inner.arm(extension, generation, self.inner.window);
                vacant.insert(PendingEvent {
                    update,
                    queues: vec![queue.to_string()],
                    generation,
                    first_seen: now,
                    timer,
                });
            }
        }
    }

    /// Drop every pending update without applying it.
    ///
    /// Returns how many extensions were discarded.
    pub fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        self.inner.pending.retain(|_, pending| {
            pending.timer.abort();
            cancelled += 1;
            false
        });
        if cancelled > 0 {
            debug!("🧹 Discarded {} pending member updates", cancelled);
        }
        cancelled
    }

    /// Cancel everything and refuse further updates
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.cancel_all();
    }

    /// Number of extensions with an open window
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Queues collected so far for `extension`, in contribution order
    pub fn pending_queues(&self, extension: &str) -> Option<Vec<String>> {
        self.inner.pending.get(extension).map(|p| p.queues.clone())
    }
}

impl CoalescerInner {
    fn delay_since(&self, first_seen: Instant, now: Instant) -> Duration {
        match self.max_deferral {
            Some(cap) => {
                let remaining = (first_seen + cap).saturating_duration_since(now);
                remaining.min(self.window)
            }
            None => self.window,
        }
    }

    fn arm(
        self: &Arc<Self>,
        extension: String,
        generation: u64,
        delay: Duration,
    ) -> JoinHandle<()> {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.fire(&extension, generation);
        })
    }

    fn fire(&self, extension: &str, generation: u64) {
        let Some((_, pending)) = self
            .pending
            .remove_if(extension, |_, p| p.generation == generation)
        else {
            trace!("Stale timer for {} (generation {})", extension, generation);
            return;
        };

        let (snapshot, queues) = {
            let mut cache = self.cache.write();
            for queue in &pending.queues {
                let applied = match &pending.update {
                    MemberUpdate::Status(member) => cache.apply_status(queue, member),
                    MemberUpdate::Pause(update) => cache.apply_pause(queue, update),
                };
                if !applied {
                    debug!("Member {} not found in queue {}, skipping", extension, queue);
                }
            }
            let snapshot = pending
                .queues
                .iter()
                .find_map(|queue| cache.member(queue, extension));
            (snapshot, cache.queues())
        };

        let Some(member) = snapshot else {
            debug!(
                "No cached queue holds {}, dropping merged update for {:?}",
                extension, pending.queues
            );
            return;
        };

        debug!(
            "📦 Applying merged update for {} across {:?}",
            extension, pending.queues
        );
        let paused = member.paused;
        let event = match pending.update {
            MemberUpdate::Status(_) => QueueMonitorEvent::MemberStatusChanged {
                queues: pending.queues,
                member,
                paused,
            },
            MemberUpdate::Pause(_) => QueueMonitorEvent::MemberPauseChanged {
                queues: pending.queues,
                member,
                paused,
            },
        };
        self.sink.emit(event);
        self.sink.emit(QueueMonitorEvent::QueuesUpdated { queues });
    }
}
