//! The queue monitor
//!
//! [`QueueMonitor`] is an explicitly owned instance tying the pieces together:
//!
//! ```text
//!              lifecycle                       raw events
//!  Transport ───────────► ConnectionController   │
//!      ▲                                        ▼
//!      │                                   event router ──► parse_event
//!      │                                        │
//!      │           FullyBooted ──► resync ◄─────┤
//!      │                              │         ├── status/pause ──► EventCoalescer
//!      │                              ▼         │                         │
//!  CommandGateway ◄── QueueStatus  QueueCache ◄─┴── added/removed         │
//!      ▲                              ▲                                   │
//!      │                              └───────────────────────────────────┘
//!  pause / unpause / add / remove
//! ```
//!
//! The host owns the instance, wires OS signals to [`QueueMonitor::shutdown`]
//! and reads notifications from [`QueueMonitor::subscribe`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::cache::{QueueCache, SharedCache};
use crate::coalescer::{EventCoalescer, MemberUpdate};
use crate::config::QueueMonitorConfig;
use crate::connection::ConnectionController;
use crate::error::Result;
use crate::events::{EventSink, QueueMonitorEvent};
use crate::gateway::CommandGateway;
use crate::parser::{parse_event, parse_queue_status, QueueEvent};
use crate::transport::{Action, AddMemberOptions, RawEvent, Transport};
use crate::types::{Agent, ConnectionState, Member, Queue, QueueMember};

/// Point-in-time counters describing the monitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorStats {
    pub state: ConnectionState,
    pub queues: usize,
    /// Member records across all queues
    pub members: usize,
    /// Distinct extensions across all queues
    pub agents: usize,
    /// Extensions with a coalesced update waiting to fire
    pub pending_updates: usize,
}

struct MonitorInner {
    config: QueueMonitorConfig,
    transport: Arc<dyn Transport>,
    sink: EventSink,
    cache: SharedCache,
    coalescer: EventCoalescer,
    controller: ConnectionController,
    gateway: CommandGateway,
    router: Mutex<Option<JoinHandle<()>>>,
    /// Boot-triggered resyncs still waiting on their response
    resyncs: Mutex<Vec<JoinHandle<()>>>,
    /// Set under the cache write lock; no cache mutation happens afterwards
    closed: AtomicBool,
}

/// Live queue and agent cache kept in sync with a switch
#[derive(Clone)]
pub struct QueueMonitor {
    inner: Arc<MonitorInner>,
}

impl QueueMonitor {
    /// Build a monitor over `transport`. Nothing is opened until [`connect`](Self::connect).
    pub fn new(config: QueueMonitorConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;

        let sink = EventSink::default();
        let cache = QueueCache::shared();
        let coalescer = EventCoalescer::new(&config.coalescing, cache.clone(), sink.clone());
        let controller =
            ConnectionController::new(transport.clone(), config.connection.clone(), sink.clone());
        let gateway = CommandGateway::new(
            transport.clone(),
            controller.watch_state(),
            config.commands.default_timeout,
        );

        info!(
            "🎯 Queue monitor created for {}:{}",
            config.transport.host, config.transport.port
        );

        Ok(Self {
            inner: Arc::new(MonitorInner {
                config,
                transport,
                sink,
                cache,
                coalescer,
                controller,
                gateway,
                router: Mutex::new(None),
                resyncs: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &QueueMonitorConfig {
        &self.inner.config
    }

    /// Start routing switch events and begin connecting.
    ///
    /// Returns once the first attempt is under way; reconnection after any
    /// failure happens in the background until [`shutdown`](Self::shutdown).
    pub async fn connect(&self) {
        if self.inner.controller.is_shutdown() {
            debug!("Monitor is shut down, ignoring connect");
            return;
        }
        MonitorInner::ensure_router(&self.inner);
        self.inner.controller.connect().await;
    }

    /// Stop for good: pending updates are discarded, event routing stops and
    /// the transport is closed if it was connected.
    pub async fn shutdown(&self) {
        info!("🛑 Shutting down queue monitor");
        {
            let _cache = self.inner.cache.write();
            self.inner.closed.store(true, Ordering::SeqCst);
        }
        self.inner.coalescer.close();
        if let Some(router) = self.inner.router.lock().take() {
            router.abort();
        }
        for resync in self.inner.resyncs.lock().drain(..) {
            resync.abort();
        }
        self.inner.controller.shutdown().await;
    }

    /// Rebuild the cache from a fresh queue-status query.
    ///
    /// Returns `false` when the query failed; the cache is left as it was.
    pub async fn refresh(&self) -> bool {
        self.inner.resync().await
    }

    /// Pause `interface`, in one queue or in all of them.
    ///
    /// Like every control command this never raises: failures are logged and
    /// reported as `false`.
    ///
    /// ```rust
    /// # use rvoip_queue_monitor::prelude::*;
    /// # use rvoip_queue_monitor::transport::mock::MockTransport;
    /// # use std::sync::Arc;
    /// # tokio_test::block_on(async {
    /// let transport = Arc::new(MockTransport::new());
    /// let monitor = QueueMonitor::new(QueueMonitorConfig::default(), transport)?;
    /// // Not connected yet
    /// assert!(!monitor.pause_member("SIP/1001", Some("Lunch"), None).await);
    /// # Ok::<(), QueueMonitorError>(())
    /// # }).unwrap();
    /// ```
    pub async fn pause_member(
        &self,
        interface: &str,
        reason: Option<&str>,
        queue: Option<&str>,
    ) -> bool {
        self.inner
            .run_command("pause", Action::queue_pause(interface, true, queue, reason))
            .await
    }

    pub async fn unpause_member(&self, interface: &str, queue: Option<&str>) -> bool {
        self.inner
            .run_command("unpause", Action::queue_pause(interface, false, queue, None))
            .await
    }

    pub async fn add_member(
        &self,
        queue: &str,
        interface: &str,
        options: AddMemberOptions,
    ) -> bool {
        self.inner
            .run_command("add member", Action::queue_add(queue, interface, &options))
            .await
    }

    pub async fn remove_member(&self, queue: &str, interface: &str) -> bool {
        self.inner
            .run_command("remove member", Action::queue_remove(queue, interface))
            .await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueMonitorEvent> {
        self.inner.sink.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.controller.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.controller.watch_state()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.controller.is_connected()
    }

    pub fn queues(&self) -> Vec<Queue> {
        self.inner.cache.read().queues()
    }

    pub fn queue(&self, name: &str) -> Option<Queue> {
        self.inner.cache.read().queue(name)
    }

    /// The agent behind `extension` with every queue it belongs to
    pub fn agent(&self, extension: &str) -> Option<Agent> {
        self.inner.cache.read().agent(extension)
    }

    /// Members of `queue` that are idle and not paused
    pub fn available_agents(&self, queue: &str) -> Vec<Member> {
        self.inner.cache.read().available_agents(queue)
    }

    pub fn queue_members(&self, queue: &str) -> Vec<QueueMember> {
        self.inner.cache.read().queue_members(queue)
    }

    /// Every distinct agent across all queues
    pub fn agents(&self) -> Vec<Agent> {
        self.inner.cache.read().agents()
    }

    pub fn stats(&self) -> MonitorStats {
        let cache = self.inner.cache.read();
        MonitorStats {
            state: self.inner.controller.state(),
            queues: cache.queue_count(),
            members: cache.member_count(),
            agents: cache.agents().len(),
            pending_updates: self.inner.coalescer.pending_count(),
        }
    }
}

impl MonitorInner {
    fn ensure_router(this: &Arc<Self>) {
        let mut router = this.router.lock();
        if router.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        debug!("Starting switch event router");
        let events = this.transport.events();
        let inner = Arc::clone(this);
        *router = Some(tokio::spawn(async move {
            Self::route_events(inner, events).await;
        }));
    }

    async fn route_events(this: Arc<Self>, mut events: broadcast::Receiver<RawEvent>) {
        loop {
            match events.recv().await {
                Ok(raw) => Self::route(&this, &raw),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("⚠️ Event router lagged, {} switch events dropped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Switch event stream closed");
                    break;
                }
            }
        }
    }

    fn route(this: &Arc<Self>, raw: &RawEvent) {
        let event = match parse_event(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!("⚠️ Dropping malformed {} event: {}", raw.kind().unwrap_or("?"), e);
                return;
            }
        };

        match event {
            QueueEvent::FullyBooted => {
                info!("🔄 Switch fully booted, resynchronizing queues");
                let inner = Arc::clone(this);
                let handle = tokio::spawn(async move {
                    inner.resync().await;
                });
                let mut resyncs = this.resyncs.lock();
                resyncs.retain(|h| !h.is_finished());
                resyncs.push(handle);
            }
            QueueEvent::MemberStatus { queue, member } => {
                this.coalescer.push(&queue, MemberUpdate::Status(member));
            }
            QueueEvent::MemberPause { queue, update } => {
                this.coalescer.push(&queue, MemberUpdate::Pause(update));
            }
            QueueEvent::MemberAdded { queue, member } => this.member_added(queue, member),
            QueueEvent::MemberRemoved { queue, extension } => {
                this.member_removed(queue, &extension)
            }
            QueueEvent::Other(kind) => trace!("Ignoring {} event", kind),
        }
    }

    fn member_added(&self, queue: String, member: Member) {
        let added = {
            let mut cache = self.cache.write();
            !self.is_closed() && cache.add_member(&queue, member.clone())
        };
        if added {
            self.sink.emit(QueueMonitorEvent::MemberAdded { queue, member });
            self.emit_queues_updated();
        }
    }

    fn member_removed(&self, queue: String, extension: &str) {
        let removed = {
            let mut cache = self.cache.write();
            if self.is_closed() {
                return;
            }
            cache.remove_member(&queue, extension)
        };
        if let Some(member) = removed {
            self.sink.emit(QueueMonitorEvent::MemberRemoved { queue, member });
            self.emit_queues_updated();
        }
    }

    async fn resync(&self) -> bool {
        let response = match self.gateway.send(Action::queue_status()).await {
            Ok(response) => response,
            Err(e) => {
                warn!("⚠️ Queue resync failed, keeping cached state: {}", e);
                return false;
            }
        };

        let queues = parse_queue_status(&response.events);
        {
            let mut cache = self.cache.write();
            if self.is_closed() {
                debug!("Monitor shut down while resync was in flight, dropping snapshot");
                return false;
            }
            let discarded = self.coalescer.cancel_all();
            if discarded > 0 {
                debug!("Discarded {} pending updates superseded by resync", discarded);
            }
            cache.replace_all(queues);
        }
        self.emit_queues_updated();
        true
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn run_command(&self, label: &str, action: Action) -> bool {
        match self.gateway.send(action).await {
            Ok(response) if response.is_success() => true,
            Ok(response) => {
                warn!("⚠️ {} was not accepted: {}", label, response.response);
                false
            }
            Err(e) => {
                warn!("⚠️ {} failed: {}", label, e);
                false
            }
        }
    }

    fn emit_queues_updated(&self) {
        let queues = self.cache.read().queues();
        self.sink.emit(QueueMonitorEvent::QueuesUpdated { queues });
    }
}
