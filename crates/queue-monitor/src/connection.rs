//! # Connection Resilience
//!
//! [`ConnectionController`] owns the transport lifecycle: bounded-timeout
//! connect attempts, classification of failures, and an unbounded fixed-delay
//! reconnect loop that only an explicit [`ConnectionController::shutdown`]
//! stops.
//!
//! ```text
//!              connect()                    Connected
//!  Disconnected ─────────▶ Connecting ─────────────────▶ Connected
//!       ▲                      │ timeout / error / closed     │ closed / error
//!       │                      ▼                              ▼
//!       └──────────────── disconnect handling ◀───────────────┘
//!                              │ (unless shut down)
//!                              ▼
//!                        Reconnecting ── after reconnect_interval ──▶ connect()
//! ```
//!
//! Failures are never returned to the caller. They are published as
//! [`QueueMonitorEvent::ConnectionError`] with a [`ConnectionErrorCode`].
//! Invalid credentials are retried like any other failure.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ConnectionConfig;
use crate::error::ConnectionErrorCode;
use crate::events::{EventSink, QueueMonitorEvent};
use crate::transport::{LifecycleEvent, Transport};
use crate::types::ConnectionState;

#[derive(Default)]
struct Timers {
    connect_timeout: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    lifecycle_listener: Option<JoinHandle<()>>,
}

impl Timers {
    fn cancel_attempt_timers(&mut self) {
        if let Some(handle) = self.connect_timeout.take() {
            handle.abort();
        }
        if let Some(handle) = self.reconnect.take() {
            handle.abort();
        }
    }

    fn cancel_all(&mut self) {
        self.cancel_attempt_timers();
        if let Some(handle) = self.lifecycle_listener.take() {
            handle.abort();
        }
    }
}

struct ControllerInner {
    transport: Arc<dyn Transport>,
    config: ConnectionConfig,
    sink: EventSink,
    state_tx: watch::Sender<ConnectionState>,
    timers: Mutex<Timers>,
    connecting: AtomicBool,
    /// Bumped per attempt and on every disconnect; an `open()` result from an
    /// older generation is stale
    attempt_generation: AtomicU64,
    shutdown_requested: AtomicBool,
}

/// Drives connect, timeout, reconnect and shutdown for one transport
#[derive(Clone)]
pub struct ConnectionController {
    inner: Arc<ControllerInner>,
}

impl ConnectionController {
    pub fn new(transport: Arc<dyn Transport>, config: ConnectionConfig, sink: EventSink) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(ControllerInner {
                transport,
                config,
                sink,
                state_tx,
                timers: Mutex::new(Timers::default()),
                connecting: AtomicBool::new(false),
                attempt_generation: AtomicU64::new(0),
                shutdown_requested: AtomicBool::new(false),
            }),
        }
    }

    /// Start a connect attempt.
    ///
    /// Does nothing while another attempt is in flight or after shutdown.
    /// Returns once the transport accepted or refused the open request, or
    /// after the connect timeout at the latest. Completion is reported
    /// through the event sink, not the return value.
    pub async fn connect(&self) {
        ControllerInner::attempt(&self.inner, false).await;
    }

    /// Stop reconnecting, cancel every timer, detach from the transport and
    /// close it if it is connected.
    pub async fn shutdown(&self) {
        self.inner.shutdown().await;
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Receiver that observes every state change
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown_requested.load(Ordering::SeqCst)
    }
}

impl ControllerInner {
    async fn attempt(this: &Arc<Self>, is_retry: bool) {
        if this.shutdown_requested.load(Ordering::SeqCst) {
            debug!("Shutdown requested, not connecting");
            return;
        }
        if this.connecting.swap(true, Ordering::SeqCst) {
            debug!("Connect attempt already in flight");
            return;
        }

        info!(
            "🔌 Connecting to switch{}",
            if is_retry { " (reconnect)" } else { "" }
        );
        let generation = this.attempt_generation.fetch_add(1, Ordering::SeqCst) + 1;
        this.set_state(ConnectionState::Connecting);
        Self::reattach_listener(this);
        Self::arm_connect_timeout(this);

        let timeout = this.config.connect_timeout;
        let opened = match tokio::time::timeout(timeout, this.transport.open()).await {
            Ok(opened) => opened,
            Err(_) => {
                debug!("open() still pending after {:?}, abandoning it", timeout);
                return;
            }
        };

        if let Err(e) = opened {
            if this.attempt_generation.load(Ordering::SeqCst) != generation {
                debug!("Ignoring open failure from superseded attempt: {}", e);
                return;
            }
            let code = if is_retry {
                ConnectionErrorCode::ReconnectError
            } else {
                ConnectionErrorCode::SocketError
            };
            this.report_error(code, e.to_string());
            Self::handle_disconnect(this);
        }
    }

    /// Replace the lifecycle subscription so repeated reconnects never stack
    /// listeners on the transport.
    fn reattach_listener(this: &Arc<Self>) {
        let mut rx = this.transport.lifecycle();
        let inner = Arc::clone(this);
        let listener = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => Self::on_lifecycle(&inner, event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Lifecycle listener lagged, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        if let Some(old) = this.timers.lock().lifecycle_listener.replace(listener) {
            old.abort();
        }
    }

    fn arm_connect_timeout(this: &Arc<Self>) {
        let inner = Arc::clone(this);
        let timeout = this.config.connect_timeout;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            // Drop our own handle so disconnect handling does not abort us
            inner.timers.lock().connect_timeout.take();
            if inner.connecting.load(Ordering::SeqCst) {
                inner.report_error(
                    ConnectionErrorCode::Timeout,
                    format!("Connection timed out after {:?}", timeout),
                );
                Self::handle_disconnect(&inner);
            }
        });

        if let Some(old) = this.timers.lock().connect_timeout.replace(handle) {
            old.abort();
        }
    }

    fn on_lifecycle(this: &Arc<Self>, event: LifecycleEvent) {
        match event {
            LifecycleEvent::Connected => {
                if let Some(handle) = this.timers.lock().connect_timeout.take() {
                    handle.abort();
                }
                this.connecting.store(false, Ordering::SeqCst);
                this.set_state(ConnectionState::Connected);
                info!("✅ Connected to switch");
                this.sink.emit(QueueMonitorEvent::Connected);
            }
            LifecycleEvent::Closed { reason } => {
                info!(
                    "🔌 Connection closed{}",
                    reason.map(|r| format!(": {}", r)).unwrap_or_default()
                );
                Self::handle_disconnect(this);
            }
            LifecycleEvent::InvalidCredentials => {
                this.report_error(
                    ConnectionErrorCode::InvalidCredentials,
                    "Switch rejected the configured credentials".to_string(),
                );
                Self::handle_disconnect(this);
            }
            LifecycleEvent::Error(message) => {
                this.report_error(ConnectionErrorCode::TransportError, message);
                Self::handle_disconnect(this);
            }
        }
    }

    fn handle_disconnect(this: &Arc<Self>) {
        this.attempt_generation.fetch_add(1, Ordering::SeqCst);
        this.timers.lock().cancel_attempt_timers();
        this.connecting.store(false, Ordering::SeqCst);
        this.set_state(ConnectionState::Disconnected);
        this.sink.emit(QueueMonitorEvent::Disconnected);

        if this.shutdown_requested.load(Ordering::SeqCst) {
            return;
        }

        let delay = this.config.reconnect_interval;
        info!("🔄 Reconnecting in {:?}", delay);
        this.set_state(ConnectionState::Reconnecting);
        this.sink.emit(QueueMonitorEvent::Reconnecting { delay });

        let inner = Arc::clone(this);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            Self::attempt(&inner, true).await;
        });
        this.timers.lock().reconnect = Some(handle);
    }

    async fn shutdown(&self) {
        if self.shutdown_requested.swap(true, Ordering::SeqCst) {
            debug!("Shutdown already requested");
            return;
        }
        info!("🛑 Shutting down switch connection");

        self.attempt_generation.fetch_add(1, Ordering::SeqCst);
        self.timers.lock().cancel_all();
        self.connecting.store(false, Ordering::SeqCst);

        if *self.state_tx.borrow() == ConnectionState::Connected {
            if let Err(e) = self.transport.close().await {
                self.report_error(ConnectionErrorCode::CleanupError, e.to_string());
            }
        }

        self.set_state(ConnectionState::Disconnected);
        self.sink.emit(QueueMonitorEvent::Disconnected);
    }

    fn report_error(&self, code: ConnectionErrorCode, message: String) {
        error!("❌ Connection error [{}]: {}", code, message);
        self.sink.emit(QueueMonitorEvent::ConnectionError { code, message });
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!("Connection state {} -> {}", previous, state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockTransport, OpenOutcome};
    use std::time::Duration;
    use tokio::time::sleep;

    fn controller(
        transport: Arc<MockTransport>,
    ) -> (ConnectionController, broadcast::Receiver<QueueMonitorEvent>) {
        let sink = EventSink::default();
        let rx = sink.subscribe();
        let config = ConnectionConfig {
            reconnect_interval: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
        };
        (ConnectionController::new(transport, config, sink), rx)
    }

    fn drain(rx: &mut broadcast::Receiver<QueueMonitorEvent>) -> Vec<QueueMonitorEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_success() {
        let transport = Arc::new(MockTransport::new());
        let (controller, mut rx) = controller(transport.clone());

        controller.connect().await;
        sleep(Duration::from_millis(1)).await;

        assert_eq!(controller.state(), ConnectionState::Connected);
        assert_eq!(drain(&mut rx), vec![QueueMonitorEvent::Connected]);

        // The timeout must not fire once connected
        sleep(Duration::from_secs(11)).await;
        assert!(drain(&mut rx).is_empty());
        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_then_reconnect() {
        let transport = Arc::new(MockTransport::new());
        transport.script_open([OpenOutcome::Hang]);
        let (controller, mut rx) = controller(transport.clone());

        controller.connect().await;
        assert_eq!(controller.state(), ConnectionState::Connecting);

        sleep(Duration::from_millis(10_001)).await;
        let events = drain(&mut rx);
        assert_eq!(
            events[0],
            QueueMonitorEvent::ConnectionError {
                code: ConnectionErrorCode::Timeout,
                message: "Connection timed out after 10s".to_string(),
            }
        );
        assert_eq!(events[1], QueueMonitorEvent::Disconnected);
        assert_eq!(
            events[2],
            QueueMonitorEvent::Reconnecting {
                delay: Duration::from_secs(5)
            }
        );
        assert_eq!(controller.state(), ConnectionState::Reconnecting);

        sleep(Duration::from_secs(5)).await;
        assert_eq!(transport.open_count(), 2);
        assert_eq!(controller.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_credentials_are_retried() {
        let transport = Arc::new(MockTransport::new());
        transport.script_open([OpenOutcome::RejectCredentials, OpenOutcome::RejectCredentials]);
        let (controller, mut rx) = controller(transport.clone());

        controller.connect().await;
        sleep(Duration::from_millis(1)).await;

        let events = drain(&mut rx);
        assert!(matches!(
            events[0],
            QueueMonitorEvent::ConnectionError {
                code: ConnectionErrorCode::InvalidCredentials,
                ..
            }
        ));
        assert_eq!(events[1], QueueMonitorEvent::Disconnected);

        sleep(Duration::from_secs(11)).await;
        assert_eq!(transport.open_count(), 3);
        assert!(controller.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_socket_failure_classification() {
        let transport = Arc::new(MockTransport::new());
        transport.script_open([
            OpenOutcome::Fail("refused".into()),
            OpenOutcome::Fail("refused".into()),
        ]);
        let (controller, mut rx) = controller(transport.clone());

        controller.connect().await;
        sleep(Duration::from_millis(5_001)).await;

        let codes: Vec<ConnectionErrorCode> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                QueueMonitorEvent::ConnectionError { code, .. } => Some(code),
                _ => None,
            })
            .collect();
        assert_eq!(
            codes,
            vec![ConnectionErrorCode::SocketError, ConnectionErrorCode::ReconnectError]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_loop_is_unbounded() {
        let transport = Arc::new(MockTransport::new());
        transport.set_default_open(OpenOutcome::Fail("down".into()));
        let (controller, _rx) = controller(transport.clone());

        controller.connect().await;
        sleep(Duration::from_secs(5 * 20 + 1)).await;

        assert_eq!(transport.open_count(), 21);
        // One lifecycle listener at a time no matter how many attempts
        assert_eq!(transport.lifecycle_subscribers(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_connection_reconnects_after_interval() {
        let transport = Arc::new(MockTransport::new());
        let (controller, mut rx) = controller(transport.clone());

        controller.connect().await;
        sleep(Duration::from_millis(1)).await;
        drain(&mut rx);

        transport.drop_connection("peer reset");
        sleep(Duration::from_millis(1)).await;
        assert_eq!(
            drain(&mut rx),
            vec![
                QueueMonitorEvent::Disconnected,
                QueueMonitorEvent::Reconnecting {
                    delay: Duration::from_secs(5)
                }
            ]
        );

        sleep(Duration::from_millis(4_990)).await;
        assert_eq!(transport.open_count(), 1);
        sleep(Duration::from_millis(20)).await;
        assert_eq!(transport.open_count(), 2);
        assert!(controller.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_classified() {
        let transport = Arc::new(MockTransport::new());
        let (controller, mut rx) = controller(transport.clone());

        controller.connect().await;
        sleep(Duration::from_millis(1)).await;
        drain(&mut rx);

        transport.emit_error("protocol violation");
        sleep(Duration::from_millis(1)).await;
        assert_eq!(
            drain(&mut rx)[0],
            QueueMonitorEvent::ConnectionError {
                code: ConnectionErrorCode::TransportError,
                message: "protocol violation".to_string(),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_noop_while_in_flight() {
        let transport = Arc::new(MockTransport::new());
        transport.script_open([OpenOutcome::Hang]);
        let (controller, _rx) = controller(transport.clone());

        controller.connect().await;
        controller.connect().await;
        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_everything() {
        let transport = Arc::new(MockTransport::new());
        let (controller, mut rx) = controller(transport.clone());

        controller.connect().await;
        sleep(Duration::from_millis(1)).await;
        drain(&mut rx);

        controller.shutdown().await;
        assert_eq!(controller.state(), ConnectionState::Disconnected);
        assert_eq!(transport.close_count(), 1);
        assert!(!transport.is_open());
        assert_eq!(drain(&mut rx), vec![QueueMonitorEvent::Disconnected]);

        // Detached: a late close from the transport changes nothing
        transport.drop_connection("late");
        sleep(Duration::from_secs(30)).await;
        assert!(drain(&mut rx).is_empty());
        assert_eq!(transport.open_count(), 1);
        assert_eq!(transport.lifecycle_subscribers(), 0);

        controller.connect().await;
        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_reconnect_wait() {
        let transport = Arc::new(MockTransport::new());
        transport.script_open([OpenOutcome::Fail("refused".into())]);
        let (controller, _rx) = controller(transport.clone());

        controller.connect().await;
        assert_eq!(controller.state(), ConnectionState::Reconnecting);

        controller.shutdown().await;
        sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.open_count(), 1);
        // Never connected, so nothing to close
        assert_eq!(transport.close_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_failure_reported_as_cleanup_error() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_close("broken pipe");
        let (controller, mut rx) = controller(transport.clone());

        controller.connect().await;
        sleep(Duration::from_millis(1)).await;
        drain(&mut rx);

        controller.shutdown().await;
        let events = drain(&mut rx);
        assert!(matches!(
            events[0],
            QueueMonitorEvent::ConnectionError {
                code: ConnectionErrorCode::CleanupError,
                ..
            }
        ));
        assert_eq!(events[1], QueueMonitorEvent::Disconnected);
    }

    fn error_codes(events: &[QueueMonitorEvent]) -> Vec<ConnectionErrorCode> {
        events
            .iter()
            .filter_map(|e| match e {
                QueueMonitorEvent::ConnectionError { code, .. } => Some(*code),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_open_failure_after_reconnect_is_ignored() {
        let transport = Arc::new(MockTransport::new());
        transport.script_open([OpenOutcome::FailAfter {
            delay: Duration::from_secs(20),
            message: "connection refused".into(),
        }]);
        let (controller, mut rx) = controller(transport.clone());

        let started = tokio::time::Instant::now();
        controller.connect().await;
        assert!(started.elapsed() < Duration::from_secs(11));

        // Timed out at 10s, reconnected at 15s
        sleep(Duration::from_millis(5_100)).await;
        assert_eq!(controller.state(), ConnectionState::Connected);

        // The abandoned first open would have failed at 20s
        sleep(Duration::from_secs(5)).await;
        assert_eq!(controller.state(), ConnectionState::Connected);
        assert_eq!(transport.open_count(), 2);
        assert_eq!(error_codes(&drain(&mut rx)), vec![ConnectionErrorCode::Timeout]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_failure_after_disconnect_is_not_reported_twice() {
        let transport = Arc::new(MockTransport::new());
        transport.script_open([OpenOutcome::FailAfter {
            delay: Duration::from_secs(1),
            message: "connection refused".into(),
        }]);
        let (controller, mut rx) = controller(transport.clone());

        let connecting = controller.clone();
        tokio::spawn(async move { connecting.connect().await });
        sleep(Duration::from_millis(500)).await;
        transport.emit_error("handshake aborted");
        sleep(Duration::from_secs(1)).await;

        let events = drain(&mut rx);
        assert_eq!(error_codes(&events), vec![ConnectionErrorCode::TransportError]);
        let disconnects = events
            .iter()
            .filter(|e| **e == QueueMonitorEvent::Disconnected)
            .count();
        assert_eq!(disconnects, 1);
        assert_eq!(controller.state(), ConnectionState::Reconnecting);

        sleep(Duration::from_millis(4_100)).await;
        assert_eq!(controller.state(), ConnectionState::Connected);
        assert_eq!(transport.open_count(), 2);
    }
}
