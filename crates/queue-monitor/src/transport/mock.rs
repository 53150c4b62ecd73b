//! Scriptable in-memory transport
//!
//! Used by the crate's tests and the `mock_monitor` demo. Each call to
//! `open` consumes the next scripted [`OpenOutcome`] (falling back to the
//! default), and each `send` answers from the reply table keyed by action
//! name.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::{Action, ActionResponse, LifecycleEvent, RawEvent, Transport};
use crate::error::TransportError;

/// What happens when the monitor calls `open`
#[derive(Debug, Clone, PartialEq)]
pub enum OpenOutcome {
    /// Report `Connected`
    Connect,
    /// Report `InvalidCredentials`
    RejectCredentials,
    /// Accept the call but never report anything
    Hang,
    /// Fail the call itself
    Fail(String),
    /// Sit on the call for `delay`, then fail it
    FailAfter { delay: Duration, message: String },
}

/// How the transport answers an action
#[derive(Debug, Clone)]
pub enum Reply {
    Respond(ActionResponse),
    /// Respond only after `delay`
    Delayed(Duration, ActionResponse),
    /// Resolve with no response at all
    Empty,
    /// Never resolve
    Never,
    /// Fail to deliver the action
    Fail(String),
}

pub struct MockTransport {
    lifecycle_tx: broadcast::Sender<LifecycleEvent>,
    events_tx: broadcast::Sender<RawEvent>,
    open_script: Mutex<VecDeque<OpenOutcome>>,
    default_open: Mutex<OpenOutcome>,
    replies: Mutex<HashMap<String, Reply>>,
    close_failure: Mutex<Option<String>>,
    sent: Mutex<Vec<Action>>,
    open_calls: AtomicUsize,
    close_calls: AtomicUsize,
    is_open: AtomicBool,
}

impl MockTransport {
    /// A transport that connects on every `open` and answers `Success`
    pub fn new() -> Self {
        let (lifecycle_tx, _) = broadcast::channel(64);
        let (events_tx, _) = broadcast::channel(1024);
        Self {
            lifecycle_tx,
            events_tx,
            open_script: Mutex::new(VecDeque::new()),
            default_open: Mutex::new(OpenOutcome::Connect),
            replies: Mutex::new(HashMap::new()),
            close_failure: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            open_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
            is_open: AtomicBool::new(false),
        }
    }

    /// Queue outcomes for the next `open` calls, in order
    pub fn script_open(&self, outcomes: impl IntoIterator<Item = OpenOutcome>) {
        self.open_script.lock().extend(outcomes);
    }

    /// Outcome used once the script is exhausted
    pub fn set_default_open(&self, outcome: OpenOutcome) {
        *self.default_open.lock() = outcome;
    }

    /// Answer every action named `action` with `reply`
    pub fn set_reply(&self, action: &str, reply: Reply) {
        self.replies.lock().insert(action.to_ascii_lowercase(), reply);
    }

    pub fn fail_close(&self, message: impl Into<String>) {
        *self.close_failure.lock() = Some(message.into());
    }

    /// Deliver a raw event to every subscriber
    pub fn emit_event(&self, event: RawEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Simulate the switch dropping the connection
    pub fn drop_connection(&self, reason: &str) {
        self.is_open.store(false, Ordering::SeqCst);
        let _ = self.lifecycle_tx.send(LifecycleEvent::Closed {
            reason: Some(reason.to_string()),
        });
    }

    pub fn emit_error(&self, message: &str) {
        let _ = self.lifecycle_tx.send(LifecycleEvent::Error(message.to_string()));
    }

    pub fn sent_actions(&self) -> Vec<Action> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self, action: &str) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|a| a.name.eq_ignore_ascii_case(action))
            .count()
    }

    pub fn open_count(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Whether the last `open` connected and nothing closed it since
    pub fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }

    /// Number of live lifecycle subscriptions
    pub fn lifecycle_subscribers(&self) -> usize {
        self.lifecycle_tx.receiver_count()
    }

    /// Number of live raw-event subscriptions
    pub fn event_subscribers(&self) -> usize {
        self.events_tx.receiver_count()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self) -> Result<(), TransportError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .open_script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_open.lock().clone());

        match outcome {
            OpenOutcome::Connect => {
                self.is_open.store(true, Ordering::SeqCst);
                let _ = self.lifecycle_tx.send(LifecycleEvent::Connected);
                Ok(())
            }
            OpenOutcome::RejectCredentials => {
                let _ = self.lifecycle_tx.send(LifecycleEvent::InvalidCredentials);
                Ok(())
            }
            OpenOutcome::Hang => Ok(()),
            OpenOutcome::Fail(message) => Err(TransportError::Socket(message)),
            OpenOutcome::FailAfter { delay, message } => {
                tokio::time::sleep(delay).await;
                Err(TransportError::Socket(message))
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.is_open.store(false, Ordering::SeqCst);
        match self.close_failure.lock().clone() {
            Some(message) => Err(TransportError::Close(message)),
            None => Ok(()),
        }
    }

    async fn send(&self, action: Action) -> Result<Option<ActionResponse>, TransportError> {
        let reply = self
            .replies
            .lock()
            .get(&action.name.to_ascii_lowercase())
            .cloned()
            .unwrap_or_else(|| Reply::Respond(ActionResponse::success()));
        self.sent.lock().push(action);

        match reply {
            Reply::Respond(response) => Ok(Some(response)),
            Reply::Delayed(delay, response) => {
                tokio::time::sleep(delay).await;
                Ok(Some(response))
            }
            Reply::Empty => Ok(None),
            Reply::Never => std::future::pending().await,
            Reply::Fail(message) => Err(TransportError::Send(message)),
        }
    }

    fn lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle_tx.subscribe()
    }

    fn events(&self) -> broadcast::Receiver<RawEvent> {
        self.events_tx.subscribe()
    }
}
