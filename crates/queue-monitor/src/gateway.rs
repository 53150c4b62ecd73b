use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::CommandError;
use crate::transport::{Action, ActionResponse, Transport};
use crate::types::ConnectionState;

/// Request/response wrapper over the transport for outbound actions.
///
/// Refuses to send unless the connection is `Connected` and bounds every
/// round-trip with a timeout.
#[derive(Clone)]
pub struct CommandGateway {
    transport: Arc<dyn Transport>,
    state: watch::Receiver<ConnectionState>,
    default_timeout: Duration,
}

impl CommandGateway {
    pub fn new(
        transport: Arc<dyn Transport>,
        state: watch::Receiver<ConnectionState>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            state,
            default_timeout,
        }
    }

    /// Send with the configured default timeout
    pub async fn send(&self, action: Action) -> Result<ActionResponse, CommandError> {
        self.send_with_timeout(action, self.default_timeout).await
    }

    pub async fn send_with_timeout(
        &self,
        action: Action,
        timeout: Duration,
    ) -> Result<ActionResponse, CommandError> {
        let state = *self.state.borrow();
        if state != ConnectionState::Connected {
            debug!("Refusing {} while {}", action.name, state);
            return Err(CommandError::NotConnected);
        }

        let name = action.name.clone();
        debug!("📤 Sending {}", name);

        let response = match tokio::time::timeout(timeout, self.transport.send(action)).await {
            Err(_) => {
                warn!("⏰ {} timed out after {:?}", name, timeout);
                return Err(CommandError::Timeout(timeout));
            }
            Ok(Err(e)) => return Err(CommandError::Transport(e.to_string())),
            Ok(Ok(None)) => return Err(CommandError::InvalidResponse),
            Ok(Ok(Some(response))) => response,
        };

        if response.is_error() {
            let message = response
                .message
                .clone()
                .unwrap_or_else(|| format!("{} failed", name));
            return Err(CommandError::RemoteError(message));
        }

        debug!("📥 {} -> {}", name, response.response);
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockTransport, Reply};

    fn gateway(
        transport: Arc<MockTransport>,
        state: ConnectionState,
    ) -> (CommandGateway, watch::Sender<ConnectionState>) {
        let (tx, rx) = watch::channel(state);
        (CommandGateway::new(transport, rx, Duration::from_secs(5)), tx)
    }

    #[tokio::test]
    async fn test_not_connected_fails_fast() {
        let transport = Arc::new(MockTransport::new());
        let (gateway, _tx) = gateway(transport.clone(), ConnectionState::Reconnecting);

        let err = gateway.send(Action::queue_status()).await.unwrap_err();
        assert_eq!(err, CommandError::NotConnected);
        assert!(transport.sent_actions().is_empty());
    }

    #[tokio::test]
    async fn test_success_passes_response_through() {
        let transport = Arc::new(MockTransport::new());
        let (gateway, _tx) = gateway(transport.clone(), ConnectionState::Connected);

        let response = gateway.send(Action::queue_remove("q", "SIP/1")).await.unwrap();
        assert!(response.is_success());
        assert_eq!(transport.sent_count("QueueRemove"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let transport = Arc::new(MockTransport::new());
        transport.set_reply("QueuePause", Reply::Never);
        let (gateway, _tx) = gateway(transport.clone(), ConnectionState::Connected);

        let err = gateway
            .send_with_timeout(
                Action::queue_pause("SIP/1", true, None, None),
                Duration::from_millis(1000),
            )
            .await
            .unwrap_err();
        assert_eq!(err, CommandError::Timeout(Duration::from_millis(1000)));
    }

    #[tokio::test]
    async fn test_empty_and_error_responses() {
        let transport = Arc::new(MockTransport::new());
        let (gateway, _tx) = gateway(transport.clone(), ConnectionState::Connected);

        transport.set_reply("QueueAdd", Reply::Empty);
        let err = gateway
            .send(Action::queue_add("q", "SIP/1", &Default::default()))
            .await
            .unwrap_err();
        assert_eq!(err, CommandError::InvalidResponse);

        transport.set_reply(
            "QueueAdd",
            Reply::Respond(ActionResponse::error("Unable to add interface")),
        );
        let err = gateway
            .send(Action::queue_add("q", "SIP/1", &Default::default()))
            .await
            .unwrap_err();
        assert_eq!(err, CommandError::RemoteError("Unable to add interface".to_string()));

        transport.set_reply("QueueAdd", Reply::Fail("socket closed".into()));
        let err = gateway
            .send(Action::queue_add("q", "SIP/1", &Default::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Transport(_)));
    }

    #[tokio::test]
    async fn test_tracks_state_changes() {
        let transport = Arc::new(MockTransport::new());
        let (gateway, tx) = gateway(transport, ConnectionState::Connecting);

        assert_eq!(
            gateway.send(Action::queue_status()).await.unwrap_err(),
            CommandError::NotConnected
        );
        tx.send_replace(ConnectionState::Connected);
        assert!(gateway.send(Action::queue_status()).await.is_ok());
    }
}
