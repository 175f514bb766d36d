//! Maps inbound signaling requests onto the session coordinator
//!
//! The dispatcher owns no session state. It decodes a frame, runs the
//! matching coordinator operation, answers the requesting peer and fans out
//! whatever notifications the operation produced.

use parley_sfu::{
    Audience, ConnectionId, ConsumeOutcome, ConsumeRequest, ProduceRequest, SessionCoordinator,
    SfuError, TeardownReport,
};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::hub::PeerHub;
use super::protocol::{events, ClientFrame, ClientRequest, ProtocolError, ServerMessage};
use crate::relay;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Session(#[from] SfuError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
}

impl DispatchError {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Session(err) => err.code(),
            Self::Protocol(err) => err.code(),
            Self::Encode(_) => "INTERNAL_ERROR",
        }
    }
}

type DispatchResult = Result<Value, DispatchError>;

#[derive(Clone)]
pub struct SignalingDispatcher {
    coordinator: Arc<SessionCoordinator>,
    hub: PeerHub,
}

impl SignalingDispatcher {
    #[must_use]
    pub const fn new(coordinator: Arc<SessionCoordinator>, hub: PeerHub) -> Self {
        Self { coordinator, hub }
    }

    #[must_use]
    pub const fn coordinator(&self) -> &Arc<SessionCoordinator> {
        &self.coordinator
    }

    #[must_use]
    pub const fn hub(&self) -> &PeerHub {
        &self.hub
    }

    /// Register a freshly opened socket. The receiver feeds its writer.
    pub fn connect(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<mpsc::UnboundedReceiver<ServerMessage>, SfuError> {
        self.coordinator.register_connection(connection_id)?;
        Ok(self.hub.subscribe(connection_id.clone()))
    }

    /// Tear down everything a closed socket owned and tell the others
    pub async fn disconnect(&self, connection_id: &ConnectionId) -> TeardownReport {
        self.hub.unsubscribe(connection_id);
        let outcome = self.coordinator.teardown_connection(connection_id).await;
        self.hub.deliver_all(&outcome.notifications);
        outcome.value
    }

    /// Disconnect every remaining connection
    pub async fn disconnect_all(&self) {
        for connection_id in self.coordinator.connection_ids() {
            self.disconnect(&connection_id).await;
        }
    }

    /// Handle one inbound text frame from `connection_id`
    pub async fn handle_text(&self, connection_id: &ConnectionId, text: &str) {
        let Ok(raw) = serde_json::from_str::<Value>(text) else {
            warn!(connection_id = %connection_id, "Dropping frame that is not JSON");
            return;
        };
        let request_id = raw.get("id").and_then(Value::as_u64);

        let result = match serde_json::from_value::<ClientFrame>(raw) {
            Ok(frame) => {
                debug!(connection_id = %connection_id, event = %frame.event, "Signaling request");
                match frame.request() {
                    Ok(request) => self.handle_request(connection_id, request).await,
                    Err(err) => Err(err.into()),
                }
            }
            Err(err) => Err(ProtocolError::Malformed(err).into()),
        };

        match (request_id, result) {
            (Some(id), Ok(data)) => {
                self.hub.send_to(connection_id, ServerMessage::ok(id, data));
            }
            (Some(id), Err(err)) => {
                debug!(connection_id = %connection_id, code = err.code(), error = %err, "Request failed");
                self.hub
                    .send_to(connection_id, ServerMessage::failure(id, err.code(), err.to_string()));
            }
            (None, Ok(_)) => {}
            (None, Err(err)) => {
                warn!(
                    connection_id = %connection_id,
                    code = err.code(),
                    error = %err,
                    "Request without id failed"
                );
            }
        }
    }

    /// Run one decoded request and produce its response payload
    pub async fn handle_request(&self, connection_id: &ConnectionId, request: ClientRequest) -> DispatchResult {
        match request {
            ClientRequest::GetRouterRtpCapabilities => {
                Ok(serde_json::to_value(self.coordinator.router_capabilities()?)?)
            }

            ClientRequest::CreateTransport(data) => {
                let negotiation = self
                    .coordinator
                    .create_transport(connection_id, data.role)
                    .await?;
                Ok(serde_json::to_value(negotiation)?)
            }

            ClientRequest::ConnectTransport(data) => {
                self.coordinator
                    .connect_transport(connection_id, &data.transport_id, data.dtls_parameters)
                    .await?;
                Ok(Value::Null)
            }

            ClientRequest::Produce(data) => {
                let request = ProduceRequest {
                    transport_id: data.transport_id,
                    kind: data.kind,
                    rtp_parameters: data.rtp_parameters,
                    source: data.source,
                };
                let outcome = self.coordinator.produce(connection_id, request).await?;
                self.hub.deliver_all(&outcome.notifications);
                Ok(json!({ "id": outcome.value }))
            }

            ClientRequest::GetProducers => {
                let producers: Vec<Value> = self
                    .coordinator
                    .list_available_producers(connection_id)
                    .into_iter()
                    .map(|producer| {
                        json!({
                            "producerId": producer.producer_id,
                            "kind": producer.kind,
                            "source": producer.source,
                            "socketId": producer.connection_id,
                        })
                    })
                    .collect();
                Ok(Value::Array(producers))
            }

            ClientRequest::Consume(data) => {
                let request = ConsumeRequest {
                    producer_id: data.producer_id,
                    rtp_capabilities: data.rtp_capabilities,
                    transport_id: data.transport_id,
                };
                match self.coordinator.consume(connection_id, request).await? {
                    ConsumeOutcome::Created(info) => Ok(serde_json::to_value(info)?),
                    ConsumeOutcome::IncompatibleCapabilities { .. } => {
                        Ok(json!({ "error": "Cannot consume" }))
                    }
                }
            }

            ClientRequest::ResumeConsumer(data) => {
                self.coordinator
                    .resume_consumer(connection_id, &data.consumer_id)
                    .await?;
                Ok(Value::Null)
            }

            ClientRequest::SetPeerInfo(data) => {
                self.coordinator
                    .set_peer_info(connection_id, data.name, data.is_in_focus_mode)?;
                Ok(Value::Null)
            }

            ClientRequest::GetPeers => {
                let peers: Vec<Value> = self
                    .coordinator
                    .list_connections()
                    .into_iter()
                    .map(|peer| {
                        json!({
                            "socketId": peer.id,
                            "name": peer.display_name,
                            "isInFocusMode": peer.focus_mode,
                            "connectedAt": peer.connected_at,
                        })
                    })
                    .collect();
                Ok(Value::Array(peers))
            }

            ClientRequest::ProducerClosed(data) => {
                let outcome = self
                    .coordinator
                    .notify_producer_closed_by_peer(connection_id, data);
                self.hub.deliver_all(&outcome.notifications);
                Ok(Value::Null)
            }

            ClientRequest::SendMessage(draft) => {
                let message = relay::chat_message(connection_id, draft)?;
                self.hub.broadcast(&Audience::Everyone, &message);
                Ok(Value::Null)
            }

            ClientRequest::SendReaction(data) => {
                debug!(connection_id = %connection_id, event = events::SEND_REACTION, "Relaying reaction");
                self.hub.broadcast(&Audience::Everyone, &relay::reaction(data));
                Ok(Value::Null)
            }

            ClientRequest::FocusModeChange(change) => {
                self.coordinator
                    .set_focus_mode(connection_id, change.is_in_focus_mode)?;
                self.hub.broadcast(
                    &Audience::Everyone,
                    &relay::focus_mode_changed(connection_id, &change),
                );
                Ok(Value::Null)
            }
        }
    }
}
