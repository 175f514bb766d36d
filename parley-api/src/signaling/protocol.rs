//! Signaling wire format
//!
//! Peers send `{"id": n, "event": "...", "data": {...}}` text frames. A frame
//! carrying an `id` is answered with `{"id": n, "ok": true, "data": ...}` or
//! `{"id": n, "ok": false, "error": {"code": "...", "message": "..."}}`.
//! Server-initiated messages are `{"event": "...", "data": {...}}`.

use parley_sfu::{
    ConnectionId, ConsumerId, DtlsParameters, MediaKind, ProducerId, RtpCapabilities,
    RtpParameters, SessionEvent, TransportId, TransportRole,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Event names used on the wire
pub mod events {
    pub const GET_ROUTER_RTP_CAPABILITIES: &str = "getRouterRtpCapabilities";
    pub const CREATE_TRANSPORT: &str = "createTransport";
    pub const CONNECT_TRANSPORT: &str = "connectTransport";
    pub const PRODUCE: &str = "produce";
    pub const GET_PRODUCERS: &str = "getProducers";
    pub const CONSUME: &str = "consume";
    pub const RESUME_CONSUMER: &str = "resumeConsumer";
    pub const SET_PEER_INFO: &str = "setPeerInfo";
    pub const GET_PEERS: &str = "getPeers";
    pub const PRODUCER_CLOSED: &str = "producerClosed";
    pub const SEND_MESSAGE: &str = "sendMessage";
    pub const SEND_REACTION: &str = "sendReaction";
    pub const FOCUS_MODE_CHANGE: &str = "focusModeChange";

    pub const NEW_PRODUCER: &str = "newProducer";
    pub const NEW_MESSAGE: &str = "newMessage";
    pub const NEW_REACTION: &str = "newReaction";
    pub const PLAYER_FOCUS_MODE_CHANGED: &str = "playerFocusModeChanged";
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unknown event: {0}")]
    UnknownEvent(String),
}

impl ProtocolError {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "BAD_REQUEST",
            Self::UnknownEvent(_) => "UNKNOWN_EVENT",
        }
    }
}

/// Raw inbound frame, before the payload is interpreted
#[derive(Debug, Clone, Deserialize)]
pub struct ClientFrame {
    #[serde(default)]
    pub id: Option<u64>,
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl ClientFrame {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Interpret the payload according to the event name
    pub fn request(&self) -> Result<ClientRequest, ProtocolError> {
        ClientRequest::from_event(&self.event, self.data.clone())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateTransportData {
    #[serde(default, rename = "type")]
    pub role: TransportRole,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTransportData {
    pub transport_id: TransportId,
    pub dtls_parameters: DtlsParameters,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceData {
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    #[serde(default)]
    pub transport_id: Option<TransportId>,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeData {
    pub producer_id: ProducerId,
    pub rtp_capabilities: RtpCapabilities,
    #[serde(default)]
    pub transport_id: Option<TransportId>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeConsumerData {
    pub consumer_id: ConsumerId,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetPeerInfoData {
    pub name: String,
    #[serde(default)]
    pub is_in_focus_mode: Option<bool>,
}

/// A chat message as sent by a peer; every field may be missing
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageDraft {
    pub content: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub message_type: Option<String>,
    pub gif_url: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusModeChangeData {
    pub player_id: String,
    pub is_in_focus_mode: bool,
}

/// A decoded inbound request
#[derive(Debug, Clone)]
pub enum ClientRequest {
    GetRouterRtpCapabilities,
    CreateTransport(CreateTransportData),
    ConnectTransport(ConnectTransportData),
    Produce(ProduceData),
    GetProducers,
    Consume(ConsumeData),
    ResumeConsumer(ResumeConsumerData),
    SetPeerInfo(SetPeerInfoData),
    GetPeers,
    ProducerClosed(Value),
    SendMessage(ChatMessageDraft),
    SendReaction(Value),
    FocusModeChange(FocusModeChangeData),
}

/// Missing or null payloads decode as an empty object
fn payload<T: serde::de::DeserializeOwned>(data: Value) -> Result<T, ProtocolError> {
    let data = if data.is_null() { json!({}) } else { data };
    Ok(serde_json::from_value(data)?)
}

impl ClientRequest {
    pub fn from_event(event: &str, data: Value) -> Result<Self, ProtocolError> {
        let request = match event {
            events::GET_ROUTER_RTP_CAPABILITIES => Self::GetRouterRtpCapabilities,
            events::CREATE_TRANSPORT => Self::CreateTransport(payload(data)?),
            events::CONNECT_TRANSPORT => Self::ConnectTransport(payload(data)?),
            events::PRODUCE => Self::Produce(payload(data)?),
            events::GET_PRODUCERS => Self::GetProducers,
            events::CONSUME => Self::Consume(payload(data)?),
            events::RESUME_CONSUMER => Self::ResumeConsumer(payload(data)?),
            events::SET_PEER_INFO => Self::SetPeerInfo(payload(data)?),
            events::GET_PEERS => Self::GetPeers,
            events::PRODUCER_CLOSED => Self::ProducerClosed(data),
            events::SEND_MESSAGE => Self::SendMessage(payload(data)?),
            events::SEND_REACTION => Self::SendReaction(data),
            events::FOCUS_MODE_CHANGE => Self::FocusModeChange(payload(data)?),
            other => return Err(ProtocolError::UnknownEvent(other.to_string())),
        };
        Ok(request)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Any frame the server writes to a peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Response {
        id: u64,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<ErrorBody>,
    },
    Event {
        event: String,
        data: Value,
    },
}

impl ServerMessage {
    #[must_use]
    pub const fn ok(id: u64, data: Value) -> Self {
        Self::Response {
            id,
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(id: u64, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Response {
            id,
            ok: false,
            data: None,
            error: Some(ErrorBody {
                code: code.into(),
                message: message.into(),
            }),
        }
    }

    pub fn event(event: impl Into<String>, data: Value) -> Self {
        Self::Event {
            event: event.into(),
            data,
        }
    }

    /// Wire form of a coordinator broadcast
    #[must_use]
    pub fn from_session_event(event: &SessionEvent) -> Self {
        match event {
            SessionEvent::ProducerAvailable {
                producer_id,
                kind,
                source,
                connection_id,
            } => Self::event(
                events::NEW_PRODUCER,
                json!({
                    "producerId": producer_id,
                    "kind": kind,
                    "source": source,
                    "socketId": connection_id,
                }),
            ),
            SessionEvent::ProducerClosed { producer_id } => Self::event(
                events::PRODUCER_CLOSED,
                json!({ "producerId": producer_id }),
            ),
            SessionEvent::PeerProducerClosed { data, .. } => {
                Self::event(events::PRODUCER_CLOSED, data.clone())
            }
        }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A completed chat message as relayed to everyone
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub content: String,
    pub sender_socket_id: ConnectionId,
    pub name: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gif_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}
