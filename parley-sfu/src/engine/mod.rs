//! Routing engine facade
//!
//! The session coordinator never talks to the media plane directly. It goes
//! through these traits, which cover exactly what session management needs:
//! creating transports on the shared router, completing DTLS, producing,
//! consuming (with a capability check first), resuming and closing.
//!
//! Codec-level payloads (RTP capabilities, RTP parameters, DTLS parameters)
//! are carried as opaque JSON. Their meaning belongs to the engine.

pub mod loopback;
#[cfg(feature = "mediasoup")]
pub mod mediasoup_engine;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::EngineError;
use crate::types::{ConsumerId, MediaKind, ProducerId, TransportId, TransportRole};

pub use loopback::LoopbackEngine;
#[cfg(feature = "mediasoup")]
pub use mediasoup_engine::MediasoupEngine;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// RTP capabilities of the router or of a consuming peer
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RtpCapabilities(pub serde_json::Value);

/// RTP parameters of a producer or consumer
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RtpParameters(pub serde_json::Value);

/// Remote DTLS parameters sent by a peer to complete a transport
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DtlsParameters(pub serde_json::Value);

/// Everything a peer needs to finish negotiating a transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportNegotiation {
    pub id: TransportId,
    pub ice_parameters: serde_json::Value,
    pub ice_candidates: serde_json::Value,
    pub dtls_parameters: serde_json::Value,
}

/// Router-level capabilities
#[async_trait]
pub trait RoutingEngine: Send + Sync {
    /// Router RTP capabilities, or `None` while the router is still initializing
    fn router_capabilities(&self) -> Option<RtpCapabilities>;

    /// Create a transport bound to the shared router
    async fn create_transport(&self, role: TransportRole) -> EngineResult<Arc<dyn TransportHandle>>;

    /// Whether a peer with `capabilities` can decode the producer's stream
    fn can_consume(&self, producer_id: &ProducerId, capabilities: &RtpCapabilities) -> bool;
}

/// A live transport inside the engine
#[async_trait]
pub trait TransportHandle: Send + Sync {
    fn id(&self) -> TransportId;

    fn negotiation(&self) -> EngineResult<TransportNegotiation>;

    async fn connect(&self, dtls_parameters: DtlsParameters) -> EngineResult<()>;

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> EngineResult<Arc<dyn ProducerHandle>>;

    /// Create a consumer for `producer_id`. Consumers always start paused.
    async fn consume(
        &self,
        producer_id: &ProducerId,
        capabilities: RtpCapabilities,
    ) -> EngineResult<Arc<dyn ConsumerHandle>>;

    async fn close(&self) -> EngineResult<()>;
}

/// A live producer inside the engine
#[async_trait]
pub trait ProducerHandle: Send + Sync {
    fn id(&self) -> ProducerId;

    fn kind(&self) -> MediaKind;

    async fn close(&self) -> EngineResult<()>;
}

/// A live consumer inside the engine
#[async_trait]
pub trait ConsumerHandle: Send + Sync {
    fn id(&self) -> ConsumerId;

    fn kind(&self) -> MediaKind;

    fn producer_id(&self) -> ProducerId;

    fn rtp_parameters(&self) -> RtpParameters;

    fn paused(&self) -> bool;

    async fn resume(&self) -> EngineResult<()>;

    async fn close(&self) -> EngineResult<()>;
}
