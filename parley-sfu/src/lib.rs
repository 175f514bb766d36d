//! Parley SFU session core
//!
//! Tracks, per connected peer, which transports, producers and consumers
//! exist, mediates their creation against a shared media router, and tears
//! them down in a safe order when the peer leaves.
//!
//! ## Architecture
//!
//! - **`SessionCoordinator`**: owns the registries and the routing engine; the
//!   create/connect/produce/consume/teardown protocol lives here
//! - **Registries**: keyed stores with reverse lookup by owner, one per resource kind
//! - **`RoutingEngine`**: facade over the media plane. `LoopbackEngine` runs
//!   in-process; `MediasoupEngine` (feature `mediasoup`) drives a native worker
//! - **Notifications**: every operation returns the broadcasts it caused
//!   instead of sending them itself
//!
//! ## Usage
//!
//! ```rust,ignore
//! use parley_sfu::{LoopbackEngine, SessionCoordinator, SfuConfig};
//!
//! let config = SfuConfig::default();
//! let engine = Arc::new(LoopbackEngine::new(&config));
//! let coordinator = SessionCoordinator::new(engine, config);
//!
//! coordinator.register_connection(&connection_id)?;
//! let transport = coordinator.create_transport(&connection_id, TransportRole::Send).await?;
//! ```

mod config;
mod coordinator;
pub mod engine;
mod error;
mod notification;
pub mod registry;
mod types;

pub use config::{EngineKind, SfuConfig};
pub use coordinator::{
    ConsumeOutcome, ConsumeRequest, ConsumerInfo, ProduceRequest, SessionCoordinator,
    SessionStats, TeardownReport,
};
pub use engine::{
    DtlsParameters, LoopbackEngine, RoutingEngine, RtpCapabilities, RtpParameters,
    TransportNegotiation,
};
#[cfg(feature = "mediasoup")]
pub use engine::MediasoupEngine;
pub use error::{EngineError, Result, SfuError};
pub use notification::{Audience, Notification, Outcome, SessionEvent};
pub use registry::{AvailableProducer, ConnectionInfo};
pub use types::{
    ConnectionId, ConsumerId, MediaKind, ProducerId, TransportId, TransportRole, TransportState,
};
