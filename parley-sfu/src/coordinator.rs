//! Session coordinator - owns the registries and drives the engine
//!
//! This module provides:
//! - Connection registration and peer metadata
//! - Transport creation and DTLS completion
//! - Producer and consumer creation with capability checks
//! - Ordered, idempotent teardown of everything a connection owns
//!
//! All registries sit behind one mutex that is never held across an engine
//! call. Every operation that suspends on the engine re-validates what it
//! looked up before suspending and closes whatever it created if that state
//! is gone.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::SfuConfig;
use crate::engine::{
    DtlsParameters, EngineResult, RoutingEngine, RtpCapabilities, RtpParameters,
    TransportNegotiation,
};
use crate::error::{EngineError, Result, SfuError};
use crate::notification::{Audience, Notification, Outcome, SessionEvent};
use crate::registry::{
    AvailableProducer, Connection, ConnectionInfo, ConnectionRegistry, ConsumerEntry,
    ConsumerRegistry, ProducerEntry, ProducerRegistry, TransportEntry, TransportRegistry,
    TransportSelection,
};
use crate::types::{
    ConnectionId, ConsumerId, MediaKind, ProducerId, TransportId, TransportRole, TransportState,
};

/// Parameters of a produce request
#[derive(Debug, Clone)]
pub struct ProduceRequest {
    /// Transport to publish on; the connection's oldest transport when absent
    pub transport_id: Option<TransportId>,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub source: Option<String>,
}

/// Parameters of a consume request
#[derive(Debug, Clone)]
pub struct ConsumeRequest {
    pub producer_id: ProducerId,
    pub rtp_capabilities: RtpCapabilities,
    /// Transport to receive on; the connection's newest transport when absent
    pub transport_id: Option<TransportId>,
}

/// A freshly created consumer, always paused
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerInfo {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub paused: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConsumeOutcome {
    Created(ConsumerInfo),
    /// The consuming peer cannot decode the producer's stream. Nothing was created.
    IncompatibleCapabilities { producer_id: ProducerId },
}

/// What a teardown released
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    pub transports_closed: usize,
    pub producers_closed: usize,
    pub consumers_closed: usize,
    /// Engine close calls that failed; their registry entries were removed anyway
    pub close_failures: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub connections: usize,
    pub transports: usize,
    pub producers: usize,
    pub consumers: usize,
}

#[derive(Default)]
struct SessionState {
    connections: ConnectionRegistry,
    transports: TransportRegistry,
    producers: ProducerRegistry,
    consumers: ConsumerRegistry,
}

impl SessionState {
    fn ensure_active(&self, connection_id: &ConnectionId) -> Result<()> {
        if self.connections.active(connection_id).is_none() {
            return Err(SfuError::UnknownConnection(connection_id.clone()));
        }
        Ok(())
    }
}

/// Log a failed best-effort close. Returns whether the close succeeded.
fn settle_close(resource: &'static str, id: &(dyn Display + Sync), result: EngineResult<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(err) => {
            warn!(resource, id = %id, error = %err, "Close failed, dropping registry entry anyway");
            false
        }
    }
}

/// Tracks every connection's transports, producers and consumers
pub struct SessionCoordinator {
    engine: Arc<dyn RoutingEngine>,
    config: SfuConfig,
    state: Mutex<SessionState>,
}

impl SessionCoordinator {
    #[must_use]
    pub fn new(engine: Arc<dyn RoutingEngine>, config: SfuConfig) -> Self {
        info!(
            enforce_transport_ownership = config.enforce_transport_ownership,
            "Session coordinator initialized"
        );

        Self {
            engine,
            config,
            state: Mutex::new(SessionState::default()),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &SfuConfig {
        &self.config
    }

    /// Router RTP capabilities
    pub fn router_capabilities(&self) -> Result<RtpCapabilities> {
        self.engine
            .router_capabilities()
            .ok_or(SfuError::RoutingEngineUnavailable)
    }

    /// Register a newly connected peer
    pub fn register_connection(&self, connection_id: &ConnectionId) -> Result<()> {
        let mut state = self.state.lock();
        if !state.connections.insert(Connection::new(connection_id.clone())) {
            warn!(connection_id = %connection_id, "Connection id already registered");
            return Err(SfuError::DuplicateConnection(connection_id.clone()));
        }

        info!(
            connection_id = %connection_id,
            total_connections = state.connections.len(),
            "Connection registered"
        );
        Ok(())
    }

    /// Set the display name, and the focus-mode flag when given
    pub fn set_peer_info(
        &self,
        connection_id: &ConnectionId,
        name: String,
        focus_mode: Option<bool>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let connection = state
            .connections
            .active_mut(connection_id)
            .ok_or_else(|| SfuError::UnknownConnection(connection_id.clone()))?;

        debug!(connection_id = %connection_id, name = %name, "Peer info updated");
        connection.display_name = Some(name);
        if let Some(focus_mode) = focus_mode {
            connection.focus_mode = focus_mode;
        }
        Ok(())
    }

    pub fn set_focus_mode(&self, connection_id: &ConnectionId, focus_mode: bool) -> Result<()> {
        let mut state = self.state.lock();
        let connection = state
            .connections
            .active_mut(connection_id)
            .ok_or_else(|| SfuError::UnknownConnection(connection_id.clone()))?;
        connection.focus_mode = focus_mode;
        Ok(())
    }

    /// Create a transport on the shared router and register it under `connection_id`
    pub async fn create_transport(
        &self,
        connection_id: &ConnectionId,
        role: TransportRole,
    ) -> Result<TransportNegotiation> {
        self.state.lock().ensure_active(connection_id)?;
        if self.engine.router_capabilities().is_none() {
            return Err(SfuError::RoutingEngineUnavailable);
        }

        let handle = self.engine.create_transport(role).await?;
        let transport_id = handle.id();

        let negotiation = match handle.negotiation() {
            Ok(negotiation) => negotiation,
            Err(err) => {
                settle_close("transport", &transport_id, handle.close().await);
                return Err(err.into());
            }
        };

        // The connection may have gone away while the engine call was pending
        let registered = {
            let mut state = self.state.lock();
            match state.ensure_active(connection_id) {
                Ok(()) => state
                    .transports
                    .insert(
                        connection_id.clone(),
                        TransportEntry::new(Arc::clone(&handle), role),
                    )
                    .map_err(|_| {
                        SfuError::Engine(EngineError::Request(format!(
                            "duplicate transport id {transport_id}"
                        )))
                    }),
                Err(err) => Err(err),
            }
        };

        if let Err(err) = registered {
            warn!(
                connection_id = %connection_id,
                transport_id = %transport_id,
                error = %err,
                "Discarding transport that could not be registered"
            );
            settle_close("transport", &transport_id, handle.close().await);
            return Err(err);
        }

        info!(
            connection_id = %connection_id,
            transport_id = %transport_id,
            role = ?role,
            "Transport created"
        );
        Ok(negotiation)
    }

    /// Complete DTLS negotiation on one of the connection's transports
    pub async fn connect_transport(
        &self,
        connection_id: &ConnectionId,
        transport_id: &TransportId,
        dtls_parameters: DtlsParameters,
    ) -> Result<()> {
        let (handle, previous) = {
            let mut state = self.state.lock();
            state.ensure_active(connection_id)?;

            let not_found = || SfuError::transport_not_found(Some(transport_id));
            state
                .transports
                .resolve(
                    connection_id,
                    Some(transport_id),
                    TransportSelection::OldestOwned,
                    self.config.enforce_transport_ownership,
                )
                .ok_or_else(not_found)?;

            let entry = state.transports.get_mut(transport_id).ok_or_else(not_found)?;
            let previous = entry.state;
            entry.state = TransportState::Connecting;
            (Arc::clone(&entry.handle), previous)
        };

        let result = handle.connect(dtls_parameters).await;

        let mut state = self.state.lock();
        let Some(entry) = state
            .transports
            .get_mut(transport_id)
            .filter(|entry| entry.state != TransportState::Closed)
        else {
            return Err(SfuError::transport_not_found(Some(transport_id)));
        };

        match result {
            Ok(()) => {
                entry.state = TransportState::Connected;
                info!(connection_id = %connection_id, transport_id = %transport_id, "Transport connected");
                Ok(())
            }
            Err(err) => {
                entry.state = previous;
                warn!(
                    connection_id = %connection_id,
                    transport_id = %transport_id,
                    error = %err,
                    "Transport connect failed"
                );
                Err(err.into())
            }
        }
    }

    /// Publish a stream and announce it to every other connection
    pub async fn produce(
        &self,
        connection_id: &ConnectionId,
        request: ProduceRequest,
    ) -> Result<Outcome<ProducerId>> {
        let (transport_id, handle) = {
            let state = self.state.lock();
            state.ensure_active(connection_id)?;
            let (transport_id, entry) = state
                .transports
                .resolve(
                    connection_id,
                    request.transport_id.as_ref(),
                    TransportSelection::OldestOwned,
                    self.config.enforce_transport_ownership,
                )
                .ok_or_else(|| SfuError::transport_not_found(request.transport_id.as_ref()))?;
            (transport_id, Arc::clone(&entry.handle))
        };

        let producer = handle.produce(request.kind, request.rtp_parameters).await?;
        let producer_id = producer.id();

        // A producer belongs to whoever owns its transport
        let registered = {
            let mut state = self.state.lock();
            if let Err(err) = state.ensure_active(connection_id) {
                Err(err)
            } else if let Some(owner) = state.transports.owner_of(&transport_id).cloned() {
                let entry = ProducerEntry {
                    handle: Arc::clone(&producer),
                    connection_id: owner.clone(),
                    kind: request.kind,
                    source: request.source.clone(),
                };
                state
                    .producers
                    .insert(transport_id.clone(), entry)
                    .map(|()| owner)
                    .map_err(|_| {
                        SfuError::Engine(EngineError::Request(format!(
                            "duplicate producer id {producer_id}"
                        )))
                    })
            } else {
                Err(SfuError::transport_not_found(Some(&transport_id)))
            }
        };

        let owner = match registered {
            Ok(owner) => owner,
            Err(err) => {
                warn!(
                    connection_id = %connection_id,
                    producer_id = %producer_id,
                    error = %err,
                    "Discarding producer created on a departed transport"
                );
                settle_close("producer", &producer_id, producer.close().await);
                return Err(err);
            }
        };

        info!(
            connection_id = %connection_id,
            owner = %owner,
            transport_id = %transport_id,
            producer_id = %producer_id,
            kind = %request.kind,
            source = ?request.source,
            "Producer created"
        );

        let announcement = Notification::new(
            Audience::AllExcept(connection_id.clone()),
            SessionEvent::ProducerAvailable {
                producer_id: producer_id.clone(),
                kind: request.kind,
                source: request.source,
                connection_id: owner,
            },
        );
        Ok(Outcome::with(producer_id, vec![announcement]))
    }

    /// Every producer not owned by `connection_id`
    #[must_use]
    pub fn list_available_producers(&self, connection_id: &ConnectionId) -> Vec<AvailableProducer> {
        self.state.lock().producers.not_owned_by(connection_id)
    }

    /// Subscribe to another connection's producer. The consumer starts paused.
    pub async fn consume(
        &self,
        connection_id: &ConnectionId,
        request: ConsumeRequest,
    ) -> Result<ConsumeOutcome> {
        let producer_id = request.producer_id;

        let (transport_id, handle) = {
            let state = self.state.lock();
            state.ensure_active(connection_id)?;

            if !state.producers.contains(&producer_id) {
                return Err(SfuError::ProducerNotFound(producer_id));
            }

            if !self.engine.can_consume(&producer_id, &request.rtp_capabilities) {
                info!(
                    connection_id = %connection_id,
                    producer_id = %producer_id,
                    "Peer capabilities cannot decode producer"
                );
                return Ok(ConsumeOutcome::IncompatibleCapabilities { producer_id });
            }

            let (transport_id, entry) = state
                .transports
                .resolve(
                    connection_id,
                    request.transport_id.as_ref(),
                    TransportSelection::NewestOwned,
                    self.config.enforce_transport_ownership,
                )
                .ok_or_else(|| SfuError::transport_not_found(request.transport_id.as_ref()))?;
            (transport_id, Arc::clone(&entry.handle))
        };

        let result = handle.consume(&producer_id, request.rtp_capabilities).await;

        // The producer may have been torn down while the engine call was pending
        let consumer = match result {
            Ok(consumer) => consumer,
            Err(err) => {
                if !self.state.lock().producers.contains(&producer_id) {
                    return Err(SfuError::ProducerNotFound(producer_id));
                }
                return Err(err.into());
            }
        };

        let info = ConsumerInfo {
            id: consumer.id(),
            producer_id: producer_id.clone(),
            kind: consumer.kind(),
            rtp_parameters: consumer.rtp_parameters(),
            paused: consumer.paused(),
        };

        let registered = {
            let mut state = self.state.lock();
            if let Err(err) = state.ensure_active(connection_id) {
                Err(err)
            } else if !state.producers.contains(&producer_id) {
                Err(SfuError::ProducerNotFound(producer_id.clone()))
            } else if let Some(owner) = state.transports.owner_of(&transport_id).cloned() {
                let entry = ConsumerEntry {
                    handle: Arc::clone(&consumer),
                    connection_id: owner,
                    producer_id: producer_id.clone(),
                    kind: info.kind,
                    paused: info.paused,
                };
                state
                    .consumers
                    .insert(transport_id.clone(), entry)
                    .map_err(|_| {
                        SfuError::Engine(EngineError::Request(format!(
                            "duplicate consumer id {}",
                            info.id
                        )))
                    })
            } else {
                Err(SfuError::transport_not_found(Some(&transport_id)))
            }
        };

        if let Err(err) = registered {
            warn!(
                connection_id = %connection_id,
                consumer_id = %info.id,
                error = %err,
                "Discarding consumer whose producer or transport is gone"
            );
            settle_close("consumer", &info.id, consumer.close().await);
            return Err(err);
        }

        info!(
            connection_id = %connection_id,
            transport_id = %transport_id,
            producer_id = %producer_id,
            consumer_id = %info.id,
            "Consumer created"
        );
        Ok(ConsumeOutcome::Created(info))
    }

    /// Start media flow on a paused consumer.
    ///
    /// Returns `false` when the consumer is unknown, which happens routinely
    /// when its producer closed in the meantime.
    pub async fn resume_consumer(
        &self,
        connection_id: &ConnectionId,
        consumer_id: &ConsumerId,
    ) -> Result<bool> {
        let handle = {
            let state = self.state.lock();
            state.consumers.get(consumer_id).and_then(|entry| {
                let owned = entry.connection_id == *connection_id;
                (owned || !self.config.enforce_transport_ownership).then(|| Arc::clone(&entry.handle))
            })
        };

        let Some(handle) = handle else {
            warn!(
                connection_id = %connection_id,
                consumer_id = %consumer_id,
                "Resume requested for unknown consumer"
            );
            return Ok(false);
        };

        handle.resume().await?;

        if let Some(entry) = self.state.lock().consumers.get_mut(consumer_id) {
            entry.paused = entry.handle.paused();
        }
        debug!(connection_id = %connection_id, consumer_id = %consumer_id, "Consumer resumed");
        Ok(true)
    }

    /// Relay a peer's own "stream ended" signal to everyone else. Registries are untouched.
    #[must_use]
    pub fn notify_producer_closed_by_peer(
        &self,
        connection_id: &ConnectionId,
        data: serde_json::Value,
    ) -> Outcome<()> {
        debug!(connection_id = %connection_id, "Relaying peer producer-closed signal");
        Outcome::with(
            (),
            vec![Notification::new(
                Audience::AllExcept(connection_id.clone()),
                SessionEvent::PeerProducerClosed {
                    connection_id: connection_id.clone(),
                    data,
                },
            )],
        )
    }

    /// Release everything a connection owns, then forget the connection.
    ///
    /// Order: transports, then producers on them (announcing each closure and
    /// closing every consumer fed by it), then consumers on them, then the
    /// connection record. Entries are taken out of the registries before their
    /// engine close is issued, so nothing is ever closed twice and a second
    /// call is a no-op.
    pub async fn teardown_connection(&self, connection_id: &ConnectionId) -> Outcome<TeardownReport> {
        let transports = {
            let mut state = self.state.lock();
            if !state.connections.begin_closing(connection_id) {
                debug!(connection_id = %connection_id, "Teardown skipped, connection already gone");
                return Outcome::quiet(TeardownReport::default());
            }
            let owned = state.transports.owned_by(connection_id);
            for transport_id in &owned {
                if let Some(entry) = state.transports.get_mut(transport_id) {
                    entry.state = TransportState::Closed;
                }
            }
            owned
        };

        info!(
            connection_id = %connection_id,
            transports = transports.len(),
            "Tearing down connection"
        );

        let mut report = TeardownReport::default();
        let mut notifications = Vec::new();

        for transport_id in &transports {
            let entry = self.state.lock().transports.remove(transport_id);
            let Some(entry) = entry else {
                continue;
            };
            report.transports_closed += 1;
            if !settle_close("transport", transport_id, entry.handle.close().await) {
                report.close_failures += 1;
            }
        }

        let producers = self.state.lock().producers.take_on_transports(&transports);
        for (producer_id, entry) in producers {
            report.producers_closed += 1;
            if !settle_close("producer", &producer_id, entry.handle.close().await) {
                report.close_failures += 1;
            }

            let orphans = self.state.lock().consumers.take_sourced_from(&producer_id);
            for (consumer_id, consumer) in orphans {
                debug!(
                    consumer_id = %consumer_id,
                    consumer_connection = %consumer.connection_id,
                    producer_id = %producer_id,
                    "Closing consumer of departed producer"
                );
                report.consumers_closed += 1;
                if !settle_close("consumer", &consumer_id, consumer.handle.close().await) {
                    report.close_failures += 1;
                }
            }

            notifications.push(Notification::new(
                Audience::AllExcept(connection_id.clone()),
                SessionEvent::ProducerClosed { producer_id },
            ));
        }

        let consumers = self.state.lock().consumers.take_on_transports(&transports);
        for (consumer_id, entry) in consumers {
            report.consumers_closed += 1;
            if !settle_close("consumer", &consumer_id, entry.handle.close().await) {
                report.close_failures += 1;
            }
        }

        let remaining = {
            let mut state = self.state.lock();
            state.connections.remove(connection_id);
            state.connections.len()
        };

        info!(
            connection_id = %connection_id,
            transports_closed = report.transports_closed,
            producers_closed = report.producers_closed,
            consumers_closed = report.consumers_closed,
            close_failures = report.close_failures,
            remaining_connections = remaining,
            "Connection torn down"
        );

        Outcome::with(report, notifications)
    }

    /// Snapshot of one live connection
    #[must_use]
    pub fn connection(&self, connection_id: &ConnectionId) -> Option<ConnectionInfo> {
        let state = self.state.lock();
        let connection = state.connections.active(connection_id)?;
        Some(Self::describe(&state, connection))
    }

    /// Snapshot of every connection, in arrival order
    #[must_use]
    pub fn list_connections(&self) -> Vec<ConnectionInfo> {
        let state = self.state.lock();
        state
            .connections
            .iter()
            .filter(|connection| !connection.is_closing())
            .map(|connection| Self::describe(&state, connection))
            .collect()
    }

    /// Ids of every registered connection, including ones being torn down
    #[must_use]
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.state
            .lock()
            .connections
            .iter()
            .map(|connection| connection.id.clone())
            .collect()
    }

    #[must_use]
    pub fn stats(&self) -> SessionStats {
        let state = self.state.lock();
        SessionStats {
            connections: state.connections.len(),
            transports: state.transports.len(),
            producers: state.producers.len(),
            consumers: state.consumers.len(),
        }
    }

    /// Current state of a transport, if it is registered
    #[must_use]
    pub fn transport_state(&self, transport_id: &TransportId) -> Option<TransportState> {
        self.state
            .lock()
            .transports
            .get(transport_id)
            .map(|entry| entry.state)
    }

    /// Transport a registered producer runs on
    #[must_use]
    pub fn producer_transport(&self, producer_id: &ProducerId) -> Option<TransportId> {
        self.state.lock().producers.transport_of(producer_id).cloned()
    }

    /// Transport a registered consumer runs on
    #[must_use]
    pub fn consumer_transport(&self, consumer_id: &ConsumerId) -> Option<TransportId> {
        self.state.lock().consumers.transport_of(consumer_id).cloned()
    }

    /// Whether a consumer is registered and still paused
    #[must_use]
    pub fn consumer_paused(&self, consumer_id: &ConsumerId) -> Option<bool> {
        self.state
            .lock()
            .consumers
            .get(consumer_id)
            .map(|entry| entry.paused)
    }

    fn describe(state: &SessionState, connection: &Connection) -> ConnectionInfo {
        ConnectionInfo {
            id: connection.id.clone(),
            display_name: connection.display_name.clone(),
            focus_mode: connection.focus_mode,
            connected_at: connection.connected_at,
            transports: state.transports.owned_by(&connection.id),
        }
    }
}
