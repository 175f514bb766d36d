//! Routing engine backed by a mediasoup worker and a single shared router

use async_trait::async_trait;
use mediasoup::prelude as ms;
use mediasoup::prelude::Transport as _;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::{
    ConsumerHandle, DtlsParameters, EngineResult, ProducerHandle, RoutingEngine, RtpCapabilities,
    RtpParameters, TransportHandle, TransportNegotiation,
};
use crate::config::SfuConfig;
use crate::error::EngineError;
use crate::types::{ConsumerId, MediaKind, ProducerId, TransportId, TransportRole};

/// mediasoup ids are UUID newtypes; ours are strings
fn engine_id<T: DeserializeOwned>(id: &str) -> EngineResult<T> {
    Ok(serde_json::from_value(Value::String(id.to_string()))?)
}

fn request_error(err: impl std::fmt::Display) -> EngineError {
    EngineError::Request(err.to_string())
}

const fn to_engine_kind(kind: MediaKind) -> ms::MediaKind {
    match kind {
        MediaKind::Audio => ms::MediaKind::Audio,
        MediaKind::Video => ms::MediaKind::Video,
    }
}

const fn from_engine_kind(kind: ms::MediaKind) -> MediaKind {
    match kind {
        ms::MediaKind::Audio => MediaKind::Audio,
        ms::MediaKind::Video => MediaKind::Video,
    }
}

pub struct MediasoupEngine {
    config: SfuConfig,
    worker_manager: ms::WorkerManager,
    worker: OnceLock<ms::Worker>,
    router: OnceLock<ms::Router>,
    worker_died: CancellationToken,
}

impl MediasoupEngine {
    #[must_use]
    pub fn new(config: SfuConfig) -> Self {
        Self {
            config,
            worker_manager: ms::WorkerManager::new(),
            worker: OnceLock::new(),
            router: OnceLock::new(),
            worker_died: CancellationToken::new(),
        }
    }

    /// Spawn the worker and create the shared router.
    ///
    /// Until this completes `router_capabilities` reports `None` and
    /// transport creation fails as unavailable.
    pub async fn start(&self) -> EngineResult<()> {
        let worker = self
            .worker_manager
            .create_worker(ms::WorkerSettings::default())
            .await
            .map_err(|e| EngineError::Unavailable(format!("failed to spawn worker: {e}")))?;

        let died = self.worker_died.clone();
        worker
            .on_dead(move |reason| {
                error!("mediasoup worker died: {reason:?}");
                died.cancel();
            })
            .detach();

        let codecs: Vec<ms::RtpCodecCapability> = self
            .config
            .media_codecs
            .iter()
            .cloned()
            .map(serde_json::from_value)
            .collect::<Result<_, _>>()?;

        let router = worker
            .create_router(ms::RouterOptions::new(codecs))
            .await
            .map_err(|e| EngineError::Unavailable(format!("failed to create router: {e}")))?;

        info!(router_id = %router.id(), "mediasoup router ready");

        let _ = self.router.set(router);
        let _ = self.worker.set(worker);
        Ok(())
    }

    /// Cancelled when the worker process exits
    #[must_use]
    pub fn worker_died(&self) -> CancellationToken {
        self.worker_died.clone()
    }

    fn listen_info(&self, protocol: &str) -> EngineResult<ms::ListenInfo> {
        Ok(serde_json::from_value(json!({
            "protocol": protocol,
            "ip": self.config.listen_ip,
            "announcedAddress": self.config.effective_announced_ip(),
            "exposeInternalIp": false,
            "portRange": {
                "start": self.config.rtc_min_port,
                "end": self.config.rtc_max_port
            }
        }))?)
    }

    fn listen_infos(&self) -> EngineResult<ms::WebRtcTransportListenInfos> {
        let mut protocols = Vec::new();
        if self.config.enable_udp {
            protocols.push("udp");
        }
        if self.config.enable_tcp {
            protocols.push("tcp");
        }

        let mut infos = protocols.into_iter().map(|p| self.listen_info(p));
        let first = infos
            .next()
            .ok_or_else(|| EngineError::InvalidParameters("no transport protocol enabled".to_string()))??;

        let mut listen_infos = ms::WebRtcTransportListenInfos::new(first);
        for info in infos {
            listen_infos = listen_infos.insert(info?);
        }
        Ok(listen_infos)
    }
}

#[async_trait]
impl RoutingEngine for MediasoupEngine {
    fn router_capabilities(&self) -> Option<RtpCapabilities> {
        let router = self.router.get()?;
        serde_json::to_value(router.rtp_capabilities())
            .ok()
            .map(RtpCapabilities)
    }

    async fn create_transport(&self, role: TransportRole) -> EngineResult<Arc<dyn TransportHandle>> {
        let router = self
            .router
            .get()
            .ok_or_else(|| EngineError::Unavailable("router not initialized".to_string()))?;

        let mut options = ms::WebRtcTransportOptions::new(self.listen_infos()?);
        options.prefer_udp = self.config.prefer_udp;

        let transport = router
            .create_webrtc_transport(options)
            .await
            .map_err(request_error)?;

        let id = TransportId::new(transport.id().to_string());
        let negotiation = TransportNegotiation {
            id: id.clone(),
            ice_parameters: serde_json::to_value(transport.ice_parameters())?,
            ice_candidates: serde_json::to_value(transport.ice_candidates())?,
            dtls_parameters: serde_json::to_value(transport.dtls_parameters())?,
        };

        info!(transport_id = %id, role = ?role, "mediasoup transport created");

        Ok(Arc::new(MediasoupTransport {
            id,
            negotiation,
            inner: Mutex::new(Some(transport)),
        }))
    }

    fn can_consume(&self, producer_id: &ProducerId, capabilities: &RtpCapabilities) -> bool {
        let Some(router) = self.router.get() else {
            return false;
        };
        let Ok(producer_id) = engine_id::<ms::ProducerId>(producer_id.as_str()) else {
            return false;
        };
        let Ok(capabilities) = serde_json::from_value::<ms::RtpCapabilities>(capabilities.0.clone()) else {
            return false;
        };
        router.can_consume(&producer_id, &capabilities)
    }
}

struct MediasoupTransport {
    id: TransportId,
    negotiation: TransportNegotiation,
    inner: Mutex<Option<ms::WebRtcTransport>>,
}

impl MediasoupTransport {
    fn current(&self) -> EngineResult<ms::WebRtcTransport> {
        self.inner
            .lock()
            .clone()
            .ok_or_else(|| EngineError::Closed(format!("transport {}", self.id)))
    }
}

#[async_trait]
impl TransportHandle for MediasoupTransport {
    fn id(&self) -> TransportId {
        self.id.clone()
    }

    fn negotiation(&self) -> EngineResult<TransportNegotiation> {
        Ok(self.negotiation.clone())
    }

    async fn connect(&self, dtls_parameters: DtlsParameters) -> EngineResult<()> {
        let transport = self.current()?;
        let dtls_parameters: ms::DtlsParameters = serde_json::from_value(dtls_parameters.0)?;
        transport
            .connect(ms::WebRtcTransportRemoteParameters { dtls_parameters })
            .await
            .map_err(request_error)
    }

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> EngineResult<Arc<dyn ProducerHandle>> {
        let transport = self.current()?;
        let rtp_parameters: ms::RtpParameters = serde_json::from_value(rtp_parameters.0)?;

        let producer = transport
            .produce(ms::ProducerOptions::new(to_engine_kind(kind), rtp_parameters))
            .await
            .map_err(request_error)?;

        Ok(Arc::new(MediasoupProducer {
            id: ProducerId::new(producer.id().to_string()),
            kind,
            inner: Mutex::new(Some(producer)),
        }))
    }

    async fn consume(
        &self,
        producer_id: &ProducerId,
        capabilities: RtpCapabilities,
    ) -> EngineResult<Arc<dyn ConsumerHandle>> {
        let transport = self.current()?;
        let mut options = ms::ConsumerOptions::new(
            engine_id(producer_id.as_str())?,
            serde_json::from_value(capabilities.0)?,
        );
        options.paused = true;

        let consumer = transport.consume(options).await.map_err(request_error)?;

        Ok(Arc::new(MediasoupConsumer {
            id: ConsumerId::new(consumer.id().to_string()),
            kind: from_engine_kind(consumer.kind()),
            producer_id: producer_id.clone(),
            rtp_parameters: RtpParameters(serde_json::to_value(consumer.rtp_parameters())?),
            inner: Mutex::new(Some(consumer)),
        }))
    }

    async fn close(&self) -> EngineResult<()> {
        // Dropping the last handle closes the transport inside the worker
        let transport = self.inner.lock().take();
        drop(transport);
        Ok(())
    }
}

struct MediasoupProducer {
    id: ProducerId,
    kind: MediaKind,
    inner: Mutex<Option<ms::Producer>>,
}

#[async_trait]
impl ProducerHandle for MediasoupProducer {
    fn id(&self) -> ProducerId {
        self.id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    async fn close(&self) -> EngineResult<()> {
        let producer = self.inner.lock().take();
        drop(producer);
        Ok(())
    }
}

struct MediasoupConsumer {
    id: ConsumerId,
    kind: MediaKind,
    producer_id: ProducerId,
    rtp_parameters: RtpParameters,
    inner: Mutex<Option<ms::Consumer>>,
}

#[async_trait]
impl ConsumerHandle for MediasoupConsumer {
    fn id(&self) -> ConsumerId {
        self.id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn producer_id(&self) -> ProducerId {
        self.producer_id.clone()
    }

    fn rtp_parameters(&self) -> RtpParameters {
        self.rtp_parameters.clone()
    }

    fn paused(&self) -> bool {
        self.inner
            .lock()
            .as_ref()
            .map_or(true, |consumer| consumer.paused())
    }

    async fn resume(&self) -> EngineResult<()> {
        let consumer = self
            .inner
            .lock()
            .clone()
            .ok_or_else(|| EngineError::Closed(format!("consumer {}", self.id)))?;
        consumer.resume().await.map_err(request_error)
    }

    async fn close(&self) -> EngineResult<()> {
        let consumer = self.inner.lock().take();
        drop(consumer);
        Ok(())
    }
}
