//! In-process routing engine without a media plane
//!
//! Hands out identifiers and negotiation parameters that look like a real
//! router's, answers capability checks from the configured codecs, and keeps
//! a log of every close call. It runs the whole signaling surface without a
//! native media worker and is the engine the test suites drive.
//!
//! There is no media plane, so producer liveness is only consulted by
//! `can_consume`; `consume` itself accepts any producer it has seen.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use super::{
    ConsumerHandle, DtlsParameters, EngineResult, ProducerHandle, RoutingEngine, RtpCapabilities,
    RtpParameters, TransportHandle, TransportNegotiation,
};
use crate::config::SfuConfig;
use crate::error::EngineError;
use crate::types::{ConsumerId, MediaKind, ProducerId, TransportId, TransportRole};

/// Kind of resource recorded in the close log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Transport,
    Producer,
    Consumer,
}

#[derive(Debug, Clone)]
struct ProducerRecord {
    kind: MediaKind,
    mime_type: Option<String>,
    closed: bool,
}

struct EngineState {
    codecs: Vec<Value>,
    announced_ip: String,
    port_min: u16,
    port_span: u32,
    next_port: AtomicU32,
    ready: AtomicBool,
    fail_closes: AtomicBool,
    producers: Mutex<HashMap<ProducerId, ProducerRecord>>,
    close_log: Mutex<Vec<(ResourceKind, String)>>,
    /// `true` while consumes may proceed
    consume_gate: watch::Sender<bool>,
    parked_consumes: AtomicUsize,
}

impl EngineState {
    fn record_close(&self, kind: ResourceKind, id: &str) -> EngineResult<()> {
        self.close_log.lock().push((kind, id.to_string()));
        if self.fail_closes.load(Ordering::SeqCst) {
            return Err(EngineError::Request(format!("injected close failure for {id}")));
        }
        Ok(())
    }

    fn next_port(&self) -> u16 {
        let offset = self.next_port.fetch_add(1, Ordering::Relaxed) % self.port_span;
        u16::try_from(u32::from(self.port_min) + offset).unwrap_or(self.port_min)
    }

    fn matching_codec(&self, record: &ProducerRecord, capabilities: &RtpCapabilities) -> Option<Value> {
        let codecs = capabilities.0.get("codecs")?.as_array()?;
        codecs
            .iter()
            .find(|codec| match &record.mime_type {
                Some(mime) => codec
                    .get("mimeType")
                    .and_then(Value::as_str)
                    .is_some_and(|m| m.eq_ignore_ascii_case(mime)),
                None => codec.get("kind").and_then(Value::as_str) == Some(record.kind.as_str()),
            })
            .cloned()
    }
}

/// In-process routing engine
#[derive(Clone)]
pub struct LoopbackEngine {
    state: Arc<EngineState>,
}

impl LoopbackEngine {
    /// Create an engine whose router is ready immediately
    #[must_use]
    pub fn new(config: &SfuConfig) -> Self {
        let engine = Self::initializing(config);
        engine.mark_ready();
        engine
    }

    /// Create an engine whose router has not finished initializing
    #[must_use]
    pub fn initializing(config: &SfuConfig) -> Self {
        let (consume_gate, _) = watch::channel(true);
        let port_span = u32::from(config.rtc_max_port)
            .saturating_sub(u32::from(config.rtc_min_port))
            + 1;

        Self {
            state: Arc::new(EngineState {
                codecs: config.media_codecs.clone(),
                announced_ip: config.effective_announced_ip(),
                port_min: config.rtc_min_port,
                port_span,
                next_port: AtomicU32::new(0),
                ready: AtomicBool::new(false),
                fail_closes: AtomicBool::new(false),
                producers: Mutex::new(HashMap::new()),
                close_log: Mutex::new(Vec::new()),
                consume_gate,
                parked_consumes: AtomicUsize::new(0),
            }),
        }
    }

    /// Finish router initialization
    pub fn mark_ready(&self) {
        self.state.ready.store(true, Ordering::SeqCst);
    }

    /// Make every subsequent close call report a failure (after recording it)
    pub fn set_fail_closes(&self, fail: bool) {
        self.state.fail_closes.store(fail, Ordering::SeqCst);
    }

    /// Park every `consume` call until [`release_consumes`](Self::release_consumes)
    pub fn hold_consumes(&self) {
        self.state.consume_gate.send_replace(false);
    }

    pub fn release_consumes(&self) {
        self.state.consume_gate.send_replace(true);
    }

    /// Number of `consume` calls currently parked at the gate
    #[must_use]
    pub fn parked_consumes(&self) -> usize {
        self.state.parked_consumes.load(Ordering::SeqCst)
    }

    /// How many times a close was issued for `id`
    #[must_use]
    pub fn close_count(&self, id: &str) -> usize {
        self.state
            .close_log
            .lock()
            .iter()
            .filter(|(_, closed)| closed == id)
            .count()
    }

    /// Ids closed so far for one resource kind, in close order
    #[must_use]
    pub fn closed(&self, kind: ResourceKind) -> Vec<String> {
        self.state
            .close_log
            .lock()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, id)| id.clone())
            .collect()
    }
}

#[async_trait]
impl RoutingEngine for LoopbackEngine {
    fn router_capabilities(&self) -> Option<RtpCapabilities> {
        if !self.state.ready.load(Ordering::SeqCst) {
            return None;
        }

        let codecs: Vec<Value> = self
            .state
            .codecs
            .iter()
            .enumerate()
            .map(|(index, codec)| {
                let mut codec = codec.clone();
                if let Some(fields) = codec.as_object_mut() {
                    fields
                        .entry("preferredPayloadType")
                        .or_insert_with(|| json!(100 + index));
                }
                codec
            })
            .collect();

        Some(RtpCapabilities(json!({
            "codecs": codecs,
            "headerExtensions": []
        })))
    }

    async fn create_transport(&self, role: TransportRole) -> EngineResult<Arc<dyn TransportHandle>> {
        if !self.state.ready.load(Ordering::SeqCst) {
            return Err(EngineError::Unavailable("router not initialized".to_string()));
        }

        let id = TransportId::new(Uuid::new_v4().to_string());
        let negotiation = TransportNegotiation {
            id: id.clone(),
            ice_parameters: json!({
                "usernameFragment": Uuid::new_v4().simple().to_string(),
                "password": Uuid::new_v4().simple().to_string(),
                "iceLite": true
            }),
            ice_candidates: json!([{
                "foundation": "udpcandidate",
                "priority": 1_076_302_079u32,
                "ip": self.state.announced_ip,
                "address": self.state.announced_ip,
                "protocol": "udp",
                "port": self.state.next_port(),
                "type": "host"
            }]),
            dtls_parameters: json!({
                "role": "auto",
                "fingerprints": [{
                    "algorithm": "sha-256",
                    "value": Uuid::new_v4().simple().to_string().to_uppercase()
                }]
            }),
        };

        debug!(transport_id = %id, role = ?role, "Loopback transport created");

        Ok(Arc::new(LoopbackTransport {
            id,
            negotiation,
            state: Arc::clone(&self.state),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }))
    }

    fn can_consume(&self, producer_id: &ProducerId, capabilities: &RtpCapabilities) -> bool {
        let producers = self.state.producers.lock();
        producers
            .get(producer_id)
            .filter(|record| !record.closed)
            .is_some_and(|record| self.state.matching_codec(record, capabilities).is_some())
    }
}

struct LoopbackTransport {
    id: TransportId,
    negotiation: TransportNegotiation,
    state: Arc<EngineState>,
    connected: AtomicBool,
    closed: AtomicBool,
}

impl LoopbackTransport {
    fn ensure_open(&self) -> EngineResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed(format!("transport {}", self.id)));
        }
        Ok(())
    }
}

#[async_trait]
impl TransportHandle for LoopbackTransport {
    fn id(&self) -> TransportId {
        self.id.clone()
    }

    fn negotiation(&self) -> EngineResult<TransportNegotiation> {
        Ok(self.negotiation.clone())
    }

    async fn connect(&self, _dtls_parameters: DtlsParameters) -> EngineResult<()> {
        self.ensure_open()?;
        if self.connected.swap(true, Ordering::SeqCst) {
            return Err(EngineError::Request(format!(
                "transport {} already connected",
                self.id
            )));
        }
        Ok(())
    }

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> EngineResult<Arc<dyn ProducerHandle>> {
        self.ensure_open()?;

        let mime_type = rtp_parameters
            .0
            .get("codecs")
            .and_then(Value::as_array)
            .and_then(|codecs| codecs.first())
            .and_then(|codec| codec.get("mimeType"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let id = ProducerId::new(Uuid::new_v4().to_string());
        self.state.producers.lock().insert(
            id.clone(),
            ProducerRecord {
                kind,
                mime_type,
                closed: false,
            },
        );

        Ok(Arc::new(LoopbackProducer {
            id,
            kind,
            state: Arc::clone(&self.state),
        }))
    }

    async fn consume(
        &self,
        producer_id: &ProducerId,
        capabilities: RtpCapabilities,
    ) -> EngineResult<Arc<dyn ConsumerHandle>> {
        self.ensure_open()?;

        let mut gate = self.state.consume_gate.subscribe();
        let open = *gate.borrow();
        if !open {
            self.state.parked_consumes.fetch_add(1, Ordering::SeqCst);
            let released = gate.wait_for(|open| *open).await.map(|_| ());
            self.state.parked_consumes.fetch_sub(1, Ordering::SeqCst);
            released.map_err(|_| EngineError::Unavailable("engine shut down".to_string()))?;
        }

        let record = self
            .state
            .producers
            .lock()
            .get(producer_id)
            .cloned()
            .ok_or_else(|| EngineError::Request(format!("unknown producer {producer_id}")))?;

        let codec = self.state.matching_codec(&record, &capabilities);
        let ssrc = (Uuid::new_v4().as_u128() & 0xffff_ffff) as u32;
        let rtp_parameters = RtpParameters(json!({
            "codecs": codec.into_iter().collect::<Vec<_>>(),
            "encodings": [{ "ssrc": ssrc }],
            "rtcp": { "cname": producer_id.as_str(), "reducedSize": true }
        }));

        Ok(Arc::new(LoopbackConsumer {
            id: ConsumerId::new(Uuid::new_v4().to_string()),
            kind: record.kind,
            producer_id: producer_id.clone(),
            rtp_parameters,
            paused: AtomicBool::new(true),
            state: Arc::clone(&self.state),
        }))
    }

    async fn close(&self) -> EngineResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.state.record_close(ResourceKind::Transport, self.id.as_str())
    }
}

struct LoopbackProducer {
    id: ProducerId,
    kind: MediaKind,
    state: Arc<EngineState>,
}

#[async_trait]
impl ProducerHandle for LoopbackProducer {
    fn id(&self) -> ProducerId {
        self.id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    async fn close(&self) -> EngineResult<()> {
        if let Some(record) = self.state.producers.lock().get_mut(&self.id) {
            record.closed = true;
        }
        self.state.record_close(ResourceKind::Producer, self.id.as_str())
    }
}

struct LoopbackConsumer {
    id: ConsumerId,
    kind: MediaKind,
    producer_id: ProducerId,
    rtp_parameters: RtpParameters,
    paused: AtomicBool,
    state: Arc<EngineState>,
}

#[async_trait]
impl ConsumerHandle for LoopbackConsumer {
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
        self.paused.load(Ordering::SeqCst)
    }

    async fn resume(&self) -> EngineResult<()> {
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> EngineResult<()> {
        self.state.record_close(ResourceKind::Consumer, self.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opus_parameters() -> RtpParameters {
        RtpParameters(json!({
            "codecs": [{ "mimeType": "audio/opus", "payloadType": 100, "clockRate": 48000 }],
            "encodings": [{ "ssrc": 1111 }]
        }))
    }

    #[tokio::test]
    async fn test_initializing_engine_reports_no_capabilities() {
        let engine = LoopbackEngine::initializing(&SfuConfig::default());
        assert!(engine.router_capabilities().is_none());
        assert!(engine.create_transport(TransportRole::Send).await.is_err());

        engine.mark_ready();
        let capabilities = engine.router_capabilities().unwrap();
        assert_eq!(capabilities.0["codecs"].as_array().unwrap().len(), 2);
        assert_eq!(capabilities.0["codecs"][0]["preferredPayloadType"], 100);
    }

    #[tokio::test]
    async fn test_negotiation_uses_port_range() {
        let config = SfuConfig {
            announced_ip: Some("198.51.100.4".to_string()),
            rtc_min_port: 40000,
            rtc_max_port: 40001,
            ..SfuConfig::default()
        };
        let engine = LoopbackEngine::new(&config);

        let mut ports = Vec::new();
        for _ in 0..3 {
            let transport = engine.create_transport(TransportRole::Recv).await.unwrap();
            let negotiation = transport.negotiation().unwrap();
            assert_eq!(negotiation.id, transport.id());
            assert_eq!(negotiation.ice_candidates[0]["ip"], "198.51.100.4");
            ports.push(negotiation.ice_candidates[0]["port"].as_u64().unwrap());
        }
        assert_eq!(ports, vec![40000, 40001, 40000]);
    }

    #[tokio::test]
    async fn test_can_consume_matches_mime_type() {
        let engine = LoopbackEngine::new(&SfuConfig::default());
        let transport = engine.create_transport(TransportRole::Send).await.unwrap();
        let producer = transport
            .produce(MediaKind::Audio, opus_parameters())
            .await
            .unwrap();

        let opus = RtpCapabilities(json!({ "codecs": [{ "kind": "audio", "mimeType": "audio/OPUS" }] }));
        let vp8_only = RtpCapabilities(json!({ "codecs": [{ "kind": "video", "mimeType": "video/VP8" }] }));

        assert!(engine.can_consume(&producer.id(), &opus));
        assert!(!engine.can_consume(&producer.id(), &vp8_only));
        assert!(!engine.can_consume(&ProducerId::from("missing"), &opus));

        producer.close().await.unwrap();
        assert!(!engine.can_consume(&producer.id(), &opus));
    }

    #[tokio::test]
    async fn test_double_connect_fails() {
        let engine = LoopbackEngine::new(&SfuConfig::default());
        let transport = engine.create_transport(TransportRole::Send).await.unwrap();

        transport.connect(DtlsParameters::default()).await.unwrap();
        assert!(transport.connect(DtlsParameters::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_close_log_and_injected_failures() {
        let engine = LoopbackEngine::new(&SfuConfig::default());
        let transport = engine.create_transport(TransportRole::Send).await.unwrap();
        let id = transport.id();

        engine.set_fail_closes(true);
        assert!(transport.close().await.is_err());
        assert_eq!(engine.close_count(id.as_str()), 1);
        assert_eq!(engine.closed(ResourceKind::Transport), vec![id.to_string()]);

        assert!(matches!(
            transport.produce(MediaKind::Audio, opus_parameters()).await,
            Err(EngineError::Closed(_))
        ));
    }

    #[tokio::test]
    async fn test_consume_waits_at_gate() {
        let engine = LoopbackEngine::new(&SfuConfig::default());
        let send = engine.create_transport(TransportRole::Send).await.unwrap();
        let recv = engine.create_transport(TransportRole::Recv).await.unwrap();
        let producer = send.produce(MediaKind::Audio, opus_parameters()).await.unwrap();

        engine.hold_consumes();
        let producer_id = producer.id();
        let task = tokio::spawn(async move {
            recv.consume(&producer_id, RtpCapabilities(json!({ "codecs": [] })))
                .await
                .map(|consumer| consumer.kind())
        });

        while engine.parked_consumes() == 0 {
            tokio::task::yield_now().await;
        }
        engine.release_consumes();

        assert_eq!(task.await.unwrap().unwrap(), MediaKind::Audio);
        assert_eq!(engine.parked_consumes(), 0);
    }

    #[tokio::test]
    async fn test_consumer_starts_paused_until_resumed() {
        let engine = LoopbackEngine::new(&SfuConfig::default());
        let send = engine.create_transport(TransportRole::Send).await.unwrap();
        let recv = engine.create_transport(TransportRole::Recv).await.unwrap();
        let producer = send.produce(MediaKind::Audio, opus_parameters()).await.unwrap();

        let consumer = recv
            .consume(&producer.id(), RtpCapabilities(json!({ "codecs": [] })))
            .await
            .unwrap();
        assert!(consumer.paused());

        consumer.resume().await.unwrap();
        assert!(!consumer.paused());
    }
}
