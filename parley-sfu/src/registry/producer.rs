//! Producer records, keyed by producer id and indexed by the transport they run on

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::ResourceRegistry;
use crate::engine::ProducerHandle;
use crate::types::{ConnectionId, MediaKind, ProducerId, TransportId};

pub struct ProducerEntry {
    pub handle: Arc<dyn ProducerHandle>,
    pub connection_id: ConnectionId,
    pub kind: MediaKind,
    /// Free-form origin label supplied by the producing peer ("camera", "screen", ...)
    pub source: Option<String>,
}

/// A producer another connection may consume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableProducer {
    pub producer_id: ProducerId,
    pub connection_id: ConnectionId,
    pub kind: MediaKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Default)]
pub struct ProducerRegistry {
    inner: ResourceRegistry<ProducerId, TransportId, ProducerEntry>,
}

impl ProducerRegistry {
    pub fn insert(&mut self, transport: TransportId, entry: ProducerEntry) -> Result<(), ProducerEntry> {
        self.inner.insert(entry.handle.id(), transport, entry)
    }

    #[must_use]
    pub fn get(&self, id: &ProducerId) -> Option<&ProducerEntry> {
        self.inner.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &ProducerId) -> bool {
        self.inner.contains(id)
    }

    #[must_use]
    pub fn transport_of(&self, id: &ProducerId) -> Option<&TransportId> {
        self.inner.owner_of(id)
    }

    pub fn remove(&mut self, id: &ProducerId) -> Option<ProducerEntry> {
        self.inner.remove(id).map(|(_, entry)| entry)
    }

    /// Producers of every connection except `connection`, in creation order
    #[must_use]
    pub fn not_owned_by(&self, connection: &ConnectionId) -> Vec<AvailableProducer> {
        self.inner
            .iter()
            .filter(|(_, _, entry)| entry.connection_id != *connection)
            .map(|(id, _, entry)| AvailableProducer {
                producer_id: id.clone(),
                connection_id: entry.connection_id.clone(),
                kind: entry.kind,
                source: entry.source.clone(),
            })
            .collect()
    }

    /// Remove every producer running on one of `transports`
    pub fn take_on_transports(&mut self, transports: &[TransportId]) -> Vec<(ProducerId, ProducerEntry)> {
        self.inner
            .remove_owned_by_any(transports)
            .into_iter()
            .map(|(id, _, entry)| (id, entry))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SfuConfig;
    use crate::engine::{LoopbackEngine, RoutingEngine, RtpParameters};
    use crate::types::TransportRole;

    async fn produce(
        registry: &mut ProducerRegistry,
        engine: &LoopbackEngine,
        owner: &str,
        source: Option<&str>,
    ) -> (TransportId, ProducerId) {
        let transport = engine.create_transport(TransportRole::Send).await.unwrap();
        let handle = transport
            .produce(MediaKind::Video, RtpParameters::default())
            .await
            .unwrap();
        let id = handle.id();
        let entry = ProducerEntry {
            handle,
            connection_id: ConnectionId::from(owner),
            kind: MediaKind::Video,
            source: source.map(str::to_string),
        };
        assert!(registry.insert(transport.id(), entry).is_ok());
        (transport.id(), id)
    }

    #[tokio::test]
    async fn test_not_owned_by_excludes_requester() {
        let engine = LoopbackEngine::new(&SfuConfig::default());
        let mut registry = ProducerRegistry::default();
        let (_, alice_cam) = produce(&mut registry, &engine, "alice", Some("camera")).await;
        let (_, bob_cam) = produce(&mut registry, &engine, "bob", None).await;

        let for_bob = registry.not_owned_by(&ConnectionId::from("bob"));
        assert_eq!(for_bob.len(), 1);
        assert_eq!(for_bob[0].producer_id, alice_cam);
        assert_eq!(for_bob[0].source.as_deref(), Some("camera"));

        let for_carol: Vec<_> = registry
            .not_owned_by(&ConnectionId::from("carol"))
            .into_iter()
            .map(|p| p.producer_id)
            .collect();
        assert_eq!(for_carol, vec![alice_cam, bob_cam]);
    }

    #[tokio::test]
    async fn test_take_on_transports() {
        let engine = LoopbackEngine::new(&SfuConfig::default());
        let mut registry = ProducerRegistry::default();
        let (alice_transport, alice_cam) = produce(&mut registry, &engine, "alice", None).await;
        let (_, bob_cam) = produce(&mut registry, &engine, "bob", None).await;

        let taken = registry.take_on_transports(&[alice_transport.clone()]);
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].0, alice_cam);
        assert!(registry.take_on_transports(&[alice_transport]).is_empty());
        assert!(registry.contains(&bob_cam));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_available_producer_wire_shape() {
        let available = AvailableProducer {
            producer_id: ProducerId::from("p-1"),
            connection_id: ConnectionId::from("alice"),
            kind: MediaKind::Audio,
            source: None,
        };
        let json = serde_json::to_value(&available).unwrap();
        assert_eq!(json["producerId"], "p-1");
        assert_eq!(json["connectionId"], "alice");
        assert_eq!(json["kind"], "audio");
        assert!(json.get("source").is_none());
    }
}
