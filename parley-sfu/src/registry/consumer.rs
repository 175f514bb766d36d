//! Consumer records, keyed by consumer id and indexed by the transport they run on

use std::sync::Arc;

use super::ResourceRegistry;
use crate::engine::ConsumerHandle;
use crate::types::{ConnectionId, ConsumerId, MediaKind, ProducerId, TransportId};

pub struct ConsumerEntry {
    pub handle: Arc<dyn ConsumerHandle>,
    pub connection_id: ConnectionId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub paused: bool,
}

#[derive(Default)]
pub struct ConsumerRegistry {
    inner: ResourceRegistry<ConsumerId, TransportId, ConsumerEntry>,
}

impl ConsumerRegistry {
    pub fn insert(&mut self, transport: TransportId, entry: ConsumerEntry) -> Result<(), ConsumerEntry> {
        self.inner.insert(entry.handle.id(), transport, entry)
    }

    #[must_use]
    pub fn get(&self, id: &ConsumerId) -> Option<&ConsumerEntry> {
        self.inner.get(id)
    }

    pub fn get_mut(&mut self, id: &ConsumerId) -> Option<&mut ConsumerEntry> {
        self.inner.get_mut(id)
    }

    #[must_use]
    pub fn contains(&self, id: &ConsumerId) -> bool {
        self.inner.contains(id)
    }

    #[must_use]
    pub fn transport_of(&self, id: &ConsumerId) -> Option<&TransportId> {
        self.inner.owner_of(id)
    }

    pub fn remove(&mut self, id: &ConsumerId) -> Option<ConsumerEntry> {
        self.inner.remove(id).map(|(_, entry)| entry)
    }

    /// Remove every consumer running on one of `transports`
    pub fn take_on_transports(&mut self, transports: &[TransportId]) -> Vec<(ConsumerId, ConsumerEntry)> {
        self.inner
            .remove_owned_by_any(transports)
            .into_iter()
            .map(|(id, _, entry)| (id, entry))
            .collect()
    }

    /// Remove every consumer, on any connection, reading from `producer`
    pub fn take_sourced_from(&mut self, producer: &ProducerId) -> Vec<(ConsumerId, ConsumerEntry)> {
        self.inner
            .remove_where(|entry| entry.producer_id == *producer)
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
