//! Transport records, keyed by transport id and indexed by owning connection

use std::sync::Arc;

use super::ResourceRegistry;
use crate::engine::TransportHandle;
use crate::types::{ConnectionId, TransportId, TransportRole, TransportState};

/// Which owned transport to use when a request names none
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportSelection {
    /// First transport the connection created (the send side in a normal client)
    OldestOwned,
    /// Most recent transport the connection created (the receive side)
    NewestOwned,
}

pub struct TransportEntry {
    pub handle: Arc<dyn TransportHandle>,
    pub role: TransportRole,
    pub state: TransportState,
}

impl TransportEntry {
    #[must_use]
    pub fn new(handle: Arc<dyn TransportHandle>, role: TransportRole) -> Self {
        Self {
            handle,
            role,
            state: TransportState::New,
        }
    }
}

#[derive(Default)]
pub struct TransportRegistry {
    inner: ResourceRegistry<TransportId, ConnectionId, TransportEntry>,
}

impl TransportRegistry {
    /// Register a transport under `connection`. Fails if its id is live.
    pub fn insert(&mut self, connection: ConnectionId, entry: TransportEntry) -> Result<(), TransportEntry> {
        self.inner.insert(entry.handle.id(), connection, entry)
    }

    /// Find the transport a request should run on.
    ///
    /// An explicit id wins. With `enforce_ownership` set, an explicit id owned
    /// by another connection resolves to nothing. Without an explicit id the
    /// connection's own transports are searched per `selection`. Transports
    /// already marked closed never resolve.
    #[must_use]
    pub fn resolve(
        &self,
        connection: &ConnectionId,
        explicit: Option<&TransportId>,
        selection: TransportSelection,
        enforce_ownership: bool,
    ) -> Option<(TransportId, &TransportEntry)> {
        let id = match explicit {
            Some(id) => {
                let owner = self.inner.owner_of(id)?;
                if enforce_ownership && owner != connection {
                    return None;
                }
                id.clone()
            }
            None => {
                let mut owned = self.inner.owned_by(connection);
                match selection {
                    TransportSelection::OldestOwned => owned.next(),
                    TransportSelection::NewestOwned => owned.next_back(),
                }?
                .clone()
            }
        };

        let entry = self
            .inner
            .get(&id)
            .filter(|entry| entry.state != TransportState::Closed)?;
        Some((id, entry))
    }

    #[must_use]
    pub fn get(&self, id: &TransportId) -> Option<&TransportEntry> {
        self.inner.get(id)
    }

    pub fn get_mut(&mut self, id: &TransportId) -> Option<&mut TransportEntry> {
        self.inner.get_mut(id)
    }

    #[must_use]
    pub fn owner_of(&self, id: &TransportId) -> Option<&ConnectionId> {
        self.inner.owner_of(id)
    }

    #[must_use]
    pub fn contains(&self, id: &TransportId) -> bool {
        self.inner.contains(id)
    }

    /// Transport ids owned by `connection`, oldest first
    #[must_use]
    pub fn owned_by(&self, connection: &ConnectionId) -> Vec<TransportId> {
        self.inner.owned_by(connection).cloned().collect()
    }

    pub fn remove(&mut self, id: &TransportId) -> Option<TransportEntry> {
        self.inner.remove(id).map(|(_, entry)| entry)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TransportId, &ConnectionId, &TransportEntry)> {
        self.inner.iter()
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
