//! Connection records

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::types::{ConnectionId, TransportId};

/// One peer session
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub display_name: Option<String>,
    pub focus_mode: bool,
    pub connected_at: DateTime<Utc>,
    /// Set once teardown has started; the record stays until teardown finishes
    closing: bool,
}

impl Connection {
    #[must_use]
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            display_name: None,
            focus_mode: false,
            connected_at: Utc::now(),
            closing: false,
        }
    }

    #[must_use]
    pub const fn is_closing(&self) -> bool {
        self.closing
    }
}

/// Snapshot of a connection handed out to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub display_name: Option<String>,
    pub focus_mode: bool,
    pub connected_at: DateTime<Utc>,
    /// Owned transports, oldest first
    pub transports: Vec<TransportId>,
}

/// Live connections in arrival order
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: IndexMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    /// Insert a new record. Returns false if the id is already present.
    pub fn insert(&mut self, connection: Connection) -> bool {
        if self.connections.contains_key(&connection.id) {
            return false;
        }
        self.connections.insert(connection.id.clone(), connection);
        true
    }

    /// Look up a connection that is not being torn down
    #[must_use]
    pub fn active(&self, id: &ConnectionId) -> Option<&Connection> {
        self.connections.get(id).filter(|c| !c.closing)
    }

    pub fn active_mut(&mut self, id: &ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(id).filter(|c| !c.closing)
    }

    /// Flag a connection as closing. Returns false if it is absent or already closing.
    pub fn begin_closing(&mut self, id: &ConnectionId) -> bool {
        match self.connections.get_mut(id) {
            Some(connection) if !connection.closing => {
                connection.closing = true;
                true
            }
            _ => false,
        }
    }

    pub fn remove(&mut self, id: &ConnectionId) -> Option<Connection> {
        self.connections.shift_remove(id)
    }

    #[must_use]
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
