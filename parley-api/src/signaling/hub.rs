use dashmap::DashMap;
use parley_sfu::{Audience, ConnectionId, Notification};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::protocol::ServerMessage;

/// Outbound queue of one connected peer
pub type MessageSender = mpsc::UnboundedSender<ServerMessage>;

/// In-memory fan-out to every connected peer's socket writer
#[derive(Clone, Default)]
pub struct PeerHub {
    peers: Arc<DashMap<ConnectionId, MessageSender>>,
}

impl PeerHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer and return the receiving end of its outbound queue
    pub fn subscribe(&self, connection_id: ConnectionId) -> mpsc::UnboundedReceiver<ServerMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.insert(connection_id.clone(), tx);

        info!(
            connection_id = %connection_id,
            total_peers = self.peers.len(),
            "Peer subscribed"
        );
        rx
    }

    pub fn unsubscribe(&self, connection_id: &ConnectionId) {
        if self.peers.remove(connection_id).is_some() {
            debug!(connection_id = %connection_id, "Peer unsubscribed");
        }
    }

    /// Queue a message for one peer. Returns false if the peer is gone.
    pub fn send_to(&self, connection_id: &ConnectionId, message: ServerMessage) -> bool {
        let delivered = self
            .peers
            .get(connection_id)
            .is_some_and(|sender| sender.send(message).is_ok());

        if !delivered {
            debug!(connection_id = %connection_id, "Dropping message for departed peer");
        }
        delivered
    }

    /// Queue a message for every peer in `audience`. Returns how many were reached.
    pub fn broadcast(&self, audience: &Audience, message: &ServerMessage) -> usize {
        let mut sent_count = 0;
        let mut failed_connections = Vec::new();

        for peer in self.peers.iter() {
            if !audience.includes(peer.key()) {
                continue;
            }
            match peer.value().send(message.clone()) {
                Ok(()) => sent_count += 1,
                Err(err) => {
                    warn!(
                        connection_id = %peer.key(),
                        error = %err,
                        "Failed to queue message, dropping peer"
                    );
                    failed_connections.push(peer.key().clone());
                }
            }
        }

        // Removal must wait until the iterator's shard locks are released
        for connection_id in failed_connections {
            self.unsubscribe(&connection_id);
        }

        sent_count
    }

    /// Fan out a coordinator notification
    pub fn deliver(&self, notification: &Notification) -> usize {
        let message = ServerMessage::from_session_event(&notification.event);
        self.broadcast(&notification.audience, &message)
    }

    pub fn deliver_all(&self, notifications: &[Notification]) {
        for notification in notifications {
            self.deliver(notification);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
