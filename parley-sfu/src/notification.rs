//! Broadcasts produced by coordinator operations
//!
//! Operations never push to peers themselves. They return the events they
//! caused alongside their result and the signaling layer fans them out.

use serde::{Deserialize, Serialize};

use crate::types::{ConnectionId, MediaKind, ProducerId};

/// Who should receive a notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    Everyone,
    AllExcept(ConnectionId),
    Only(ConnectionId),
}

impl Audience {
    #[must_use]
    pub fn includes(&self, connection: &ConnectionId) -> bool {
        match self {
            Self::Everyone => true,
            Self::AllExcept(excluded) => excluded != connection,
            Self::Only(target) => target == connection,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A connection started publishing a stream others may consume
    ProducerAvailable {
        producer_id: ProducerId,
        kind: MediaKind,
        source: Option<String>,
        connection_id: ConnectionId,
    },
    /// A producer was closed by its owner's teardown
    ProducerClosed { producer_id: ProducerId },
    /// A peer announced that one of its streams ended; relayed as sent
    PeerProducerClosed {
        connection_id: ConnectionId,
        data: serde_json::Value,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub audience: Audience,
    pub event: SessionEvent,
}

impl Notification {
    #[must_use]
    pub const fn new(audience: Audience, event: SessionEvent) -> Self {
        Self { audience, event }
    }
}

/// Result of an operation together with the notifications it caused
#[derive(Debug)]
pub struct Outcome<T> {
    pub value: T,
    pub notifications: Vec<Notification>,
}

impl<T> Outcome<T> {
    #[must_use]
    pub const fn quiet(value: T) -> Self {
        Self {
            value,
            notifications: Vec::new(),
        }
    }

    #[must_use]
    pub const fn with(value: T, notifications: Vec<Notification>) -> Self {
        Self {
            value,
            notifications,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audience_includes() {
        let alice = ConnectionId::from("alice");
        let bob = ConnectionId::from("bob");

        assert!(Audience::Everyone.includes(&alice));
        assert!(!Audience::AllExcept(alice.clone()).includes(&alice));
        assert!(Audience::AllExcept(alice.clone()).includes(&bob));
        assert!(Audience::Only(bob.clone()).includes(&bob));
        assert!(!Audience::Only(bob).includes(&alice));
    }

    #[test]
    fn test_outcome_constructors() {
        let outcome = Outcome::quiet(7);
        assert_eq!(outcome.value, 7);
        assert!(outcome.notifications.is_empty());

        let event = SessionEvent::ProducerClosed {
            producer_id: ProducerId::from("p-1"),
        };
        let outcome = Outcome::with((), vec![Notification::new(Audience::Everyone, event.clone())]);
        assert_eq!(outcome.notifications[0].event, event);
    }
}
