//! Common types used throughout the session core

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier of one peer session, assigned by the signaling transport
    ConnectionId
);
string_id!(
    /// Identifier of a transport, assigned by the routing engine
    TransportId
);
string_id!(
    /// Identifier of a producer, assigned by the routing engine
    ProducerId
);
string_id!(
    /// Identifier of a consumer, assigned by the routing engine
    ConsumerId
);

/// Media kind of a producer or consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction hint supplied when a transport is created. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum TransportRole {
    Send,
    Recv,
    #[default]
    Unspecified,
}

impl From<&str> for TransportRole {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "send" | "producer" => Self::Send,
            "recv" | "receive" | "consumer" => Self::Recv,
            _ => Self::Unspecified,
        }
    }
}

impl From<String> for TransportRole {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

/// Negotiation state of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Closed,
}
