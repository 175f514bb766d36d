use thiserror::Error;

use crate::types::{ConnectionId, ProducerId, TransportId};

/// Failures reported by a routing engine implementation
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    #[error("Engine request failed: {0}")]
    Request(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Resource already closed: {0}")]
    Closed(String),

    #[error("Engine unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidParameters(err.to_string())
    }
}

/// Session coordinator errors, returned to the requesting peer only
#[derive(Error, Debug)]
pub enum SfuError {
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error("Connection already registered: {0}")]
    DuplicateConnection(ConnectionId),

    #[error("Transport not found: {0}")]
    TransportNotFound(String),

    #[error("Producer not found: {0}")]
    ProducerNotFound(ProducerId),

    #[error("Routing engine unavailable: router not initialized")]
    RoutingEngineUnavailable,

    #[error("Routing engine error: {0}")]
    Engine(#[from] EngineError),
}

impl SfuError {
    pub(crate) fn transport_not_found(id: Option<&TransportId>) -> Self {
        Self::TransportNotFound(
            id.map_or_else(|| "no transport for connection".to_string(), ToString::to_string),
        )
    }

    /// Stable code reported to peers in failure responses
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::UnknownConnection(_) => "UNKNOWN_CONNECTION",
            Self::DuplicateConnection(_) => "DUPLICATE_CONNECTION",
            Self::TransportNotFound(_) => "TRANSPORT_NOT_FOUND",
            Self::ProducerNotFound(_) => "PRODUCER_NOT_FOUND",
            Self::RoutingEngineUnavailable => "ROUTING_ENGINE_UNAVAILABLE",
            Self::Engine(_) => "ENGINE_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, SfuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            SfuError::UnknownConnection(ConnectionId::from("c")).code(),
            "UNKNOWN_CONNECTION"
        );
        assert_eq!(SfuError::transport_not_found(None).code(), "TRANSPORT_NOT_FOUND");
        assert_eq!(
            SfuError::from(EngineError::Request("boom".into())).code(),
            "ENGINE_ERROR"
        );
    }

    #[test]
    fn test_transport_not_found_message() {
        let err = SfuError::transport_not_found(Some(&TransportId::from("t-1")));
        assert_eq!(err.to_string(), "Transport not found: t-1");
    }
}
