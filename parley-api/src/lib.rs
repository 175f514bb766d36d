//! Parley signaling server
//!
//! Configuration, logging, the signaling protocol and the HTTP/WebSocket
//! surface in front of the `parley-sfu` session core.

pub mod config;
pub mod http;
pub mod logging;
pub mod relay;
pub mod signaling;

pub use config::{Config, LoggingConfig, ServerConfig};
pub use http::{create_router, AppState};
pub use logging::init_logging;
pub use signaling::{PeerHub, SignalingDispatcher};
