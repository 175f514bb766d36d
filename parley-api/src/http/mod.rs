//! HTTP surface: WebSocket signaling endpoint and health probe

mod health;
mod websocket;

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::signaling::SignalingDispatcher;

pub use health::health_check;
pub use websocket::websocket_handler;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: SignalingDispatcher,
    /// Largest accepted signaling frame, in bytes
    pub max_message_size: usize,
}

impl AppState {
    #[must_use]
    pub const fn new(dispatcher: SignalingDispatcher, max_message_size: usize) -> Self {
        Self {
            dispatcher,
            max_message_size,
        }
    }
}

/// Build the HTTP router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .merge(health::create_health_router())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
