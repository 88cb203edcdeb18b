pub mod api;
pub mod socket;

use axum::{
    Router,
    routing::{get, post},
};

use crate::state::AppState;

pub use api::{ErrorResponse, error_response};
pub use socket::ws_handler;

/// Every route, without transport layers such as CORS
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::health_check))
        .route("/ws", get(socket::ws_handler))
        // Discovery and relationships
        .route("/api/discover", post(api::discover))
        .route("/api/like", post(api::like))
        .route("/api/unmatch", post(api::unmatch))
        .route("/api/block", post(api::block))
        .route("/api/buzz", post(api::buzz))
        // Read-only views
        .route("/api/presence/{user_id}", get(api::presence))
        .route("/api/meet/{user_id}/{peer_id}", get(api::meet_session))
        .route("/api/notifications/{user_id}", get(api::notifications))
        .with_state(state)
}
