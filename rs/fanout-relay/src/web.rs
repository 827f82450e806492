use std::sync::Arc;

use axum::{
	http::Method,
	routing::{get, post},
	Router,
};
use tower_http::cors::{Any, CorsLayer};

use fanout::Registry;

use crate::{ingest, session::Sessions, signal};

/// Shared state for the HTTP front end.
#[derive(Clone)]
pub struct AppState {
	pub registry: Registry,
	pub sessions: Arc<Sessions>,
}

/// Assemble the two public endpoints: WebSocket ingest and WebRTC signaling.
pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/ws/{stream_id}", get(ingest::upgrade))
		.route("/offer/{stream_id}", post(signal::offer))
		.layer(
			CorsLayer::new()
				.allow_origin(Any)
				.allow_methods([Method::GET, Method::POST])
				.allow_headers(Any),
		)
		.with_state(state)
}
