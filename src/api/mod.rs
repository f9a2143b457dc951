//! HTTP surface: JSON endpoints for the operations in `spec.md` §4, plus
//! the `/events` SSE adapter (component K). See `SPEC_FULL.md` §6.

pub mod routes;
pub mod session;
pub mod sse;
pub mod state;

pub use state::AppState;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(routes::router())
        .merge(sse::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
