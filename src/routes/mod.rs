//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! This module binds the websocket endpoint and the canvas REST surface under
//! a single Axum router. Websocket peers and REST callers share one
//! `AppState`, so an HTTP update reaches joined peers exactly like a
//! `canvas:update` frame would.

pub mod auth;
pub mod canvas;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Full application router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/ws", get(ws::handle_ws))
        .route("/api/dev/session", post(auth::dev_session))
        .route("/api/canvas", get(canvas::list_canvases).post(canvas::create_canvas))
        .route(
            "/api/canvas/{id}",
            get(canvas::get_canvas)
                .put(canvas::update_canvas)
                .delete(canvas::delete_canvas),
        )
        .route("/api/canvas/{id}/share", post(canvas::share_canvas))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
