//! Assembles the full HTTP surface (`spec.md` §6), mirroring
//! `sem_os_server::router`'s shape: a JWT-layered group merged with a small
//! set of routes that skip it (health, webhooks — signature-verified, not
//! subject-verified).

use crate::auth::{extract_subject, JwtConfig};
use crate::handlers::{actions, dev, entities, health, views, webhooks, ws};
use crate::state::AppState;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn build(state: AppState, jwt_config: JwtConfig) -> Router {
    let authenticated = Router::new()
        .route("/api/actions/:name", post(actions::run_action))
        .route("/api/views/:name", get(views::list_view))
        .route("/api/entities/:name", get(entities::list_entity).post(entities::create_entity))
        .route("/api/entities/:name/:id", get(entities::get_entity).delete(entities::delete_entity))
        .route("/ws", get(ws::upgrade))
        .route("/_dev/websocket/:view", get(dev::websocket_subscribers))
        .route("/_dev/:section", get(dev::inspect))
        .layer(middleware::from_fn_with_state(jwt_config, extract_subject));

    let public = Router::new().route("/health", get(health::health)).route("/webhooks/:provider", post(webhooks::receive_webhook));

    Router::new().merge(authenticated).merge(public).layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()).with_state(state)
}
