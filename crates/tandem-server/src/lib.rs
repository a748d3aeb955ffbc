//! Tandem server library logic.
//!
//! Wires the hub, the federation layer, and the websocket listener into
//! one axum application. Domain events enter through [`AppState::events`];
//! everything downstream — local fan-out, peer relays — hangs off that bus.

pub mod background;
pub mod config;
pub mod directory;
pub mod ws;

use std::collections::HashMap;
use std::sync::Arc;

use axum::{routing::get, Extension, Json, Router};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use tandem_federation::RemoteSites;
use tandem_hub::Hub;
use tandem_types::{DomainEvent, SiteStatus};

/// Capacity of the domain-event bus feeding the bridge and the peer relays.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Application state shared across handlers and background tasks.
#[derive(Clone)]
pub struct AppState {
    /// Session, room, and fan-out core.
    pub hub: Arc<Hub>,
    /// Configured peer sites and their snapshot caches.
    pub sites: Arc<RemoteSites>,
    /// Domain-event bus; telephony adapters publish here.
    pub events: broadcast::Sender<DomainEvent>,
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Connection status of every configured peer site.
async fn sites_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Json<HashMap<String, SiteStatus>> {
    Json(state.sites.all_sites_status().await)
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sites", get(sites_handler))
        .route("/ws", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
