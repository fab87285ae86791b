//! voxbridge HTTP server.
//!
//! Receives call webhooks from the messaging provider, answers the calls and
//! bridges their audio to a conversation engine through a [`CallRegistry`].

pub mod assistant;
pub mod config;
pub mod engine;
pub mod media;
pub mod signaling;
pub mod webhook;

use axum::{
    extract::Extension,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use voxbridge_call::{Capabilities, CallRegistry};

use crate::config::Config;
use crate::engine::RealtimeConnector;
use crate::media::SimulatedMedia;
use crate::signaling::GraphSignaling;

/// Shared application state.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Live calls.
    pub registry: CallRegistry,
    /// Shared secret inbound webhooks must present.
    pub webhook_secret: String,
}

impl AppState {
    /// Wires the production adapters from configuration.
    pub fn from_config(config: &Config) -> Self {
        let capabilities = Capabilities::new(
            Arc::new(GraphSignaling::new(
                config.signaling.api_base_url.clone(),
                config.signaling.access_token.clone(),
            )),
            Arc::new(SimulatedMedia::new()),
            Arc::new(RealtimeConnector::new(
                config.engine.url.clone(),
                config.engine.api_key.clone(),
            )),
        );

        Self {
            registry: CallRegistry::new(capabilities, config.call.clone()),
            webhook_secret: config.signaling.webhook_secret.clone(),
        }
    }
}

/// Health check handler.
async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "voxbridge",
        "active_calls": state.registry.active_count(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhook", post(webhook::webhook_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(state))
}
