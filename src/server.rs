//! HTTP surface: the fixed `/api/v1/*` endpoint set from the external
//! interfaces spec, served behind permissive CORS and request tracing.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use futures::stream::Stream;
use futures::StreamExt;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::AfeConfig;
use crate::error::Result;
use crate::orchestrator::{ChatOrchestrator, ChatRequest};
use crate::plugin::registry::PluginRegistry;
use crate::status::StatusControlPlane;

#[derive(Clone)]
pub struct AppState {
    pub registry: PluginRegistry,
    pub orchestrator: Arc<ChatOrchestrator>,
    pub status_plane: Arc<StatusControlPlane>,
}

pub struct AfeServer {
    config: AfeConfig,
    state: AppState,
}

impl AfeServer {
    pub fn new(config: AfeConfig, registry: PluginRegistry, orchestrator: Arc<ChatOrchestrator>, status_plane: Arc<StatusControlPlane>) -> Self {
        Self { config, state: AppState { registry, orchestrator, status_plane } }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/v1/health", get(health))
            .route("/api/v1/status", get(status))
            .route("/api/v1/chat", axum::routing::post(chat))
            .route("/api/v1/agents", get(agents))
            .route("/api/v1/events", get(events))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    pub async fn start(self) -> Result<()> {
        let app = self.router();
        let addr = format!("{}:{}", self.config.server.host, self.config.server.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("HTTP API listening on {}", listener.local_addr()?);
        axum::serve(listener, app).await?;
        Ok(())
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.status_plane.current_status().await)
}

async fn chat(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> impl IntoResponse {
    match state.orchestrator.chat(request).await {
        Ok(response) => (axum::http::StatusCode::OK, Json(serde_json::to_value(response).unwrap())).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn agents(State(state): State<AppState>) -> impl IntoResponse {
    let names = state.registry.list_agents();
    Json(json!({ "agents": names, "count": state.registry.agent_count() }))
}

/// Server-push event stream. Emits a `welcome` event on connect, then
/// forwards every `chat_start`/`chat_complete` broadcast from the
/// orchestrator as its own JSON document.
async fn events(State(state): State<AppState>) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let welcome = futures::stream::once(async {
        Ok(Event::default().json_data(json!({
            "type": "welcome",
            "timestamp": chrono::Utc::now(),
        })).unwrap())
    });

    let receiver = state.orchestrator.subscribe();
    let forwarded = tokio_stream::wrappers::BroadcastStream::new(receiver).filter_map(|item| async move {
        match item {
            Ok(event) => Some(Ok(Event::default().json_data(event).unwrap())),
            Err(_) => None,
        }
    });

    Sse::new(welcome.chain(forwarded)).keep_alive(axum::response::sse::KeepAlive::new().interval(Duration::from_secs(15)))
}
