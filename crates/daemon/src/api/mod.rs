use axum::{extract::State, http::HeaderValue, response::Json, routing::get, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::db::MetadataStore;
use crate::generation::Orchestrator;
use crate::storage::BlobStore;

pub mod envelope;
pub mod error;
pub mod videos;

pub use envelope::Envelope;
pub use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<MetadataStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub environment: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: DateTime<Utc>,
    environment: String,
    version: &'static str,
    database: bool,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now(),
        environment: state.environment.clone(),
        version: env!("CARGO_PKG_VERSION"),
        database: state.db.is_ready(),
    })
}

/// The full HTTP surface: `/health` plus `/api/videos/*`.
pub fn app(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(state.clone())
        .nest("/api/videos", videos::router(state))
        .layer(TraceLayer::new_for_http())
        .layer(cors(cors_origins))
}

fn cors(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any)
        .allow_credentials(false);

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        layer.allow_origin(AllowOrigin::list(origins))
    }
}
