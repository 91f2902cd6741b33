//! HTTP server.
//!
//! Exposes the manifest pipeline, definition lookups, assembled builds, and
//! the static JSON resources as a small JSON API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/api/` | Front page message |
//! | `GET`  | `/api/sup/` | Greeting |
//! | `GET`  | `/api/gamesshow` | Trivia question set |
//! | `GET`  | `/api/cards` | Portfolio cards |
//! | `GET`  | `/api/destiny/generatemanifest/` | Refresh the lookup store from Bungie |
//! | `GET`  | `/api/destiny/query/{table}/{hash}` | Look up one definition |
//! | `GET`  | `/api/destiny/builds/` | Curated builds with resolved definitions |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! Failures are reported as
//!
//! ```json
//! { "error": { "code": "upstream", "message": "request to ... returned HTTP 503" } }
//! ```
//!
//! Manifest refresh codes map to statuses: `transport`, `upstream` and
//! `decode` → 502, `timeout` → 504, `duplicate_hash` → 409, everything else
//! → 500. Lookups never use this shape; they always answer with a
//! [`QueryOutcome`] (200 found, 404 not found, 503 unavailable).
//!
//! # CORS
//!
//! With no `allowed_origins` (or a `"*"` entry) any origin is allowed without
//! credentials; otherwise only the listed origins, with credentials.

use axum::{
    extract::{Path, State},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{error, info, warn};

use crate::builds::{self, AssembledBuilds};
use crate::config::{Config, ServerConfig};
use crate::error::ManifestError;
use crate::lookup::{self, QueryOutcome};
use crate::pipeline::{self, PipelineReport};
use crate::progress::NoProgress;
use crate::resources::{self, Cards, Question, ResourceError};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    /// Held for the duration of a refresh so concurrent triggers run one at a time.
    refresh_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            refresh_lock: Arc::new(Mutex::new(())),
        }
    }
}

/// Builds the router with all routes and the CORS layer.
pub fn build_router(config: Config) -> Router {
    let cors = cors_layer(&config.server);

    Router::new()
        .route("/api/", get(handle_front))
        .route("/api/sup/", get(handle_sup))
        .route("/api/gamesshow", get(handle_trivia))
        .route("/api/cards", get(handle_cards))
        .route("/api/destiny/generatemanifest/", get(handle_generate))
        .route("/api/destiny/query/{table}/{hash}", get(handle_query))
        .route("/api/destiny/builds/", get(handle_builds))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState::new(config))
}

fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::PUT, Method::DELETE];

    if server.allows_any_origin() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = server
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(methods)
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_credentials(true)
}

/// Starts the HTTP server on `[server].bind` and runs until Ctrl+C or SIGTERM.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = build_router(config.clone());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("projector listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                warn!(error = %e, "unable to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                warn!(error = %e, "unable to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<ManifestError> for AppError {
    fn from(err: ManifestError) -> Self {
        let status = match err.kind() {
            "timeout" => StatusCode::GATEWAY_TIMEOUT,
            "transport" | "upstream" | "decode" => StatusCode::BAD_GATEWAY,
            "duplicate_hash" => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error!(kind = err.kind(), retryable = err.is_retryable(), error = %err, "manifest refresh failed");
        AppError {
            status,
            code: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<ResourceError> for AppError {
    fn from(err: ResourceError) -> Self {
        error!(error = %err, "resource unavailable");
        AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "resource".to_string(),
            message: err.to_string(),
        }
    }
}

// ============ Static handlers ============

#[derive(Serialize)]
struct Message {
    response: String,
}

async fn handle_front() -> Json<Message> {
    Json(Message {
        response: "This is the frontpage".to_string(),
    })
}

async fn handle_sup() -> Json<Message> {
    Json(Message {
        response: "Sup ✋".to_string(),
    })
}

async fn handle_trivia(State(state): State<AppState>) -> Result<Json<Vec<Question>>, AppError> {
    Ok(Json(resources::load_trivia(&state.config.resources.dir).await?))
}

async fn handle_cards(State(state): State<AppState>) -> Result<Json<Cards>, AppError> {
    Ok(Json(resources::load_cards(&state.config.resources.dir).await?))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Manifest handlers ============

/// Handler for `GET /api/destiny/generatemanifest/`.
///
/// Runs the full refresh inside the request. If the client goes away the
/// request future is dropped, which aborts any in-flight upstream request
/// and rolls back an uncommitted refresh.
async fn handle_generate(
    State(state): State<AppState>,
) -> Result<Json<PipelineReport>, AppError> {
    let _refresh = state.refresh_lock.lock().await;
    let report = pipeline::generate_manifest(&state.config.manifest, &NoProgress).await?;
    Ok(Json(report))
}

/// Handler for `GET /api/destiny/query/{table}/{hash}`.
async fn handle_query(
    State(state): State<AppState>,
    Path((table, hash)): Path<(String, String)>,
) -> (StatusCode, Json<QueryOutcome>) {
    let outcome = lookup::query(&state.config.manifest.lookup_db, &hash, &table).await;
    let status = match outcome {
        QueryOutcome::Found { .. } => StatusCode::OK,
        QueryOutcome::NotFound { .. } => StatusCode::NOT_FOUND,
        QueryOutcome::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(outcome))
}

/// Handler for `GET /api/destiny/builds/`.
async fn handle_builds(State(state): State<AppState>) -> Result<Json<AssembledBuilds>, AppError> {
    let builds = builds::assemble_builds(
        &state.config.resources.dir,
        &state.config.manifest.lookup_db,
    )
    .await?;
    Ok(Json(builds))
}
