//! JSON HTTP API over the retrieval and sync layers.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/search` | Ranked hybrid/vector/keyword results |
//! | `POST` | `/context` | Token-budgeted context with citations |
//! | `POST` | `/sync` | Run one incremental sync of the notes connector |
//! | `GET`  | `/runs` | Recent sync runs, newest first |
//! | `GET`  | `/documents/{id}` | A chunked document and its chunks |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `embeddings_disabled` (400),
//! `not_found` (404), `timeout` (408), `sync_in_progress` (409),
//! `upstream` (502), `provider_unavailable` (503), `schema` (500),
//! `internal` (500).

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

use companion_recall_core::context::AssembledContext;
use companion_recall_core::error::{ProviderError, RecallError};
use companion_recall_core::models::SyncRun;
use companion_recall_core::search::{
    ContextOptions, Retriever, SearchMode, SearchOptions, SearchResponse,
};
use companion_recall_core::store::{SearchFilter, Store};

use crate::config::Config;
use crate::get::{load_document, DocumentResponse};
use crate::search::{open_retriever, parse_since};
use crate::sqlite_store::SqliteStore;
use crate::sync::sync_once;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    store: Arc<SqliteStore>,
    retriever: Arc<Retriever>,
    /// Held for the duration of a sync; concurrent requests get 409.
    sync_lock: Arc<Mutex<()>>,
}

/// Bind to `[server].bind` and serve until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let (store, retriever) = open_retriever(config).await?;

    let state = AppState {
        config: Arc::new(config.clone()),
        store: store.clone(),
        retriever: Arc::new(retriever),
        sync_lock: Arc::new(Mutex::new(())),
    };

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(bind = %bind_addr, "server listening");
    println!("recall server listening on http://{}", bind_addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    store.pool().close().await;
    Ok(())
}

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/search", post(handle_search))
        .route("/context", post(handle_context))
        .route("/sync", post(handle_sync))
        .route("/runs", get(handle_runs))
        .route("/documents/{id}", get(handle_document))
        .layer(cors)
        .with_state(state)
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

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn app_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code,
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

impl From<RecallError> for AppError {
    fn from(err: RecallError) -> Self {
        let message = err.to_string();
        match &err {
            RecallError::InvalidInput(_) => bad_request(message),
            RecallError::DocumentNotFound(_) => {
                app_error(StatusCode::NOT_FOUND, "not_found", message)
            }
            RecallError::Provider(ProviderError::Disabled) => {
                app_error(StatusCode::BAD_REQUEST, "embeddings_disabled", message)
            }
            RecallError::Provider(ProviderError::Timeout(_)) => {
                app_error(StatusCode::REQUEST_TIMEOUT, "timeout", message)
            }
            RecallError::Provider(_) => {
                app_error(StatusCode::SERVICE_UNAVAILABLE, "provider_unavailable", message)
            }
            RecallError::Upstream { .. } => app_error(StatusCode::BAD_GATEWAY, "upstream", message),
            RecallError::Schema { .. } => {
                app_error(StatusCode::INTERNAL_SERVER_ERROR, "schema", message)
            }
            RecallError::Storage(_) => {
                tracing::error!(error = %err, "storage failure");
                app_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<RecallError>() {
            Ok(recall) => recall.into(),
            Err(other) => {
                app_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", format!("{other:#}"))
            }
        }
    }
}

// ============ Request filters ============

#[derive(Debug, Default, Deserialize)]
struct FilterRequest {
    source: Option<String>,
    /// `YYYY-MM-DD`, inclusive.
    since: Option<String>,
    tag: Option<String>,
}

impl FilterRequest {
    fn to_filter(&self) -> Result<SearchFilter, AppError> {
        let since = match &self.since {
            Some(date) => Some(parse_since(date).map_err(|e| bad_request(format!("{e:#}")))?),
            None => None,
        };
        Ok(SearchFilter {
            source: self.source.clone(),
            since,
            tag: self.tag.clone(),
        })
    }
}

// ============ GET /health ============

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

// ============ POST /search ============

#[derive(Debug, Deserialize)]
struct SearchRequest {
    query: String,
    mode: Option<SearchMode>,
    top_k: Option<usize>,
    vector_weight: Option<f64>,
    keyword_weight: Option<f64>,
    #[serde(flatten)]
    filter: FilterRequest,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let weights = match (req.vector_weight, req.keyword_weight) {
        (Some(v), Some(k)) => Some((v, k)),
        (None, None) => None,
        _ => {
            return Err(bad_request(
                "vector_weight and keyword_weight must be given together",
            ))
        }
    };
    let options = SearchOptions {
        mode: req.mode,
        top_k: req.top_k,
        weights,
        filter: req.filter.to_filter()?,
    };
    Ok(Json(state.retriever.search(&req.query, &options).await?))
}

// ============ POST /context ============

#[derive(Debug, Deserialize)]
struct ContextRequest {
    query: String,
    mode: Option<SearchMode>,
    top_k: Option<usize>,
    max_tokens: Option<usize>,
    #[serde(flatten)]
    filter: FilterRequest,
}

async fn handle_context(
    State(state): State<AppState>,
    Json(req): Json<ContextRequest>,
) -> Result<Json<AssembledContext>, AppError> {
    let options = ContextOptions {
        mode: req.mode,
        top_k: req.top_k,
        max_tokens: req.max_tokens,
        filter: req.filter.to_filter()?,
    };
    Ok(Json(state.retriever.get_context(&req.query, &options).await?))
}

// ============ POST /sync ============

async fn handle_sync(State(state): State<AppState>) -> Result<Json<SyncRun>, AppError> {
    let _guard = state.sync_lock.try_lock().map_err(|_| {
        app_error(
            StatusCode::CONFLICT,
            "sync_in_progress",
            "a sync is already running",
        )
    })?;
    let cancel = AtomicBool::new(false);
    let run = sync_once(&state.config, "api", &cancel).await?;
    Ok(Json(run))
}

// ============ GET /runs ============

#[derive(Debug, Deserialize)]
struct RunsQuery {
    limit: Option<usize>,
}

async fn handle_runs(
    State(state): State<AppState>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<Vec<SyncRun>>, AppError> {
    let limit = query.limit.unwrap_or(20).clamp(1, 500);
    Ok(Json(state.store.recent_sync_runs(limit).await?))
}

// ============ GET /documents/{id} ============

async fn handle_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DocumentResponse>, AppError> {
    Ok(Json(load_document(state.store.as_ref(), &id).await?))
}
