use anyhow::{anyhow, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::{error, info};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use crate::fetch::Fetcher;
use crate::storage::DocumentSlot;
use crate::sync::{CancelToken, SyncPipeline, SyncStatus};

const CALENDAR_CONTENT_TYPE: &str = "text/calendar; charset=utf-8";

// API state that will be shared across handlers
pub struct ApiState<F: Fetcher> {
    pub pipeline: Arc<SyncPipeline<F>>,
}

impl<F: Fetcher> ApiState<F> {
    pub fn new(pipeline: Arc<SyncPipeline<F>>) -> Self {
        Self { pipeline }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub merged_available: bool,
    pub translated_available: bool,
}

// General API response
#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(ApiResponse { success: false, message })).into_response()
}

async fn health_check<F: Fetcher + 'static>(State(state): State<Arc<ApiState<F>>>) -> Json<HealthResponse> {
    let store = state.pipeline.store();
    let exists = |slot| matches!(store.load(slot), Ok(Some(_)));
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        merged_available: exists(DocumentSlot::Merged),
        translated_available: exists(DocumentSlot::Translated),
    })
}

async fn sync_handler<F: Fetcher + 'static>(State(state): State<Arc<ApiState<F>>>) -> Response {
    info!("Sync requested over HTTP");
    match state.pipeline.run(&CancelToken::never()).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => {
            error!("Sync failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

// Last finished run with per-source outcomes; `null` before the first one
async fn sync_status_handler<F: Fetcher + 'static>(
    State(state): State<Arc<ApiState<F>>>,
) -> Json<Option<SyncStatus>> {
    Json(state.pipeline.status())
}

fn serve_document<F: Fetcher>(state: &ApiState<F>, slot: DocumentSlot) -> Response {
    match state.pipeline.store().load(slot) {
        Ok(Some(body)) => ([(header::CONTENT_TYPE, CALENDAR_CONTENT_TYPE)], body).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "Calendar has not been synced yet".to_string()),
        Err(e) => {
            error!("Failed to load document: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn merged_calendar_handler<F: Fetcher + 'static>(State(state): State<Arc<ApiState<F>>>) -> Response {
    serve_document(&state, DocumentSlot::Merged)
}

async fn translated_calendar_handler<F: Fetcher + 'static>(State(state): State<Arc<ApiState<F>>>) -> Response {
    serve_document(&state, DocumentSlot::Translated)
}

pub fn router<F: Fetcher + 'static>(state: Arc<ApiState<F>>) -> Router {
    // Configure CORS
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/healthz", get(health_check::<F>))
        .route("/sync", post(sync_handler::<F>))
        .route("/sync/status", get(sync_status_handler::<F>))
        .route("/calendar.ics", get(merged_calendar_handler::<F>))
        .route("/calendar-fr.ics", get(translated_calendar_handler::<F>))
        .layer(cors)
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn start_api_server<F, S>(state: Arc<ApiState<F>>, addr: &str, shutdown: S) -> Result<()>
where
    F: Fetcher + 'static,
    S: Future<Output = ()> + Send + 'static,
{
    let app = router(state);

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow!("Failed to bind to address {}: {}", addr, e))?;

    info!("API server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| anyhow!("Failed to start API server: {}", e))?;

    info!("API server stopped");
    Ok(())
}
