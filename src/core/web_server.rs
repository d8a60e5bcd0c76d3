//! HTTP surface of the service.
//!
//! Routes:
//! - `POST /formats`                      list formats for a URL
//! - `POST /download`, `/download-video`  retrieve as attachment or stream
//! - `POST /process`                      retrieve into the file store
//! - `GET /files`, `GET|DELETE /files/{name}`
//! - `GET /health`, `GET /metrics`

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, ConnectInfo, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::{IpAddr, SocketAddr};
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tower_http::cors::{Any, CorsLayer};

use crate::core::config::ServerConfig;
use crate::core::error::{AppError, AppResult};
use crate::core::metrics;
use crate::download::orchestrator::{Delivery, Orchestrator, RetrievalRequest, DEFAULT_EXTENSION};
use crate::download::{ytdlp, DeliveryMode, FormatDescriptor};
use crate::storage::files::StoredFile;

/// Shared state for the web server.
#[derive(Debug, Clone)]
pub struct AppState {
    orchestrator: Orchestrator,
    default_mode: DeliveryMode,
    trust_forwarded_for: bool,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, config: &ServerConfig) -> Self {
        Self {
            orchestrator,
            default_mode: config.default_delivery_mode,
            trust_forwarded_for: config.trust_forwarded_for,
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }
}

#[derive(Debug, Deserialize)]
struct FormatsBody {
    #[serde(default, alias = "videoUrl")]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DownloadBody {
    #[serde(default, alias = "videoUrl")]
    url: Option<String>,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    mode: Option<DeliveryMode>,
}

#[derive(Debug, Serialize)]
struct FormatsResponse {
    formats: Vec<FormatDescriptor>,
}

#[derive(Debug, Serialize)]
struct ProcessResponse {
    file_name: String,
    download_url: String,
    size: u64,
}

#[derive(Debug, Serialize)]
struct FilesResponse {
    files: Vec<StoredFile>,
}

/// Builds the router with permissive CORS.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([header::CONTENT_DISPOSITION, header::RETRY_AFTER]);

    Router::new()
        .route("/formats", post(formats_handler))
        .route("/download", post(download_handler))
        .route("/download-video", post(download_handler))
        .route("/process", post(process_handler))
        .route("/files", get(list_files_handler))
        .route("/files/{name}", get(get_file_handler).delete(delete_file_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(cors)
        .with_state(state)
}

/// Prepares directories, checks the extractor and serves until Ctrl+C.
pub async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::from_config(&config);
    orchestrator
        .scratch()
        .prepare()
        .map_err(|e| anyhow::anyhow!("Scratch directory unusable: {}", e))?;
    orchestrator
        .store()
        .prepare()
        .map_err(|e| anyhow::anyhow!("Store directory unusable: {}", e))?;

    ytdlp::log_extractor_status(&config.extractor).await;

    let app = create_router(AppState::new(orchestrator, &config));
    let listener = TcpListener::bind(config.bind_addr).await?;

    log::info!("Starting web server on http://{}", listener.local_addr()?);
    log::info!("  POST /formats          - List formats");
    log::info!("  POST /download         - Retrieve media (alias /download-video)");
    log::info!("  POST /process          - Retrieve into the file store");
    log::info!("  GET  /files            - Browse stored files");
    log::info!("  GET  /health, /metrics - Liveness and Prometheus metrics");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("Web server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!("Shutdown requested, draining connections");
}

/// Client identity for rate limiting: the peer address, or the first
/// `X-Forwarded-For` hop when the proxy is trusted.
pub fn client_identity(peer: SocketAddr, headers: &HeaderMap, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .and_then(|hop| hop.trim().parse::<IpAddr>().ok());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }
    peer.ip().to_string()
}

/// Unwraps a JSON body. A malformed body still counts against the rate limit
/// and is reported as `InvalidInput`.
fn parse_body<T>(state: &AppState, identity: &str, body: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    match body {
        Ok(Json(body)) => Ok(body),
        Err(rejection) => {
            state.orchestrator.limiter().allow(identity)?;
            Err(AppError::InvalidInput(rejection.body_text()))
        }
    }
}

/// POST /formats
async fn formats_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Result<Json<FormatsBody>, JsonRejection>,
) -> AppResult<Json<FormatsResponse>> {
    let identity = client_identity(peer, &headers, state.trust_forwarded_for);
    let body = parse_body(&state, &identity, body)?;

    let request = RetrievalRequest::new(body.url.unwrap_or_default(), None, identity);
    let formats = state.orchestrator.list_formats(&request).await?;
    Ok(Json(FormatsResponse { formats }))
}

/// POST /download and /download-video
async fn download_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Result<Json<DownloadBody>, JsonRejection>,
) -> AppResult<Response> {
    let identity = client_identity(peer, &headers, state.trust_forwarded_for);
    let body = parse_body(&state, &identity, body)?;

    let request = RetrievalRequest::new(body.url.unwrap_or_default(), body.format, identity)
        .with_mode(body.mode.unwrap_or(state.default_mode));
    let delivery = state.orchestrator.retrieve(&request).await?;
    delivery_response(delivery).await
}

/// POST /process
async fn process_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Result<Json<DownloadBody>, JsonRejection>,
) -> AppResult<Json<ProcessResponse>> {
    let identity = client_identity(peer, &headers, state.trust_forwarded_for);
    let body = parse_body(&state, &identity, body)?;

    let request = RetrievalRequest::new(body.url.unwrap_or_default(), body.format, identity);
    let stored = state.orchestrator.persist(&request).await?;
    Ok(Json(ProcessResponse {
        download_url: format!("/files/{}", stored.name),
        file_name: stored.name,
        size: stored.size,
    }))
}

/// Turns a finished retrieval into a response whose body owns the job.
async fn delivery_response(delivery: Delivery) -> AppResult<Response> {
    match delivery {
        Delivery::File(output) => {
            let extension = output.extension().to_string();
            let size = output.size;
            let chunks = output
                .into_stream()
                .await
                .map_err(|e| AppError::DeliveryFailed(e.to_string()))?;

            attachment(
                Body::from_stream(chunks),
                &format!("video.{}", extension),
                content_type_for(&extension),
                Some(size),
            )
        }
        Delivery::Stream(stream) => attachment(
            Body::from_stream(stream),
            &format!("video.{}", DEFAULT_EXTENSION),
            "application/octet-stream",
            None,
        ),
    }
}

fn attachment(body: Body, file_name: &str, content_type: &str, length: Option<u64>) -> AppResult<Response> {
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file_name))
        .map_err(|e| AppError::DeliveryFailed(e.to_string()))?;

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_DISPOSITION, disposition);
    if let Some(length) = length {
        builder = builder.header(header::CONTENT_LENGTH, length);
    }
    builder.body(body).map_err(|e| AppError::DeliveryFailed(e.to_string()))
}

fn content_type_for(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "m4a" => "audio/mp4",
        "mp3" => "audio/mpeg",
        "opus" | "ogg" => "audio/ogg",
        "wav" => "audio/wav",
        _ => "application/octet-stream",
    }
}

/// GET /files
async fn list_files_handler(State(state): State<AppState>) -> AppResult<Json<FilesResponse>> {
    metrics::record_request("files");
    let files = state.orchestrator.store().list().await?;
    Ok(Json(FilesResponse { files }))
}

/// GET /files/{name}
async fn get_file_handler(State(state): State<AppState>, Path(name): Path<String>) -> AppResult<Response> {
    metrics::record_request("files");
    let (file, stored) = state.orchestrator.store().open(&name).await?;
    let extension = std::path::Path::new(&stored.name)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_string();
    attachment(
        Body::from_stream(ReaderStream::new(file)),
        &stored.name,
        content_type_for(&extension),
        Some(stored.size),
    )
}

/// DELETE /files/{name}
async fn delete_file_handler(State(state): State<AppState>, Path(name): Path<String>) -> AppResult<StatusCode> {
    metrics::record_request("files");
    state.orchestrator.store().delete(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /health
async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// GET /metrics (Prometheus text format)
async fn metrics_handler() -> Response {
    match metrics::render() {
        Ok((content_type, body)) => ([(header::CONTENT_TYPE, content_type)], body).into_response(),
        Err(e) => {
            log::error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
