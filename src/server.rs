//! HTTP surface.
//!
//! - `GET /` - liveness and template availability
//! - `POST /build-apk` - multipart build submission
//! - `GET /download/:build_id` - one-time artifact download

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::Stream;
use serde::Serialize;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::artifact_store::{ArtifactStore, DownloadLease, StoreStatus};
use crate::build_id::BuildId;
use crate::coordinator::BuildCoordinator;
use crate::error::BuildError;
use crate::request::BuildRequestFields;

/// Uploaded icons and form fields together stay well below this.
const MAX_REQUEST_BYTES: usize = 16 * 1024 * 1024;

const APK_CONTENT_TYPE: &str = "application/vnd.android.package-archive";

#[derive(Clone)]
pub struct AppState {
    coordinator: Arc<BuildCoordinator>,
}

pub fn router(coordinator: Arc<BuildCoordinator>) -> Router {
    Router::new()
        .route("/", get(health_handler))
        .route("/build-apk", post(build_handler))
        .route("/download/:build_id", get(download_handler))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BYTES))
        .with_state(AppState { coordinator })
}

/// Periodically delete expired artifacts until the runtime shuts down.
pub fn spawn_sweeper(store: Arc<ArtifactStore>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let removed = store.sweep();
            if removed > 0 {
                debug!(op = "store.sweep", removed, "Expired artifacts removed");
            }
        }
    })
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    template_archive: bool,
    signing_enabled: bool,
    artifacts: StoreStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BuildResponse {
    success: bool,
    build_id: String,
    download_url: String,
    signed: bool,
    sha256: String,
    size_bytes: u64,
    message: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "APK not found")
    }
}

impl From<BuildError> for ApiError {
    fn from(err: BuildError) -> Self {
        let status = match err {
            BuildError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let coordinator = &state.coordinator;
    Json(HealthResponse {
        status: "Repack builder live",
        template_archive: coordinator.template_available(),
        signing_enabled: coordinator.config().signing.keystore_present(),
        artifacts: coordinator.store().status(),
    })
}

async fn build_handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<BuildResponse>, ApiError> {
    let fields = read_fields(multipart).await?;
    let report = state.coordinator.build(fields).await?;

    Ok(Json(BuildResponse {
        success: true,
        build_id: report.build_id.to_string(),
        download_url: report.download_url(),
        signed: report.signed,
        sha256: report.sha256,
        size_bytes: report.size_bytes,
        message: "APK built and ready",
    }))
}

async fn download_handler(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = BuildId::parse(&raw_id).ok_or_else(ApiError::not_found)?;
    let lease = state.coordinator.store().checkout(&id).map_err(|e| {
        debug!(op = "download.miss", build_id = %id, error = %e, "No artifact to serve");
        ApiError::not_found()
    })?;

    // On failure the lease drops here and the artifact stays downloadable.
    let file = tokio::fs::File::open(lease.path()).await.map_err(|e| {
        warn!(
            op = "download.open_failed",
            build_id = %id,
            path = %lease.path().display(),
            error = %e,
            "Failed to open artifact"
        );
        ApiError::not_found()
    })?;
    let length = file.metadata().await.ok().map(|m| m.len());
    let file_name = lease.file_name();
    info!(op = "download.start", build_id = %id, file = %file_name, "Serving artifact");

    let body = LeasedStream::new(ReaderStream::new(file), lease, length);
    let mut response = Body::from_stream(body).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(APK_CONTENT_TYPE));
    let disposition = format!("attachment; filename=\"{file_name}\"");
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Some(length) = length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }
    Ok(response)
}

async fn read_fields(mut multipart: Multipart) -> Result<BuildRequestFields, ApiError> {
    let bad_request = |e: axum::extract::multipart::MultipartError| {
        ApiError::new(StatusCode::BAD_REQUEST, format!("invalid form data: {e}"))
    };

    let mut fields = BuildRequestFields::default();
    while let Some(field) = multipart.next_field().await.map_err(bad_request)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "iconFile" => fields.icon = Some(field.bytes().await.map_err(bad_request)?.to_vec()),
            "appName" => fields.app_name = Some(field.text().await.map_err(bad_request)?),
            "remoteHost" => fields.remote_host = Some(field.text().await.map_err(bad_request)?),
            "remotePort" => fields.remote_port = Some(field.text().await.map_err(bad_request)?),
            "backendUrl" => fields.backend_url = Some(field.text().await.map_err(bad_request)?),
            "packageName" => fields.package_name = Some(field.text().await.map_err(bad_request)?),
            other => debug!(op = "build.unknown_field", field = other, "Ignoring form field"),
        }
    }
    Ok(fields)
}

/// File body that completes its lease once the last byte was handed over.
///
/// With a known length the lease completes as soon as that many bytes were
/// yielded: the server stops polling a body once `Content-Length` bytes were
/// written and never asks for the end of the stream. End of stream completes
/// the lease too. If the client goes away first, the stream is dropped mid-way
/// and the lease is released without completing.
struct LeasedStream<S> {
    inner: S,
    lease: Option<DownloadLease>,
    remaining: Option<u64>,
}

impl<S> LeasedStream<S> {
    fn new(inner: S, lease: DownloadLease, length: Option<u64>) -> Self {
        Self {
            inner,
            lease: Some(lease),
            remaining: length,
        }
    }

    fn complete(&mut self) {
        if let Some(lease) = self.lease.take() {
            info!(op = "download.ok", build_id = %lease.build_id(), "Artifact delivered");
            lease.complete();
        }
    }
}

impl<S> Stream for LeasedStream<S>
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let poll = Pin::new(&mut self.inner).poll_next(cx);
        match &poll {
            Poll::Ready(Some(Ok(chunk))) => {
                let sent = chunk.len() as u64;
                let done = match self.remaining.as_mut() {
                    Some(remaining) => {
                        *remaining = remaining.saturating_sub(sent);
                        *remaining == 0
                    }
                    None => false,
                };
                if done {
                    self.complete();
                }
            }
            Poll::Ready(None) => self.complete(),
            _ => {}
        }
        poll
    }
}
