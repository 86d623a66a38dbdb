//! HTTP service routers for the pipeline stages and the orchestrator
//!
//! Each service is an independent axum application sharing the surfaces all
//! stages expose: a health probe and a traversal-checked file server over
//! the data root.

pub mod llm;
pub mod orchestrator;
pub mod stt;
pub mod tts;

use std::path::{Path as FsPath, PathBuf};

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::paths::ArtifactPath;

/// Common error type for stage service handlers
#[derive(Debug)]
pub enum ServiceError {
    /// Malformed or missing request input (400)
    BadRequest(String),
    /// Requested resource does not exist (404)
    NotFound(String),
    /// Path resolves outside the data root (403)
    Forbidden(String),
    /// External engine unreachable or erroring (500)
    Engine(String),
    /// Anything else (500)
    Internal(String),
}

impl From<crate::Error> for ServiceError {
    fn from(e: crate::Error) -> Self {
        match e {
            crate::Error::InvalidId(msg) => Self::BadRequest(msg),
            crate::Error::NotFound(msg) => Self::NotFound(msg),
            crate::Error::Stt(msg) | crate::Error::Llm(msg) | crate::Error::Tts(msg) => {
                Self::Engine(msg)
            }
            crate::Error::Http(e) => Self::Engine(e.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: ErrorBody,
        }

        #[derive(Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: String,
        }

        let (status, code, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg),
            Self::Engine(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "engine_failed", msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", msg),
        };

        (status, Json(ErrorResponse { error: ErrorBody { code, message } })).into_response()
    }
}

/// Read a multipart text field, mapping decode errors to 400
pub(crate) async fn multipart_text(
    field: axum::extract::multipart::Field<'_>,
) -> Result<String, ServiceError> {
    field
        .text()
        .await
        .map_err(|e| ServiceError::BadRequest(e.to_string()))
}

/// Stage health response
#[derive(Serialize)]
struct StageHealth {
    service: &'static str,
    ts: f64,
}

/// Build the `/healthz` router shared by the stage services
pub fn health_router(service: &'static str) -> Router {
    Router::new().route(
        "/healthz",
        get(move || async move {
            Json(StageHealth {
                service,
                ts: crate::timeline::epoch_now(),
            })
        }),
    )
}

/// Build the `/files/{path}` router serving artifacts under the data root
pub fn files_router(data_root: PathBuf) -> Router {
    Router::new()
        .route("/files/{*path}", get(fetch_file))
        .with_state(data_root)
}

async fn fetch_file(
    State(data_root): State<PathBuf>,
    Path(path): Path<String>,
) -> Result<Response, ServiceError> {
    serve_data_file(&data_root, &path).await
}

/// Serve a file addressed relative to the data root.
///
/// Paths that resolve outside the root are rejected before touching the
/// filesystem.
pub async fn serve_data_file(data_root: &FsPath, raw: &str) -> Result<Response, ServiceError> {
    let artifact = ArtifactPath::from_request(data_root, raw)
        .map_err(|_| ServiceError::Forbidden(format!("path escapes data root: {raw}")))?;
    let absolute = artifact.absolute(data_root);

    if !absolute.is_file() {
        return Err(ServiceError::NotFound(format!("no such file: {artifact}")));
    }

    let bytes = tokio::fs::read(&absolute)
        .await
        .map_err(|e| ServiceError::Internal(e.to_string()))?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        bytes,
    )
        .into_response())
}
