//! HTTP surface of the analysis pipeline.
//!
//! - `POST /analyze` multipart upload, field `file`
//! - `POST /analyze/url` JSON body `{"image_url": ...}`
//! - `GET /health`

use anyhow::Context;
use axum::{
    extract::{multipart::MultipartError, rejection::JsonRejection, DefaultBodyLimit, Multipart, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::errors::MedSegError;
use crate::pipeline::{AnalysisPipeline, AnalysisRequest, AnalysisResult};

/// Room for multipart boundaries and headers on top of the image itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: AnalysisPipeline,
    pub max_image_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeUrlRequest {
    pub image_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub device: String,
}

/// Error returned by the handlers. Server-side failures never leak details.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    PayloadTooLarge,
    Internal,
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::PayloadTooLarge => {
                (StatusCode::PAYLOAD_TOO_LARGE, "Image too large".to_string())
            }
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Analysis failed".to_string(),
            ),
        };
        (status, Json(ErrorBody { detail })).into_response()
    }
}

impl From<MedSegError> for ApiError {
    fn from(err: MedSegError) -> Self {
        if err.is_validation() {
            warn!("Rejected analysis request: {}", err);
            return ApiError::BadRequest(err.to_string());
        }
        error!("Analysis failed: {:#}", anyhow::Error::from(err));
        ApiError::Internal
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge
        } else {
            ApiError::BadRequest(err.body_text())
        }
    }
}

pub fn create_app(pipeline: AnalysisPipeline, config: &Config) -> Router {
    let state = AppState {
        pipeline,
        max_image_bytes: config.max_image_bytes,
    };
    let body_limit = config.max_image_bytes.saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/analyze",
            post(analyze_handler).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/analyze/url", post(analyze_url_handler))
        .layer(cors_layer(&config.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o.trim() == "*") {
        AllowOrigin::mirror_request()
    } else {
        AllowOrigin::list(origins.iter().filter_map(|origin| {
            HeaderValue::from_str(origin.trim())
                .map_err(|_| warn!("Ignoring invalid CORS origin {:?}", origin))
                .ok()
        }))
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        device: state.pipeline.device(),
    })
}

async fn analyze_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<AnalysisResult>, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("file") {
            upload = Some(field.bytes().await?);
            break;
        }
    }

    let data = upload.ok_or_else(|| {
        ApiError::BadRequest("Provide multipart field 'file' with an image".to_string())
    })?;
    if data.len() > state.max_image_bytes {
        return Err(ApiError::PayloadTooLarge);
    }

    let result = state
        .pipeline
        .run(AnalysisRequest::from_bytes(data.to_vec()))
        .await?;
    Ok(Json(result))
}

async fn analyze_url_handler(
    State(state): State<AppState>,
    payload: Result<Json<AnalyzeUrlRequest>, JsonRejection>,
) -> Result<Json<AnalysisResult>, ApiError> {
    let Json(body) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let result = state
        .pipeline
        .run(AnalysisRequest::from_url(body.image_url))
        .await?;
    Ok(Json(result))
}

/// Binds, preloads the model, serves until Ctrl-C/SIGTERM, then releases the model.
pub async fn serve(config: &Config, pipeline: AnalysisPipeline) -> anyhow::Result<()> {
    let preload = pipeline.clone();
    tokio::task::spawn_blocking(move || preload.preload())
        .await
        .context("model preload task failed")?;

    let app = create_app(pipeline.clone(), config);
    let address = config.bind_address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;
    info!("Medical image API listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    pipeline.release();
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
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
    info!("Shutdown signal received");
}
