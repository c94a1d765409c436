//! HTTP surface for the parsing service.

pub mod auth;
pub mod limit;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{DefaultBodyLimit, Multipart, Path as AxumPath, Request, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use uuid::Uuid;

use crate::config::Settings;
use crate::exam::{ParsedExam, ValidationResult, validate};
use crate::services::jobs::{JobConfig, JobError, JobManager};
use crate::services::llm::LlmError;
use crate::services::orchestrator::{
    DEFAULT_MODEL_SPEC, ModelSpec, Orchestrator, ParseError, ParseOptions, model_specs,
};
use limit::ApiLimiter;

const SYNC_PARSE_TIMEOUT: Duration = Duration::from_secs(60);
const QUOTA_RETRY_AFTER_SECONDS: &str = "30";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid listen address `{address}`: {source}")]
    InvalidListenAddr {
        address: String,
        #[source]
        source: std::net::AddrParseError,
    },
    #[error("failed to bind to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid CORS origin `{0}`")]
    InvalidCorsOrigin(String),
    #[error("axum server error: {source}")]
    Serve {
        #[source]
        source: std::io::Error,
    },
}

#[derive(Clone)]
pub struct AppState {
    settings: Arc<Settings>,
    api_keys: Arc<HashSet<String>>,
    orchestrator: Arc<Orchestrator>,
    jobs: JobManager,
    limiter: Arc<ApiLimiter>,
}

impl AppState {
    pub fn new(settings: Settings, orchestrator: Arc<Orchestrator>, jobs: JobManager) -> Self {
        let limiter = limit::build_limiter(settings.rate_limit_per_minute);
        let api_keys = Arc::new(settings.api_key_set());
        Self {
            settings: Arc::new(settings),
            api_keys,
            orchestrator,
            jobs,
            limiter,
        }
    }
}

/// Error reply envelope; maps the pipeline taxonomy onto HTTP statuses.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    NotFound(String),
    PayloadTooLarge(String),
    UnsupportedMedia(String),
    TooManyRequests(String),
    Quota(String),
    Timeout,
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UnsupportedMedia(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Quota(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::BadRequest(message)
            | ApiError::NotFound(message)
            | ApiError::PayloadTooLarge(message)
            | ApiError::UnsupportedMedia(message)
            | ApiError::TooManyRequests(message)
            | ApiError::Quota(message)
            | ApiError::Internal(message) => message.clone(),
            ApiError::Unauthorized => "invalid or missing API key".to_string(),
            ApiError::Timeout => {
                "parse exceeded the synchronous time limit; use /api/parse/async".to_string()
            }
        }
    }

    fn from_parse(error: ParseError) -> Self {
        match &error {
            ParseError::Input(_) | ParseError::Config(_) => ApiError::BadRequest(error.to_string()),
            ParseError::Llm(LlmError::Quota(_)) => ApiError::Quota(error.to_string()),
            _ => ApiError::Internal(error.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({"detail": self.message()}));
        let mut response = (status, body).into_response();
        if matches!(self, ApiError::Quota(_)) {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from_static(QUOTA_RETRY_AFTER_SECONDS),
            );
        }
        response
    }
}

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.settings.max_file_size_bytes() as usize + 2 * 1024 * 1024;

    let api = Router::new()
        .route("/api/models", get(list_models))
        .route("/api/parse", post(parse_sync))
        .route("/api/parse/async", post(parse_async))
        .route("/api/jobs/{job_id}", get(get_job))
        .route("/api/validate", post(validate_exam_body))
        .layer(middleware::from_fn_with_state(state.clone(), guard));

    let mut router = Router::new()
        .route("/health", get(health))
        .merge(api)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state.clone());

    match build_cors(&state.settings) {
        Ok(Some(cors)) => router = router.layer(cors),
        Ok(None) => {}
        Err(error) => tracing::warn!(%error, "ignoring invalid CORS configuration"),
    }
    router
}

fn build_cors(settings: &Settings) -> Result<Option<CorsLayer>, ServerError> {
    let origins = settings.cors_origin_list();
    if origins.is_empty() {
        return Ok(None);
    }

    let mut parsed = Vec::with_capacity(origins.len());
    for origin in origins {
        let value = origin
            .parse::<HeaderValue>()
            .map_err(|_| ServerError::InvalidCorsOrigin(origin.clone()))?;
        parsed.push(value);
    }

    Ok(Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(parsed))
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE, header::HeaderName::from_static("x-api-key")]),
    ))
}

/// Authentication and rate limiting for every `/api` route.
async fn guard(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let identity = auth::authenticate(&state.api_keys, request.headers(), request.uri())
        .map_err(|_| ApiError::Unauthorized)?;

    let key = limit::limiter_key(&identity, request.headers());
    limit::check(&state.limiter, &key)
        .map_err(|_| ApiError::TooManyRequests("rate limit exceeded".to_string()))?;

    Ok(next.run(request).await)
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn list_models() -> impl IntoResponse {
    Json(json!({"models": model_specs()}))
}

#[derive(Debug)]
struct Upload {
    pdf_bytes: Vec<u8>,
    model_spec: ModelSpec,
    skip_explain: bool,
}

async fn read_upload(mut multipart: Multipart, max_bytes: u64) -> Result<Upload, ApiError> {
    let mut pdf_bytes: Option<Vec<u8>> = None;
    let mut model = DEFAULT_MODEL_SPEC.to_string();
    let mut skip_explain = false;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|error| ApiError::BadRequest(format!("invalid multipart body: {error}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let looks_like_pdf = field.content_type() == Some("application/pdf")
                    || field
                        .file_name()
                        .map(|name| name.to_ascii_lowercase().ends_with(".pdf"))
                        .unwrap_or(false);
                if !looks_like_pdf {
                    return Err(ApiError::UnsupportedMedia(
                        "only PDF files are supported".to_string(),
                    ));
                }

                let mut buffer = Vec::new();
                while let Some(chunk) = field.chunk().await.map_err(|error| {
                    ApiError::BadRequest(format!("failed reading upload: {error}"))
                })? {
                    if (buffer.len() + chunk.len()) as u64 > max_bytes {
                        return Err(ApiError::PayloadTooLarge(format!(
                            "file exceeds {} MB limit",
                            max_bytes / 1024 / 1024
                        )));
                    }
                    buffer.extend_from_slice(&chunk);
                }
                pdf_bytes = Some(buffer);
            }
            Some("model") => {
                model = field.text().await.map_err(|error| {
                    ApiError::BadRequest(format!("invalid model field: {error}"))
                })?;
            }
            Some("skip_explain") => {
                let value = field.text().await.unwrap_or_default();
                skip_explain = matches!(value.trim(), "true" | "1" | "yes");
            }
            _ => {}
        }
    }

    let pdf_bytes = pdf_bytes
        .ok_or_else(|| ApiError::BadRequest("multipart field `file` is required".to_string()))?;
    let model_spec: ModelSpec = model
        .parse()
        .map_err(|error: crate::services::orchestrator::ConfigError| {
            ApiError::BadRequest(error.to_string())
        })?;

    Ok(Upload {
        pdf_bytes,
        model_spec,
        skip_explain,
    })
}

#[derive(Debug, Serialize)]
struct ParseResponse {
    model_spec: String,
    parsed_exam: ParsedExam,
    validation: ValidationResult,
    cost: crate::services::usage::CostReport,
    parser_warnings: Vec<String>,
}

async fn parse_sync(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ParseResponse>, ApiError> {
    let upload = read_upload(multipart, state.settings.max_file_size_bytes()).await?;
    let options = ParseOptions {
        explain: !upload.skip_explain,
        ..ParseOptions::default()
    };

    let staging_dir = std::env::temp_dir().join("gichul-uploads");
    tokio::fs::create_dir_all(&staging_dir)
        .await
        .map_err(|error| ApiError::Internal(format!("failed to stage upload: {error}")))?;
    let pdf_path = staging_dir.join(format!("{}.pdf", Uuid::new_v4()));
    tokio::fs::write(&pdf_path, &upload.pdf_bytes)
        .await
        .map_err(|error| ApiError::Internal(format!("failed to stage upload: {error}")))?;

    let orchestrator = state.orchestrator.clone();
    let model_spec = upload.model_spec.clone();
    let task_path = pdf_path.clone();
    let handle = tokio::spawn(async move {
        let outcome = orchestrator.parse(&task_path, &model_spec, &options).await;
        let _ = tokio::fs::remove_file(&task_path).await;
        outcome
    });

    // On timeout the parse keeps running detached; its result is discarded.
    let outcome = match tokio::time::timeout(SYNC_PARSE_TIMEOUT, handle).await {
        Err(_) => return Err(ApiError::Timeout),
        Ok(Err(join_error)) => {
            return Err(ApiError::Internal(format!("parse task failed: {join_error}")));
        }
        Ok(Ok(outcome)) => outcome.map_err(ApiError::from_parse)?,
    };

    Ok(Json(ParseResponse {
        model_spec: upload.model_spec.to_string(),
        parsed_exam: outcome.parsed_exam,
        validation: outcome.validation,
        cost: outcome.cost,
        parser_warnings: outcome.parser_warnings,
    }))
}

async fn parse_async(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let upload = read_upload(multipart, state.settings.max_file_size_bytes()).await?;
    let options = ParseOptions {
        explain: !upload.skip_explain,
        ..ParseOptions::default()
    };

    let job_id = state
        .jobs
        .submit(&upload.pdf_bytes, &upload.model_spec, options)
        .map_err(|error| match error {
            JobError::QueueFull => ApiError::TooManyRequests("job queue is full".to_string()),
            JobError::Staging(source) => {
                ApiError::Internal(format!("failed to stage upload: {source}"))
            }
        })?;

    Ok(Json(json!({
        "job_id": job_id,
        "state": "pending",
        "message": format!("job enqueued; poll GET /api/jobs/{job_id}"),
    })))
}

async fn get_job(
    State(state): State<AppState>,
    AxumPath(job_id): AxumPath<String>,
) -> Result<Json<crate::services::jobs::ParseJob>, ApiError> {
    state
        .jobs
        .get(&job_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("job `{job_id}` not found")))
}

async fn validate_exam_body(Json(exam): Json<ParsedExam>) -> Json<ValidationResult> {
    Json(validate(&exam))
}

pub async fn serve(settings: Settings) -> Result<(), ServerError> {
    let listen_addr: SocketAddr =
        settings
            .listen_addr
            .parse()
            .map_err(|source| ServerError::InvalidListenAddr {
                address: settings.listen_addr.clone(),
                source,
            })?;

    if settings.google_api_key.is_none() {
        tracing::warn!(
            "GOOGLE_API_KEY not configured; parsing will fail unless the key is set at runtime"
        );
    }

    let orchestrator = Arc::new(Orchestrator::new(settings.clone()));
    let jobs = JobManager::start(
        orchestrator.clone(),
        JobConfig {
            workers: settings.max_concurrent_parses,
            queue_depth: settings.max_queue_depth,
            ..JobConfig::default()
        },
    );
    let state = AppState::new(settings, orchestrator, jobs);
    let router = build_router(state);

    let listener = TcpListener::bind(listen_addr)
        .await
        .map_err(|source| ServerError::Bind {
            address: listen_addr.to_string(),
            source,
        })?;
    tracing::info!(%listen_addr, "gichul server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(wait_for_shutdown())
        .await
        .map_err(|source| ServerError::Serve { source })
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!(%error, "failed to capture Ctrl+C signal");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(error) => {
                tracing::warn!(%error, "failed to capture SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("shutdown requested via Ctrl+C"),
        _ = sigterm => tracing::info!("shutdown requested via SIGTERM"),
    }
}
