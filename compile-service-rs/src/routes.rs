// compile-service-rs/src/routes.rs
// HTTP surface: request validation, response shaping, status codes.
//
// This is the only layer that decides HTTP status and response shape;
// everything below reports plain descriptive failures upward.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::compiler::PdfLatexCompiler;
use crate::fix_client::FixClient;
use crate::job::Job;
use crate::pipeline::{run_job, JobResult};

pub const MAX_PAYLOAD_SIZE: usize = 2 * 1024 * 1024;

static START_TIME: Lazy<Instant> = Lazy::new(Instant::now);

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub compiler: Arc<PdfLatexCompiler>,
    pub fixer: Arc<FixClient>,
    pub max_attempts: u32,
}

/// Compile request body (JSON)
#[derive(Debug, Deserialize)]
pub struct CompileRequest {
    pub source: Option<String>,
    #[serde(default = "default_enable_fix")]
    pub enable_fix: bool,
}

fn default_enable_fix() -> bool {
    true
}

/// Error response body (JSON)
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub details: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub service_name: String,
    pub compiler_available: bool,
    pub uptime_seconds: i64,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/compile", post(compile_handler))
        .layer(DefaultBodyLimit::max(MAX_PAYLOAD_SIZE))
        .layer(cors)
        .with_state(state)
}

/// POST /compile - compile a LaTeX document, fixing on failure
pub async fn compile_handler(
    State(state): State<AppState>,
    Json(request): Json<CompileRequest>,
) -> Response {
    // Reject before any job (and thus any working directory) is created.
    let source = match request.source.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: "missing source".to_string(),
                    details: "the request body must contain a non-empty \"source\" field"
                        .to_string(),
                    job_id: None,
                    suggestion: None,
                }),
            )
                .into_response();
        }
    };

    let mut job = match Job::create(source) {
        Ok(job) => job,
        Err(e) => {
            log::error!("failed to create job workspace: {}", e);
            return internal_error(None);
        }
    };

    log::info!(
        "job {}: compile request received (fix enabled: {})",
        job.id,
        request.enable_fix
    );

    let outcome = match run_job(
        &mut job,
        state.compiler.as_ref(),
        state.fixer.as_ref(),
        request.enable_fix,
        state.max_attempts,
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            log::error!("job {}: internal error: {}", job.id, e);
            return internal_error(Some(job.id.clone()));
        }
    };

    match outcome.result {
        JobResult::Artifact(bytes) => (
            [
                ("content-type", "application/pdf".to_string()),
                ("x-job-id", job.id.clone()),
                ("x-attempts", outcome.attempts.to_string()),
                ("x-fix-applied", outcome.fix_applied.to_string()),
            ],
            bytes,
        )
            .into_response(),
        JobResult::Failed {
            classified,
            fix_attempted,
        } => {
            let details = if classified.excerpt.is_empty() {
                classified.message.clone()
            } else {
                format!("{}\n\nLog context:\n{}", classified.message, classified.excerpt)
            };
            let suggestion = fix_attempted.then(|| {
                "Automatic fixing was attempted but did not produce a compilable document. \
                 Review the log context and correct the source manually."
                    .to_string()
            });

            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ErrorResponse {
                    error: "compilation failed".to_string(),
                    details,
                    job_id: Some(job.id.clone()),
                    suggestion,
                }),
            )
                .into_response()
        }
    }
}

/// GET /health - liveness, including compiler resolvability
pub async fn health_handler(State(state): State<AppState>) -> Response {
    let compiler_available = state.compiler.is_available();
    let status = if compiler_available {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            healthy: compiler_available,
            service_name: config_rs::get_formatted_service_name("COMPILE"),
            compiler_available,
            uptime_seconds: START_TIME.elapsed().as_secs() as i64,
        }),
    )
        .into_response()
}

/// GET / - static service metadata
pub async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "compile-service",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "GET /health",
            "POST /compile"
        ]
    }))
}

fn internal_error(job_id: Option<String>) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "internal error".to_string(),
            details: "an unexpected error occurred while processing the job".to_string(),
            job_id,
            suggestion: None,
        }),
    )
        .into_response()
}
