//! HTTP surface for the evaluation stages.
//!
//! Each stage has its own endpoint so a page can call them in order and show
//! results as they arrive. `POST /avaliar` runs the whole pipeline and
//! streams one NDJSON line per stage.
use crate::generation::GenerationClient;
use crate::pipeline::{
    run_pipeline, validate_stage_input, EvaluationRequest, StageError, StageExecutor,
    StageOutput, StageSettings,
};
use crate::stage::StageKind;
use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

const MAX_BODY_BYTES: usize = 1024 * 1024;
const STREAM_BUFFER: usize = 8;

/// Process-wide state shared read-only by every request.
pub struct AppState {
    pub client: Arc<dyn GenerationClient>,
    pub settings: StageSettings,
}

#[derive(Debug, Deserialize)]
struct EvaluationBody {
    #[serde(default)]
    original: String,
    #[serde(default)]
    traducao: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/avaliar/doc-name", post(handle_classification))
        .route("/avaliar/review", post(handle_review))
        .route("/avaliar/todo", post(handle_correction))
        .route("/avaliar/judge", post(handle_verdict))
        .route("/avaliar", post(handle_pipeline))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(axum::middleware::from_fn(log_requests))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    serve_on(listener, state).await
}

pub async fn serve_on(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let addr = listener.local_addr().context("read listener address")?;
    tracing::info!(%addr, "HTTP server ready");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server terminated")
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("shutdown requested");
    }
}

async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy" }))
}

async fn handle_classification(
    State(state): State<Arc<AppState>>,
    body: Result<Json<EvaluationBody>, JsonRejection>,
) -> Response {
    text_stage(state, StageKind::Classification, body).await
}

async fn handle_review(
    State(state): State<Arc<AppState>>,
    body: Result<Json<EvaluationBody>, JsonRejection>,
) -> Response {
    text_stage(state, StageKind::Review, body).await
}

async fn handle_correction(
    State(state): State<Arc<AppState>>,
    body: Result<Json<EvaluationBody>, JsonRejection>,
) -> Response {
    text_stage(state, StageKind::Correction, body).await
}

async fn handle_verdict(
    State(state): State<Arc<AppState>>,
    body: Result<Json<EvaluationBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return json_error(rejection.status(), rejection.body_text()),
    };
    let (source, translated) =
        match validate_stage_input(StageKind::Verdict, &body.original, &body.traducao) {
            Ok((source, translated)) => (source.to_string(), translated.to_string()),
            Err(err) => return json_error(StatusCode::BAD_REQUEST, err.to_string()),
        };

    match run_stage(state, StageKind::Verdict, source, translated).await {
        Ok(StageOutput::Verdict(verdict)) => Json(verdict).into_response(),
        Ok(other) => {
            tracing::error!(stage = %other.stage(), "verdict endpoint produced a non-verdict output");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, failure_message(StageKind::Verdict))
        }
        Err(err) => {
            tracing::error!(error = %err, "verdict stage failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, failure_message(StageKind::Verdict))
        }
    }
}

async fn text_stage(
    state: Arc<AppState>,
    stage: StageKind,
    body: Result<Json<EvaluationBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return text_error(rejection.status(), rejection.body_text()),
    };
    let (source, translated) = match validate_stage_input(stage, &body.original, &body.traducao) {
        Ok((source, translated)) => (source.to_string(), translated.to_string()),
        Err(err) => return text_error(StatusCode::BAD_REQUEST, err.to_string()),
    };

    match run_stage(state, stage, source, translated).await {
        Ok(output) => match output.text() {
            Some(text) => text_ok(text.to_string()),
            None => text_error(StatusCode::INTERNAL_SERVER_ERROR, failure_message(stage).to_string()),
        },
        Err(err) => {
            tracing::error!(stage = %stage, error = %err, "stage failed");
            text_error(StatusCode::INTERNAL_SERVER_ERROR, failure_message(stage).to_string())
        }
    }
}

/// Run one blocking stage call off the async workers.
async fn run_stage(
    state: Arc<AppState>,
    stage: StageKind,
    source: String,
    translated: String,
) -> Result<StageOutput, String> {
    let joined = tokio::task::spawn_blocking(move || {
        let executor = StageExecutor::new(state.client.as_ref(), &state.settings);
        executor.run(stage, &source, &translated)
    })
    .await;
    match joined {
        Ok(result) => result.map_err(|err: StageError| err.to_string()),
        Err(join_err) => Err(format!("stage task failed: {join_err}")),
    }
}

async fn handle_pipeline(
    State(state): State<Arc<AppState>>,
    body: Result<Json<EvaluationBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return json_error(rejection.status(), rejection.body_text()),
    };
    let request = match EvaluationRequest::new(&body.original, &body.traducao) {
        Ok(request) => request,
        Err(err) => return json_error(StatusCode::BAD_REQUEST, err.to_string()),
    };

    let (tx, rx) = tokio::sync::mpsc::channel::<String>(STREAM_BUFFER);
    tokio::task::spawn_blocking(move || {
        let executor = StageExecutor::new(state.client.as_ref(), &state.settings);
        let outcome = run_pipeline(&executor, &request, |entry| {
            if tx.blocking_send(ndjson_line(&entry.report())).is_err() {
                tracing::debug!(stage = %entry.stage, "pipeline client went away");
            }
        });
        let _ = tx.blocking_send(ndjson_line(&serde_json::json!({ "status": outcome.state() })));
    });

    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(stream),
    )
        .into_response()
}

fn ndjson_line<T: Serialize>(value: &T) -> String {
    match serde_json::to_string(value) {
        Ok(mut line) => {
            line.push('\n');
            line
        }
        Err(err) => format!("{{\"status\":\"error\",\"error\":{:?}}}\n", err.to_string()),
    }
}

/// User-facing message for a failed stage endpoint.
fn failure_message(stage: StageKind) -> &'static str {
    match stage {
        StageKind::Classification => "Erro ao identificar o nome do documento.",
        StageKind::Review => "Erro ao revisar a tradução.",
        StageKind::Correction => "Erro ao gerar a lista de ajustes.",
        StageKind::Verdict => "Erro ao gerar veredito final.",
    }
}

fn text_ok(text: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        text,
    )
        .into_response()
}

fn text_error(status: StatusCode, message: String) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        message,
    )
        .into_response()
}

fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

async fn log_requests(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(req).await;

    let status = response.status().as_u16();
    let duration_ms = start.elapsed().as_millis() as u64;
    if response.status().is_server_error() {
        tracing::error!(target: "http", %method, %path, status, duration_ms, "request failed");
    } else if response.status().is_client_error() {
        tracing::warn!(target: "http", %method, %path, status, duration_ms, "request rejected");
    } else if path == "/health" {
        tracing::trace!(target: "http", %method, %path, status, duration_ms, "health check");
    } else {
        tracing::info!(target: "http", %method, %path, status, duration_ms, "request");
    }
    response
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
