//! HTTP control surface: status, history, stats, control, config and logs.

use std::future::Future;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::info;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::{
    scheduler::{
        commands::{self, ControlAck, HistoryReport, StatsReport, StatusReport},
        ControlError,
    },
    settings::AppConfig,
    utils::logging,
    AppContext,
};

const DEFAULT_HISTORY_LIMIT: usize = 50;
const DEFAULT_LOG_LINES: usize = 100;

// ── Config ──

pub struct ServeConfig {
    pub bind: String,
    pub port: u16,
}

// ── Error Handling ──

struct AppError {
    status: StatusCode,
    error: anyhow::Error,
}

impl AppError {
    fn control(err: ControlError) -> Self {
        let status = match err {
            ControlError::UnknownAction(_) => StatusCode::BAD_REQUEST,
            ControlError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            ControlError::Busy => StatusCode::CONFLICT,
        };
        Self {
            status,
            error: err.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.error.to_string() });
        (self.status, Json(body)).into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: err.into(),
        }
    }
}

// ── Entrypoint ──

/// Serves until `shutdown` resolves.
pub async fn serve<F>(ctx: AppContext, config: ServeConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(ctx);
    let addr = format!("{}:{}", config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("HTTP server listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Build the router (for testing without binding to a port).
pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(get_status))
        .route("/api/history", get(get_history))
        .route("/api/stats", get(get_stats))
        .route("/api/control", post(post_control))
        .route("/api/config", get(get_config))
        .route("/api/logs", get(get_logs))
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

// ── Health ──

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

// ── GET /api/status ──

async fn get_status(State(ctx): State<AppContext>) -> Json<StatusReport> {
    Json(commands::get_status(&ctx).await)
}

// ── GET /api/history ──

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn get_history(
    State(ctx): State<AppContext>,
    Query(params): Query<HistoryQuery>,
) -> Json<HistoryReport> {
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    Json(commands::get_history(&ctx, limit).await)
}

// ── GET /api/stats ──

async fn get_stats(State(ctx): State<AppContext>) -> Json<StatsReport> {
    Json(commands::get_stats(&ctx).await)
}

// ── POST /api/control ──

#[derive(Deserialize)]
struct ControlBody {
    action: String,
}

async fn post_control(
    State(ctx): State<AppContext>,
    Json(body): Json<ControlBody>,
) -> Result<Json<ControlAck>, AppError> {
    let ack = commands::control(&ctx, &body.action)
        .await
        .map_err(AppError::control)?;
    Ok(Json(ack))
}

// ── GET /api/config ──

#[derive(Serialize)]
struct ConfigResponse<'a> {
    config: &'a AppConfig,
}

async fn get_config(State(ctx): State<AppContext>) -> Response {
    Json(ConfigResponse {
        config: commands::get_config(&ctx),
    })
    .into_response()
}

// ── GET /api/logs ──

#[derive(Deserialize)]
struct LogsQuery {
    lines: Option<usize>,
}

#[derive(Serialize)]
struct LogsResponse {
    logs: Vec<String>,
}

async fn get_logs(
    State(ctx): State<AppContext>,
    Query(params): Query<LogsQuery>,
) -> Result<Json<LogsResponse>, AppError> {
    let lines = params.lines.unwrap_or(DEFAULT_LOG_LINES);
    let logs = logging::tail(&ctx.config.logging, lines)?;
    Ok(Json(LogsResponse { logs }))
}

// ── Tests ──
