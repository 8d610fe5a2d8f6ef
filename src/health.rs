/// Health check endpoints for liveness and readiness probes
///
/// Reports the database, the account cache (set/get/delete round-trip)
/// and the message bus. A failing cache or bus degrades the service but
/// does not make it unready: reads fall back to the database and events
/// are best-effort.

use crate::{context::AppContext, metrics};
use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Health status response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Overall status: "healthy", "degraded", or "unhealthy"
    pub status: String,

    pub version: String,

    pub uptime_seconds: f64,

    pub checks: Vec<ComponentHealth>,
}

/// Health status of individual component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,

    /// Status: "healthy", "degraded", or "unhealthy"
    pub status: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentHealth {
    fn new(name: &str, started: Instant, failure: Option<String>, failed_status: &str) -> Self {
        Self {
            name: name.to_string(),
            status: if failure.is_some() { failed_status } else { "healthy" }.to_string(),
            response_time_ms: Some(started.elapsed().as_millis() as u64),
            error: failure,
        }
    }
}

/// Build health check routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/health", get(health_detailed))
        .route("/health/live", get(liveness_probe))
        .route("/health/ready", get(readiness_probe))
}

/// Liveness probe: responds while the process can serve requests
pub async fn liveness_probe() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "alive",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Readiness probe: the database must be reachable
pub async fn readiness_probe(
    State(ctx): State<AppContext>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if let Err(e) = crate::db::test_connection(&ctx.db).await {
        tracing::warn!(error = %e, "readiness_probe_failed: database check failed");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    Ok(Json(serde_json::json!({
        "status": "ready",
        "version": env!("CARGO_PKG_VERSION")
    })))
}

/// Detailed health check with all component statuses
pub async fn health_detailed(State(ctx): State<AppContext>) -> (StatusCode, Json<HealthStatus>) {
    let health = check_all(&ctx).await;

    let status_code = match health.status.as_str() {
        "unhealthy" => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };

    (status_code, Json(health))
}

/// Run every component check
pub async fn check_all(ctx: &AppContext) -> HealthStatus {
    let start = Instant::now();

    let checks = vec![
        check_database(ctx).await,
        check_cache(ctx).await,
        check_message_bus(ctx).await,
    ];

    let overall_status = determine_overall_status(&checks);
    let uptime = ctx.started_at.elapsed().as_secs_f64();
    metrics::UPTIME_SECONDS.set(uptime);

    tracing::info!(
        status = %overall_status,
        duration_ms = start.elapsed().as_millis(),
        "health_check_completed"
    );

    HealthStatus {
        status: overall_status,
        version: ctx.config.service.version.clone(),
        uptime_seconds: uptime,
        checks,
    }
}

async fn check_database(ctx: &AppContext) -> ComponentHealth {
    let start = Instant::now();
    let failure = crate::db::test_connection(&ctx.db)
        .await
        .err()
        .map(|e| e.to_string());
    ComponentHealth::new("database", start, failure, "unhealthy")
}

async fn check_cache(ctx: &AppContext) -> ComponentHealth {
    let start = Instant::now();
    let failure = ctx.cache.round_trip().await.err().map(|e| e.to_string());
    ComponentHealth::new("cache", start, failure, "degraded")
}

async fn check_message_bus(ctx: &AppContext) -> ComponentHealth {
    let start = Instant::now();
    let failure = if ctx.events.is_healthy().await {
        None
    } else {
        Some("Message bus is not connected".to_string())
    };
    ComponentHealth::new("messageBus", start, failure, "degraded")
}

/// Determine overall health status from individual checks
fn determine_overall_status(checks: &[ComponentHealth]) -> String {
    let unhealthy_count = checks.iter().filter(|c| c.status == "unhealthy").count();
    let degraded_count = checks.iter().filter(|c| c.status == "degraded").count();

    if unhealthy_count > 0 {
        "unhealthy".to_string()
    } else if degraded_count > 0 {
        "degraded".to_string()
    } else {
        "healthy".to_string()
    }
}
