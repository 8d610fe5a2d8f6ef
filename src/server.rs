/// HTTP server setup and routing
use crate::{
    context::AppContext,
    error::{ServiceError, ServiceResult},
    metrics,
};
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the main application router
/// Returns Router<()> because state is already provided
pub fn build_router(ctx: AppContext) -> Router {
    Router::new()
        .merge(crate::health::routes())
        .route("/metrics", get(metrics_handler))
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        .fallback(not_found)
}

/// Prometheus text exposition
async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render_metrics(),
    )
}

/// 404 handler
async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "NotFound",
            "message": "Endpoint not found"
        })),
    )
}

/// Start the HTTP server; returns after ctrl-c once in-flight requests finish
pub async fn serve(ctx: AppContext) -> ServiceResult<()> {
    let addr = format!("{}:{}", ctx.config.service.hostname, ctx.config.service.port);

    info!(
        service = %ctx.config.service.name,
        version = %ctx.config.service.version,
        "Account coordinator listening on {}",
        addr
    );

    let app = build_router(ctx);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ServiceError::Internal(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ServiceError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::{AuthContext, InternalServiceContext, INTERNAL_API_KEY_HEADER},
        cache::MemoryCacheStore,
        config::ServerConfig,
        db::create_memory_pool,
        events::MemoryBus,
    };
    use axum::{body::Body, http::Request};
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn context(bus: Arc<MemoryBus>) -> AppContext {
        let pool = create_memory_pool().await.unwrap();
        AppContext::from_parts(
            ServerConfig::for_tests(),
            pool,
            Arc::new(MemoryCacheStore::new()),
            bus,
        )
        .await
        .unwrap()
    }

    async fn get(app: Router, uri: &str, headers: &[(&str, &str)]) -> (StatusCode, serde_json::Value) {
        let mut request = Request::builder().uri(uri);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = app
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn test_health_reports_components() {
        let ctx = context(Arc::new(MemoryBus::default())).await;
        let (status, body) = get(build_router(ctx), "/health", &[]).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        let names: Vec<&str> = body["checks"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["database", "cache", "messageBus"]);
    }

    #[tokio::test]
    async fn test_health_degraded_when_bus_down() {
        let bus = Arc::new(MemoryBus::default());
        let ctx = context(bus.clone()).await;
        bus.disconnect();

        let (status, body) = get(build_router(ctx), "/health", &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "degraded");
    }

    #[tokio::test]
    async fn test_probes_and_fallback() {
        let ctx = context(Arc::new(MemoryBus::default())).await;

        let (status, body) = get(build_router(ctx.clone()), "/health/live", &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "alive");

        let (status, _) = get(build_router(ctx.clone()), "/health/ready", &[]).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = get(build_router(ctx), "/nope", &[]).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "NotFound");
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let ctx = context(Arc::new(MemoryBus::default())).await;
        let response = build_router(ctx)
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    /// Routes guarded by the extractors, mounted the way a business router would
    fn guarded_router(ctx: AppContext) -> Router {
        Router::new()
            .route(
                "/me",
                axum::routing::get(|auth: AuthContext| async move { Json(json!({ "accountId": auth.account_id })) }),
            )
            .route(
                "/internal",
                axum::routing::get(|_: InternalServiceContext| async { Json(json!({ "ok": true })) }),
            )
            .with_state(ctx)
    }

    #[tokio::test]
    async fn test_user_extractor() {
        let ctx = context(Arc::new(MemoryBus::default())).await;
        let token = ctx.tokens.issue("acct-1").unwrap();

        let bearer = format!("Bearer {}", token);
        let (status, body) = get(guarded_router(ctx.clone()), "/me", &[("authorization", &bearer)]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["accountId"], "acct-1");

        let (status, body) = get(guarded_router(ctx.clone()), "/me", &[]).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Unauthenticated");

        // Service credentials do not stand in for a user
        let (status, _) = get(
            guarded_router(ctx),
            "/me",
            &[(INTERNAL_API_KEY_HEADER, "internal-test-key")],
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_internal_extractor() {
        let ctx = context(Arc::new(MemoryBus::default())).await;

        let (status, _) = get(
            guarded_router(ctx.clone()),
            "/internal",
            &[(INTERNAL_API_KEY_HEADER, "internal-test-key")],
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = get(
            guarded_router(ctx.clone()),
            "/internal",
            &[(INTERNAL_API_KEY_HEADER, "wrong")],
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = get(guarded_router(ctx), "/internal", &[]).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
