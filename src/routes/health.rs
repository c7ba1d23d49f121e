use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::context::AppContext;
use crate::db;
use crate::error::AppError;
use crate::metrics;

/// GET /health
///
/// Unhealthy iff the database or the broker is unreachable.
pub async fn health_check(State(app_context): State<Arc<AppContext>>) -> impl IntoResponse {
    let db_healthy = match db::health_check(&app_context.pool).await {
        Ok(()) => true,
        Err(err) => {
            tracing::error!(error = %err, "database health check failed");
            false
        }
    };

    let kafka_healthy = match app_context.producer.health_check().await {
        Ok(()) => true,
        Err(err) => {
            tracing::error!(error = %err, "kafka health check failed");
            false
        }
    };

    let healthy = db_healthy && kafka_healthy;
    let body = json!({
        "status": healthy,
        "message": if healthy { "success" } else { "some services are unavailable" },
        "checks": {
            "database": { "status": db_healthy, "type": "postgresql" },
            "kafka": { "status": kafka_healthy, "type": "kafka" },
        },
    });

    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body))
}

/// GET /metrics
pub async fn metrics() -> Result<impl IntoResponse, AppError> {
    match metrics::gather_metrics() {
        Ok(metrics_data) => Ok((
            StatusCode::OK,
            [("Content-Type", "text/plain; version=0.0.4")],
            metrics_data,
        )),
        Err(err) => {
            tracing::error!(error = %err, "failed to gather metrics");
            Err(AppError::internal("failed to gather metrics"))
        }
    }
}
