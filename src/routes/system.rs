use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;

use super::error::ApiResult;
use crate::{AppState, auth::Subject};

/// The caller's resolved identity.
pub async fn me(Extension(subject): Extension<Subject>) -> Json<Subject> {
    Json(subject)
}

/// Public runtime configuration for frontends.
pub async fn config_json(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.config.public_snapshot())
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Liveness: the process is up.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Readiness: the database answers.
pub async fn ready(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    state
        .db
        .health_check()
        .await
        .map_err(crate::services::ServiceError::from)?;
    Ok(Json(HealthResponse { status: "ready" }))
}

/// Prometheus exposition endpoint.
pub async fn metrics() -> impl IntoResponse {
    #[cfg(feature = "prometheus")]
    {
        if let Some(handle) = crate::observability::metrics::get_prometheus_handle() {
            return (StatusCode::OK, handle.render()).into_response();
        }
    }
    (StatusCode::NOT_IMPLEMENTED, "metrics are not enabled\n").into_response()
}
