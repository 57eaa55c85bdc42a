use std::convert::Infallible;

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::Stream;
use serde::Serialize;
use uuid::Uuid;

use super::error::{ApiError, ApiResult};
use crate::{
    AppState,
    auth::Subject,
    models::Conversation,
    services::ServiceError,
};

fn require_admin(state: &AppState, subject: &Subject) -> Result<(), ApiError> {
    if state.config.auth.is_admin(&subject.user_id) {
        Ok(())
    } else {
        Err(ApiError(ServiceError::Forbidden(
            "admin role required".into(),
        )))
    }
}

#[derive(Debug, Serialize)]
pub struct EvictResponse {
    pub run_id: Uuid,
}

/// Trigger an eviction pass: 202 plus an SSE progress stream.
///
/// Concurrent triggers join the run already in flight and observe the same
/// run id.
pub async fn evict_now(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
) -> ApiResult<(
    axum::http::StatusCode,
    Sse<impl Stream<Item = Result<Event, Infallible>>>,
)> {
    require_admin(&state, &subject)?;

    let (run_id, mut events) = state.eviction.trigger().await;
    let stream = async_stream::stream! {
        yield Ok(Event::default().data(
            serde_json::json!({ "run_id": run_id, "started": true }).to_string(),
        ));
        while let Ok(progress) = events.recv().await {
            let done = progress.done;
            if let Ok(payload) = serde_json::to_string(&progress) {
                yield Ok(Event::default().data(payload));
            }
            if done {
                break;
            }
        }
    };

    Ok((
        axum::http::StatusCode::ACCEPTED,
        Sse::new(stream).keep_alive(KeepAlive::default()),
    ))
}

/// Admin inspection: fetch a conversation regardless of membership or
/// soft-delete state.
pub async fn get_conversation(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Conversation>> {
    require_admin(&state, &subject)?;
    let conversation = state
        .db
        .conversations()
        .get_including_deleted(id)
        .await
        .map_err(ServiceError::from)?
        .ok_or(ApiError(ServiceError::NotFound))?;
    Ok(Json(conversation))
}

/// Admin stats require a Prometheus query backend, which is out of scope.
pub async fn stats(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
) -> ApiResult<Json<serde_json::Value>> {
    require_admin(&state, &subject)?;
    Err(ApiError(ServiceError::Unimplemented(
        "admin stats require a Prometheus query backend".into(),
    )))
}
