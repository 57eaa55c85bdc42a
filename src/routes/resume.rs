use std::convert::Infallible;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::ApiResult;
use crate::{AppState, auth::Subject, models::AccessLevel, recorder::RecorderFrame};

/// SSE terminal sentinel, mirroring the upstream LLM streaming convention.
const DONE_SENTINEL: &str = "[DONE]";

/// Resume an in-flight response as a Server-Sent-Events stream.
///
/// The stream replays everything recorded so far, follows the live
/// session, and closes after a final `[DONE]` frame (or silently after a
/// cancel).
pub async fn resume(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    // Resume leaks conversation content, so it gets the same read check as
    // an entry listing.
    state
        .services
        .conversations
        .get(&subject, conversation_id)
        .await?;

    let frames = state.recorder.replay(conversation_id).await?;
    let events = frames.filter_map(|frame| async move {
        match frame {
            Ok(RecorderFrame::Chunk(chunk)) => Some(Ok(Event::default()
                .data(String::from_utf8_lossy(&chunk).into_owned()))),
            Ok(RecorderFrame::Done) => Some(Ok(Event::default().data(DONE_SENTINEL))),
            // Cancellation closes the stream without a DONE sentinel.
            Ok(RecorderFrame::Cancelled) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Replay stream error");
                None
            }
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// Ask the producer to stop generating.
///
/// Cancelling stops another member's in-flight generation, so it requires
/// writer access; replay stays reader-level.
pub async fn cancel(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let conversation = state
        .services
        .conversations
        .get(&subject, conversation_id)
        .await?;
    state
        .services
        .access
        .require(conversation.group_id, &subject, AccessLevel::Writer)
        .await?;
    state.recorder.cancel(conversation_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct ResumeCheckRequest {
    pub conversation_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ResumeCheckResponse {
    pub resumable: Vec<Uuid>,
}

/// Filter a set of conversations down to those with a resumable response.
pub async fn resume_check(
    State(state): State<AppState>,
    Extension(_subject): Extension<Subject>,
    Json(input): Json<ResumeCheckRequest>,
) -> ApiResult<Json<ResumeCheckResponse>> {
    let resumable = state
        .recorder
        .check_recordings(&input.conversation_ids)
        .await?;
    Ok(Json(ResumeCheckResponse { resumable }))
}
