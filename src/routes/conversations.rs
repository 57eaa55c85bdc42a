use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use axum_valid::Valid;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{ApiError, ApiResult};
use crate::{
    AppState,
    auth::Subject,
    db::{Cursor, CursorDirection, ListParams},
    models::{Conversation, CreateConversation, ForkConversation, ListMode, UpdateConversation},
    services::ServiceError,
};

/// Pagination metadata returned alongside list results.
#[derive(Debug, Serialize)]
pub struct PaginationMeta {
    pub limit: i64,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_cursor: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConversationListResponse {
    pub data: Vec<Conversation>,
    pub pagination: PaginationMeta,
}

/// Query parameters for conversation listings.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub cursor: Option<String>,
    #[serde(default)]
    pub direction: CursorDirection,
    pub mode: Option<ListMode>,
}

impl ListQuery {
    pub fn list_params(&self) -> ApiResult<ListParams> {
        let cursor = self
            .cursor
            .as_deref()
            .map(Cursor::decode)
            .transpose()
            .map_err(|e| ApiError(ServiceError::Validation(format!("invalid cursor: {e}"))))?;
        Ok(ListParams {
            limit: self.limit,
            cursor,
            direction: self.direction,
            ..Default::default()
        })
    }
}

pub async fn create(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Valid(Json(input)): Valid<Json<CreateConversation>>,
) -> ApiResult<(StatusCode, Json<Conversation>)> {
    let conversation = state.services.conversations.create(&subject, input).await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ConversationListResponse>> {
    let params = query.list_params()?;
    let limit = params.effective_limit(50, 200);
    let result = state
        .services
        .conversations
        .list(&subject, query.mode.unwrap_or_default(), params)
        .await?;

    Ok(Json(ConversationListResponse {
        data: result.items,
        pagination: PaginationMeta {
            limit,
            has_more: result.has_more,
            next_cursor: result.cursors.next.map(|c| c.encode()),
            prev_cursor: result.cursors.prev.map(|c| c.encode()),
        },
    }))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Conversation>> {
    Ok(Json(state.services.conversations.get(&subject, id).await?))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(id): Path<Uuid>,
    Valid(Json(input)): Valid<Json<UpdateConversation>>,
) -> ApiResult<Json<Conversation>> {
    Ok(Json(
        state.services.conversations.update(&subject, id, input).await?,
    ))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.services.conversations.delete(&subject, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_forks(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Conversation>>> {
    Ok(Json(
        state.services.conversations.list_forks(&subject, id).await?,
    ))
}

pub async fn fork(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(id): Path<Uuid>,
    Valid(Json(input)): Valid<Json<ForkConversation>>,
) -> ApiResult<(StatusCode, Json<Conversation>)> {
    let conversation = state.services.conversations.fork(&subject, id, input).await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}
