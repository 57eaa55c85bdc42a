use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    conversations::PaginationMeta,
    error::{ApiError, ApiResult},
};
use crate::{
    AppState,
    auth::Subject,
    db::{Cursor, CursorDirection, ListParams},
    models::{AppendEntries, Channel, Entry, EntryQuery, EpochFilter, SyncMemory, SyncOutcome},
    services::ServiceError,
};

#[derive(Debug, Serialize)]
pub struct EntryListResponse {
    pub data: Vec<Entry>,
    pub pagination: PaginationMeta,
}

/// Query parameters for entry listings.
#[derive(Debug, Deserialize)]
pub struct EntryListQuery {
    pub limit: Option<i64>,
    pub after: Option<String>,
    pub channel: Option<Channel>,
    /// `latest`, or a specific epoch number.
    pub epoch: Option<String>,
    pub client_id: Option<String>,
    #[serde(default)]
    pub all_forks: bool,
}

impl EntryListQuery {
    fn epoch_filter(&self) -> ApiResult<EpochFilter> {
        match self.epoch.as_deref() {
            None => Ok(EpochFilter::All),
            Some("latest") => Ok(EpochFilter::Latest),
            Some(raw) => raw.parse().map(EpochFilter::At).map_err(|_| {
                ApiError(ServiceError::Validation(format!(
                    "epoch must be 'latest' or an integer, got '{raw}'"
                )))
            }),
        }
    }
}

pub async fn list(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<EntryListQuery>,
) -> ApiResult<Json<EntryListResponse>> {
    let cursor = query
        .after
        .as_deref()
        .map(Cursor::decode)
        .transpose()
        .map_err(|e| ApiError(ServiceError::Validation(format!("invalid cursor: {e}"))))?;

    let params = ListParams {
        limit: query.limit,
        cursor,
        direction: CursorDirection::Forward,
        ..Default::default()
    };
    let limit = params.effective_limit(100, 1000);

    let entry_query = EntryQuery {
        channel: query.channel,
        epoch: query.epoch_filter()?,
        client_id: query.client_id.clone().or_else(|| subject.client_id.clone()),
        all_forks: query.all_forks,
    };

    let result = state
        .services
        .entries
        .list(&subject, conversation_id, entry_query, params)
        .await?;

    Ok(Json(EntryListResponse {
        data: result.items,
        pagination: PaginationMeta {
            limit,
            has_more: result.has_more,
            next_cursor: result.cursors.next.map(|c| c.encode()),
            prev_cursor: result.cursors.prev.map(|c| c.encode()),
        },
    }))
}

pub async fn append(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(conversation_id): Path<Uuid>,
    Json(input): Json<AppendEntries>,
) -> ApiResult<(StatusCode, Json<Vec<Entry>>)> {
    let entries = state
        .services
        .entries
        .append(&subject, conversation_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(entries)))
}

pub async fn sync(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(conversation_id): Path<Uuid>,
    Json(input): Json<SyncMemory>,
) -> ApiResult<Json<SyncOutcome>> {
    let outcome = state
        .services
        .entries
        .sync_memory(&subject, conversation_id, input)
        .await?;
    Ok(Json(outcome))
}

/// Request body for the transcript index path.
#[derive(Debug, Deserialize)]
pub struct IndexRequest {
    pub content_type: String,
    #[serde(default)]
    pub content: Vec<serde_json::Value>,
    pub indexed_content: Option<String>,
}

pub async fn index(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(conversation_id): Path<Uuid>,
    Json(input): Json<IndexRequest>,
) -> ApiResult<(StatusCode, Json<Entry>)> {
    let entry = state
        .services
        .entries
        .index_transcript(
            &subject,
            conversation_id,
            input.content_type,
            input.content,
            input.indexed_content,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}
