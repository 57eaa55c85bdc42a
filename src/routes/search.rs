use axum::{Extension, Json, extract::State};
use serde::Deserialize;

use super::error::ApiResult;
use crate::{
    AppState,
    auth::Subject,
    db::ListParams,
    services::{SearchHit, SearchMode},
};

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub mode: SearchMode,
    pub limit: Option<usize>,
}

pub async fn search(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Json(input): Json<SearchRequest>,
) -> ApiResult<Json<Vec<SearchHit>>> {
    let limit = input.limit.unwrap_or(20).clamp(1, 100);
    let hits = state
        .services
        .search
        .search(
            &subject,
            &input.query,
            input.mode,
            limit,
            ListParams::default(),
        )
        .await?;
    Ok(Json(hits))
}
