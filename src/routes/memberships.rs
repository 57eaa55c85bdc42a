use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use super::error::ApiResult;
use crate::{
    AppState,
    auth::Subject,
    models::{ConversationMembership, CreateTransfer, OwnershipTransfer, ShareRequest},
};

pub async fn list(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<Json<Vec<ConversationMembership>>> {
    Ok(Json(
        state
            .services
            .memberships
            .list(&subject, conversation_id)
            .await?,
    ))
}

pub async fn share(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(conversation_id): Path<Uuid>,
    Json(input): Json<ShareRequest>,
) -> ApiResult<Json<ConversationMembership>> {
    Ok(Json(
        state
            .services
            .memberships
            .share(&subject, conversation_id, input)
            .await?,
    ))
}

pub async fn unshare(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path((conversation_id, user_id)): Path<(Uuid, String)>,
) -> ApiResult<StatusCode> {
    state
        .services
        .memberships
        .unshare(&subject, conversation_id, &user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_transfer(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(conversation_id): Path<Uuid>,
    Json(input): Json<CreateTransfer>,
) -> ApiResult<(StatusCode, Json<OwnershipTransfer>)> {
    let transfer = state
        .services
        .memberships
        .create_transfer(&subject, conversation_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(transfer)))
}

pub async fn list_transfers(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
) -> ApiResult<Json<Vec<OwnershipTransfer>>> {
    Ok(Json(
        state.services.memberships.list_transfers(&subject).await?,
    ))
}

pub async fn get_transfer(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(transfer_id): Path<Uuid>,
) -> ApiResult<Json<OwnershipTransfer>> {
    Ok(Json(
        state
            .services
            .memberships
            .get_transfer(&subject, transfer_id)
            .await?,
    ))
}

pub async fn accept_transfer(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(transfer_id): Path<Uuid>,
) -> ApiResult<Json<OwnershipTransfer>> {
    Ok(Json(
        state
            .services
            .memberships
            .accept_transfer(&subject, transfer_id)
            .await?,
    ))
}

pub async fn cancel_transfer(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(transfer_id): Path<Uuid>,
) -> ApiResult<Json<OwnershipTransfer>> {
    Ok(Json(
        state
            .services
            .memberships
            .cancel_transfer(&subject, transfer_id)
            .await?,
    ))
}
