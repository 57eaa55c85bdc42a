use axum::{
    Extension, Json,
    body::Body,
    extract::{Path, Query, Request, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{ApiError, ApiResult};
use crate::{
    AppState,
    auth::Subject,
    models::{Attachment, CreateAttachment},
    services::{BlobStoreError, BlobStream, ServiceError},
};

/// Query parameters accompanying a raw-body upload.
#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub filename: Option<String>,
    pub expires_in_secs: Option<u64>,
}

fn body_stream(request: Request) -> BlobStream {
    let stream = request
        .into_body()
        .into_data_stream()
        .map_err(|e| BlobStoreError::Io(std::io::Error::other(e)));
    Box::pin(stream)
}

/// Upload an attachment: metadata in headers/query, bytes as the raw body.
pub async fn upload(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Query(query): Query<UploadQuery>,
    request: Request,
) -> ApiResult<(StatusCode, Json<Attachment>)> {
    // Fail fast on a declared length; the streaming wrapper still enforces
    // the limit for chunked bodies.
    let max = state.config.storage.max_attachment_bytes;
    if let Some(length) = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<i64>().ok())
    {
        if length > max {
            return Err(ApiError(ServiceError::FileTooLarge { max }));
        }
    }

    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let input = CreateAttachment {
        content_type,
        filename: query.filename,
        expires_in_secs: query.expires_in_secs,
    };

    let attachment = state
        .services
        .attachments
        .upload(&subject, input, body_stream(request))
        .await?;
    Ok((StatusCode::CREATED, Json(attachment)))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Attachment>> {
    Ok(Json(state.services.attachments.get(&subject, id).await?))
}

pub(crate) fn attachment_response(attachment: &Attachment, stream: BlobStream) -> Response {
    let filename = attachment
        .filename
        .clone()
        .unwrap_or_else(|| attachment.id.to_string());
    Response::builder()
        .header(header::CONTENT_TYPE, attachment.content_type.clone())
        .header(header::CONTENT_LENGTH, attachment.size_bytes)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        )
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

pub async fn download(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let (attachment, stream) = state.services.attachments.download(&subject, id).await?;
    Ok(attachment_response(&attachment, stream))
}

#[derive(Debug, Serialize)]
pub struct DownloadUrlResponse {
    pub url: String,
}

pub async fn download_url(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DownloadUrlResponse>> {
    let url = state.services.attachments.download_url(&subject, id).await?;
    Ok(Json(DownloadUrlResponse { url }))
}

/// Unauthenticated download via a signed token. Browsers open this from
/// `<a href>` without auth headers; the token is the credential.
pub async fn download_by_token(
    State(state): State<AppState>,
    Path((token, _filename)): Path<(String, String)>,
) -> ApiResult<Response> {
    let (attachment, stream) = state.services.attachments.download_by_token(&token).await?;
    Ok(attachment_response(&attachment, stream))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.services.attachments.delete(&subject, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
