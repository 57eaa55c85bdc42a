use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use http::header;

use crate::{AppState, auth::Subject, routes::ApiError, services::ServiceError};

/// Header carrying the agent identity alongside the user's bearer token.
pub const CLIENT_ID_HEADER: &str = "x-client-id";

/// Resolve the bearer token into a [`Subject`] and attach it to the
/// request. Requests without a valid token get the `unauthenticated`
/// envelope.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(ApiError(ServiceError::Unauthenticated))?
        .to_string();

    let user_id = state
        .resolver
        .resolve(&token)
        .await
        .map_err(|_| ApiError(ServiceError::Unauthenticated))?;

    let client_id = request
        .headers()
        .get(CLIENT_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(String::from);

    let subject = Subject { user_id, client_id };
    request.extensions_mut().insert(subject);

    Ok(next.run(request).await)
}
