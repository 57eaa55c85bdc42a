mod admin;
mod attachments;
mod conversations;
mod entries;
mod error;
mod memberships;
mod resume;
mod search;
mod system;

pub use error::{ApiError, ApiResult, ErrorBody};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{delete, get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    AppState,
    middleware::{auth_middleware, metrics_middleware},
};

/// Assemble the `/v1` REST surface plus health/metrics endpoints.
pub fn build_router(state: AppState) -> Router {
    let attachment_body_limit =
        DefaultBodyLimit::max((state.config.storage.max_attachment_bytes as usize).saturating_add(1024));

    let authed = Router::new()
        .route(
            "/conversations",
            post(conversations::create).get(conversations::list),
        )
        .route("/conversations/search", post(search::search))
        .route("/conversations/resume-check", post(resume::resume_check))
        .route(
            "/conversations/{id}",
            get(conversations::get)
                .patch(conversations::update)
                .delete(conversations::delete),
        )
        .route(
            "/conversations/{id}/forks",
            get(conversations::list_forks).post(conversations::fork),
        )
        .route(
            "/conversations/{id}/entries",
            get(entries::list).post(entries::append),
        )
        .route("/conversations/{id}/entries/sync", post(entries::sync))
        .route("/conversations/{id}/index", post(entries::index))
        .route("/conversations/{id}/resume", get(resume::resume))
        .route("/conversations/{id}/cancel", post(resume::cancel))
        .route(
            "/conversations/{id}/memberships",
            get(memberships::list).post(memberships::share),
        )
        .route(
            "/conversations/{id}/memberships/{user_id}",
            delete(memberships::unshare),
        )
        .route(
            "/conversations/{id}/transfers",
            post(memberships::create_transfer),
        )
        .route("/ownership-transfers", get(memberships::list_transfers))
        .route("/ownership-transfers/{id}", get(memberships::get_transfer))
        .route(
            "/ownership-transfers/{id}/accept",
            post(memberships::accept_transfer),
        )
        .route(
            "/ownership-transfers/{id}/cancel",
            post(memberships::cancel_transfer),
        )
        .route(
            "/attachments",
            post(attachments::upload).layer(attachment_body_limit),
        )
        .route(
            "/attachments/{id}",
            get(attachments::get).delete(attachments::delete),
        )
        .route("/attachments/{id}/content", get(attachments::download))
        .route(
            "/attachments/{id}/download-url",
            get(attachments::download_url),
        )
        .route("/me", get(system::me))
        .route("/admin/evict", post(admin::evict_now))
        .route("/admin/conversations/{id}", get(admin::get_conversation))
        .route("/admin/stats", get(admin::stats))
        .layer(from_fn_with_state(state.clone(), auth_middleware));

    // No bearer token: signed-token downloads and operational endpoints.
    let public = Router::new()
        .route(
            "/attachments/download/{token}/{filename}",
            get(attachments::download_by_token),
        )
        .route("/config.json", get(system::config_json))
        .route("/health", get(system::health))
        .route("/ready", get(system::ready))
        .route("/metrics", get(system::metrics));

    let (set_request_id, propagate_request_id) = crate::middleware::request_id_layer();

    Router::new()
        .nest("/v1", authed.merge(public))
        .route("/health", get(system::health))
        .route("/ready", get(system::ready))
        .layer(DefaultBodyLimit::max(state.config.server.max_body_bytes))
        .layer(cors_layer(&state))
        .layer(axum::middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(propagate_request_id)
        .layer(set_request_id)
        .with_state(state)
}

/// Management-only router (health/ready/metrics), bound to the management
/// listener when one is configured.
pub fn build_management_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(system::health))
        .route("/ready", get(system::ready))
        .route("/metrics", get(system::metrics))
        .with_state(state)
}

fn cors_layer(state: &AppState) -> CorsLayer {
    let origins = &state.config.server.cors.allowed_origins;
    if origins.is_empty() {
        CorsLayer::new()
    } else if origins.iter().any(|origin| origin == "*") {
        CorsLayer::permissive()
    } else {
        let parsed: Vec<_> = origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(parsed)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any)
    }
}
