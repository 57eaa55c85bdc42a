//! gRPC front door, mirroring the REST surface.
//!
//! Auth matches REST: `authorization: Bearer <token>` metadata resolved by
//! the token resolver, plus optional `x-client-id` for agents. Domain
//! errors map onto gRPC status codes once, here.

mod attachments;
mod conversations;
mod entries;
mod memberships;
mod recorder;
mod search;
mod system;

pub mod pb {
    tonic::include_proto!("mnemo.v1");
}

use std::net::SocketAddr;

use tonic::{Status, transport::Server};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{AppState, auth::Subject, services::ServiceError};

/// Map the domain error taxonomy onto gRPC status codes.
pub(crate) fn status_from_error(err: ServiceError) -> Status {
    match err {
        ServiceError::NotFound => Status::not_found("not found"),
        ServiceError::Forbidden(msg) => Status::permission_denied(msg),
        ServiceError::Validation(msg) => Status::invalid_argument(msg),
        ServiceError::Conflict(msg) => Status::aborted(msg),
        ServiceError::FileTooLarge { max } => Status::resource_exhausted(format!(
            "attachment exceeds the maximum size of {max} bytes"
        )),
        ServiceError::Unauthenticated => Status::unauthenticated("a valid bearer token is required"),
        ServiceError::Unimplemented(msg) => Status::unimplemented(msg),
        ServiceError::Storage(msg) => {
            tracing::error!(error = %msg, "Storage error");
            Status::internal("a storage backend error occurred")
        }
        ServiceError::Database(err) => {
            tracing::error!(error = %err, "Database error");
            Status::internal("an internal database error occurred")
        }
        ServiceError::Internal(msg) => {
            tracing::error!(error = %msg, "Internal error");
            Status::internal("an internal error occurred")
        }
    }
}

/// Resolve the caller from request metadata.
pub(crate) async fn subject_from_request(
    state: &AppState,
    metadata: &tonic::metadata::MetadataMap,
) -> Result<Subject, Status> {
    let token = metadata
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| Status::unauthenticated("a valid bearer token is required"))?
        .to_string();

    let client_id = metadata
        .get("x-client-id")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(String::from);

    let user_id = state
        .resolver
        .resolve(&token)
        .await
        .map_err(|_| Status::unauthenticated("invalid bearer token"))?;

    Ok(Subject { user_id, client_id })
}

pub(crate) fn parse_uuid(field: &str, value: &str) -> Result<uuid::Uuid, Status> {
    uuid::Uuid::parse_str(value)
        .map_err(|_| Status::invalid_argument(format!("{field} must be a UUID")))
}

pub(crate) fn parse_json(field: &str, value: &str) -> Result<serde_json::Value, Status> {
    serde_json::from_str(value)
        .map_err(|e| Status::invalid_argument(format!("{field} must be valid JSON: {e}")))
}

pub(crate) fn parse_json_array(
    field: &str,
    value: &str,
) -> Result<Vec<serde_json::Value>, Status> {
    match parse_json(field, value)? {
        serde_json::Value::Array(values) => Ok(values),
        _ => Err(Status::invalid_argument(format!(
            "{field} must be a JSON array"
        ))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Model → wire conversions
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) fn conversation_to_pb(conv: crate::models::Conversation) -> pb::Conversation {
    pb::Conversation {
        id: conv.id.to_string(),
        group_id: conv.group_id.to_string(),
        owner_user_id: conv.owner_user_id,
        title: conv.title,
        metadata_json: serde_json::Value::Object(conv.metadata).to_string(),
        forked_at_conversation_id: conv.forked_at_conversation_id.map(|id| id.to_string()),
        forked_at_entry_id: conv.forked_at_entry_id.map(|id| id.to_string()),
        created_at: conv.created_at.to_rfc3339(),
        updated_at: conv.updated_at.to_rfc3339(),
    }
}

pub(crate) fn entry_to_pb(entry: crate::models::Entry) -> pb::Entry {
    pb::Entry {
        id: entry.id.to_string(),
        conversation_id: entry.conversation_id.to_string(),
        group_id: entry.group_id.to_string(),
        channel: entry.channel.as_str().to_string(),
        content_type: entry.content_type,
        epoch: entry.epoch,
        client_id: entry.client_id,
        user_id: entry.user_id,
        content_json: entry.content.to_string(),
        indexed_content: entry.indexed_content,
        created_at: entry.created_at.to_rfc3339(),
    }
}

pub(crate) fn membership_to_pb(
    membership: crate::models::ConversationMembership,
) -> pb::Membership {
    pb::Membership {
        group_id: membership.group_id.to_string(),
        user_id: membership.user_id,
        access_level: membership.access_level.as_str().to_string(),
        created_at: membership.created_at.to_rfc3339(),
    }
}

pub(crate) fn transfer_to_pb(
    transfer: crate::models::OwnershipTransfer,
) -> pb::OwnershipTransfer {
    pb::OwnershipTransfer {
        id: transfer.id.to_string(),
        group_id: transfer.group_id.to_string(),
        from_user_id: transfer.from_user_id,
        to_user_id: transfer.to_user_id,
        status: transfer.status.as_str().to_string(),
        created_at: transfer.created_at.to_rfc3339(),
    }
}

pub(crate) fn attachment_to_pb(attachment: crate::models::Attachment) -> pb::Attachment {
    pb::Attachment {
        id: attachment.id.to_string(),
        user_id: attachment.user_id,
        content_type: attachment.content_type,
        filename: attachment.filename,
        size_bytes: attachment.size_bytes,
        sha256: attachment.sha256,
        entry_id: attachment.entry_id.map(|id| id.to_string()),
        expires_at: attachment.expires_at.map(|ts| ts.to_rfc3339()),
        created_at: attachment.created_at.to_rfc3339(),
    }
}

/// Serve all gRPC services until the shutdown token fires.
pub async fn serve(
    state: AppState,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> Result<(), tonic::transport::Error> {
    info!(%addr, "Starting gRPC listener");

    Server::builder()
        .add_service(pb::system_service_server::SystemServiceServer::new(
            system::SystemSvc::new(state.clone()),
        ))
        .add_service(
            pb::conversations_service_server::ConversationsServiceServer::new(
                conversations::ConversationsSvc::new(state.clone()),
            ),
        )
        .add_service(pb::entries_service_server::EntriesServiceServer::new(
            entries::EntriesSvc::new(state.clone()),
        ))
        .add_service(
            pb::conversation_memberships_service_server::ConversationMembershipsServiceServer::new(
                memberships::MembershipsSvc::new(state.clone()),
            ),
        )
        .add_service(
            pb::ownership_transfers_service_server::OwnershipTransfersServiceServer::new(
                memberships::TransfersSvc::new(state.clone()),
            ),
        )
        .add_service(pb::search_service_server::SearchServiceServer::new(
            search::SearchSvc::new(state.clone()),
        ))
        .add_service(
            pb::attachments_service_server::AttachmentsServiceServer::new(
                attachments::AttachmentsSvc::new(state.clone()),
            ),
        )
        .add_service(
            pb::response_recorder_service_server::ResponseRecorderServiceServer::new(
                recorder::RecorderSvc::new(state),
            ),
        )
        .serve_with_shutdown(addr, shutdown.cancelled_owned())
        .await
}
