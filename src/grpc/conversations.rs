use tonic::{Request, Response, Status};

use super::{conversation_to_pb, parse_uuid, pb, status_from_error, subject_from_request};
use crate::{
    AppState,
    db::{Cursor, ListParams},
    models::{CreateConversation, ForkConversation, ListMode, UpdateConversation},
    services::ServiceError,
};

pub struct ConversationsSvc {
    state: AppState,
}

impl ConversationsSvc {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

fn metadata_from_json(
    raw: Option<&str>,
) -> Result<serde_json::Map<String, serde_json::Value>, Status> {
    match raw {
        None | Some("") => Ok(Default::default()),
        Some(raw) => match super::parse_json("metadata_json", raw)? {
            serde_json::Value::Object(map) => Ok(map),
            _ => Err(Status::invalid_argument(
                "metadata_json must be a JSON object",
            )),
        },
    }
}

fn page_params(page: Option<&pb::PageRequest>) -> Result<ListParams, Status> {
    let Some(page) = page else {
        return Ok(ListParams::default());
    };
    let cursor = page
        .cursor
        .as_deref()
        .map(Cursor::decode)
        .transpose()
        .map_err(|e| Status::invalid_argument(format!("invalid cursor: {e}")))?;
    Ok(ListParams {
        limit: page.limit,
        cursor,
        ..Default::default()
    })
}

fn page_info(result: &crate::db::ListResult<crate::models::Conversation>) -> pb::PageInfo {
    pb::PageInfo {
        has_more: result.has_more,
        next_cursor: result.cursors.next.as_ref().map(|c| c.encode()),
        prev_cursor: result.cursors.prev.as_ref().map(|c| c.encode()),
    }
}

#[tonic::async_trait]
impl pb::conversations_service_server::ConversationsService for ConversationsSvc {
    async fn create_conversation(
        &self,
        request: Request<pb::CreateConversationRequest>,
    ) -> Result<Response<pb::Conversation>, Status> {
        let subject = subject_from_request(&self.state, request.metadata()).await?;
        let input = request.into_inner();

        let conversation = self
            .state
            .services
            .conversations
            .create(
                &subject,
                CreateConversation {
                    title: input.title,
                    metadata: metadata_from_json(input.metadata_json.as_deref())?,
                },
            )
            .await
            .map_err(status_from_error)?;
        Ok(Response::new(conversation_to_pb(conversation)))
    }

    async fn get_conversation(
        &self,
        request: Request<pb::GetConversationRequest>,
    ) -> Result<Response<pb::Conversation>, Status> {
        let subject = subject_from_request(&self.state, request.metadata()).await?;
        let id = parse_uuid("conversation_id", &request.into_inner().conversation_id)?;

        let conversation = self
            .state
            .services
            .conversations
            .get(&subject, id)
            .await
            .map_err(status_from_error)?;
        Ok(Response::new(conversation_to_pb(conversation)))
    }

    async fn list_conversations(
        &self,
        request: Request<pb::ListConversationsRequest>,
    ) -> Result<Response<pb::ListConversationsResponse>, Status> {
        let subject = subject_from_request(&self.state, request.metadata()).await?;
        let input = request.into_inner();

        let mode = match input.mode.as_deref() {
            None | Some("") => ListMode::All,
            Some(raw) => raw
                .parse()
                .map_err(|e: String| Status::invalid_argument(e))?,
        };
        let params = page_params(input.page.as_ref())?;

        let result = self
            .state
            .services
            .conversations
            .list(&subject, mode, params)
            .await
            .map_err(status_from_error)?;

        let page = page_info(&result);
        Ok(Response::new(pb::ListConversationsResponse {
            conversations: result.items.into_iter().map(conversation_to_pb).collect(),
            page: Some(page),
        }))
    }

    async fn update_conversation(
        &self,
        request: Request<pb::UpdateConversationRequest>,
    ) -> Result<Response<pb::Conversation>, Status> {
        let subject = subject_from_request(&self.state, request.metadata()).await?;
        let input = request.into_inner();
        let id = parse_uuid("conversation_id", &input.conversation_id)?;

        let metadata = match input.metadata_json.as_deref() {
            None => None,
            Some(raw) => Some(metadata_from_json(Some(raw))?),
        };

        let conversation = self
            .state
            .services
            .conversations
            .update(
                &subject,
                id,
                UpdateConversation {
                    title: input.title,
                    metadata,
                },
            )
            .await
            .map_err(status_from_error)?;
        Ok(Response::new(conversation_to_pb(conversation)))
    }

    async fn delete_conversation(
        &self,
        request: Request<pb::DeleteConversationRequest>,
    ) -> Result<Response<pb::DeleteConversationResponse>, Status> {
        let subject = subject_from_request(&self.state, request.metadata()).await?;
        let id = parse_uuid("conversation_id", &request.into_inner().conversation_id)?;

        self.state
            .services
            .conversations
            .delete(&subject, id)
            .await
            .map_err(status_from_error)?;
        Ok(Response::new(pb::DeleteConversationResponse {}))
    }

    async fn list_forks(
        &self,
        request: Request<pb::ListForksRequest>,
    ) -> Result<Response<pb::ListForksResponse>, Status> {
        let subject = subject_from_request(&self.state, request.metadata()).await?;
        let id = parse_uuid("conversation_id", &request.into_inner().conversation_id)?;

        let forks = self
            .state
            .services
            .conversations
            .list_forks(&subject, id)
            .await
            .map_err(status_from_error)?;
        Ok(Response::new(pb::ListForksResponse {
            conversations: forks.into_iter().map(conversation_to_pb).collect(),
        }))
    }

    async fn fork_conversation(
        &self,
        request: Request<pb::ForkConversationRequest>,
    ) -> Result<Response<pb::Conversation>, Status> {
        let subject = subject_from_request(&self.state, request.metadata()).await?;
        let input = request.into_inner();
        let id = parse_uuid("conversation_id", &input.conversation_id)?;
        let entry_id = parse_uuid("entry_id", &input.entry_id)?;

        if input.title.as_deref().is_some_and(|t| t.len() > 255) {
            return Err(status_from_error(ServiceError::Validation(
                "title must be at most 255 characters".into(),
            )));
        }

        let fork = self
            .state
            .services
            .conversations
            .fork(
                &subject,
                id,
                ForkConversation {
                    entry_id,
                    title: input.title,
                },
            )
            .await
            .map_err(status_from_error)?;
        Ok(Response::new(conversation_to_pb(fork)))
    }
}
