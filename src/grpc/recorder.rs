use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tonic::{Request, Response, Status, Streaming};
use uuid::Uuid;

use super::{parse_uuid, pb, status_from_error, subject_from_request};
use crate::{AppState, models::AccessLevel, recorder::RecorderFrame};

pub struct RecorderSvc {
    state: AppState,
}

impl RecorderSvc {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl pb::response_recorder_service_server::ResponseRecorderService for RecorderSvc {
    async fn record(
        &self,
        request: Request<Streaming<pb::RecordRequest>>,
    ) -> Result<Response<pb::RecordResponse>, Status> {
        let subject = subject_from_request(&self.state, request.metadata()).await?;
        let mut stream = request.into_inner();

        let conversation_id = match stream.message().await? {
            Some(pb::RecordRequest {
                payload: Some(pb::record_request::Payload::Start(start)),
            }) => parse_uuid("conversation_id", &start.conversation_id)?,
            _ => {
                return Err(Status::invalid_argument(
                    "the first record message must carry a start payload",
                ));
            }
        };

        // Recording produces transcript content, so the producer needs
        // writer access, not just visibility.
        let conversation = self
            .state
            .services
            .conversations
            .get(&subject, conversation_id)
            .await
            .map_err(status_from_error)?;
        self.state
            .services
            .access
            .require(conversation.group_id, &subject, AccessLevel::Writer)
            .await
            .map_err(status_from_error)?;

        let handle = self
            .state
            .recorder
            .record(conversation_id, &subject)
            .await
            .map_err(status_from_error)?;

        let mut chunks_recorded: u64 = 0;
        let mut final_state = "completed";
        loop {
            match stream.message().await? {
                Some(pb::RecordRequest {
                    payload: Some(pb::record_request::Payload::Chunk(chunk)),
                }) => {
                    let accepted = handle
                        .append(Bytes::from(chunk))
                        .await
                        .map_err(status_from_error)?;
                    if !accepted {
                        final_state = "cancelled";
                        break;
                    }
                    chunks_recorded += 1;
                }
                Some(_) => {
                    return Err(Status::invalid_argument(
                        "start must only appear in the first message",
                    ));
                }
                None => break,
            }
        }

        if final_state == "completed" {
            handle.complete();
        }
        Ok(Response::new(pb::RecordResponse {
            final_state: final_state.to_string(),
            chunks_recorded,
        }))
    }

    type ReplayStream = Pin<Box<dyn Stream<Item = Result<pb::ReplayFrame, Status>> + Send>>;

    async fn replay(
        &self,
        request: Request<pb::ReplayRequest>,
    ) -> Result<Response<Self::ReplayStream>, Status> {
        let subject = subject_from_request(&self.state, request.metadata()).await?;
        let conversation_id = parse_uuid("conversation_id", &request.into_inner().conversation_id)?;

        self.state
            .services
            .conversations
            .get(&subject, conversation_id)
            .await
            .map_err(status_from_error)?;

        let frames = self
            .state
            .recorder
            .replay(conversation_id)
            .await
            .map_err(status_from_error)?;

        let stream = frames.map(|frame| match frame {
            Ok(RecorderFrame::Chunk(chunk)) => Ok(pb::ReplayFrame {
                payload: Some(pb::replay_frame::Payload::Chunk(chunk.to_vec())),
            }),
            Ok(RecorderFrame::Done) => Ok(pb::ReplayFrame {
                payload: Some(pb::replay_frame::Payload::Done(true)),
            }),
            Ok(RecorderFrame::Cancelled) => Ok(pb::ReplayFrame {
                payload: Some(pb::replay_frame::Payload::Cancelled(true)),
            }),
            Err(e) => Err(Status::internal(e.to_string())),
        });

        Ok(Response::new(Box::pin(stream)))
    }

    async fn cancel(
        &self,
        request: Request<pb::CancelRecordingRequest>,
    ) -> Result<Response<pb::CancelRecordingResponse>, Status> {
        let subject = subject_from_request(&self.state, request.metadata()).await?;
        let conversation_id = parse_uuid("conversation_id", &request.into_inner().conversation_id)?;

        // Cancelling stops another member's in-flight generation; readers
        // don't get to do that.
        let conversation = self
            .state
            .services
            .conversations
            .get(&subject, conversation_id)
            .await
            .map_err(status_from_error)?;
        self.state
            .services
            .access
            .require(conversation.group_id, &subject, AccessLevel::Writer)
            .await
            .map_err(status_from_error)?;
        self.state
            .recorder
            .cancel(conversation_id)
            .await
            .map_err(status_from_error)?;
        Ok(Response::new(pb::CancelRecordingResponse {}))
    }

    async fn check_recordings(
        &self,
        request: Request<pb::CheckRecordingsRequest>,
    ) -> Result<Response<pb::CheckRecordingsResponse>, Status> {
        let _subject = subject_from_request(&self.state, request.metadata()).await?;
        let input = request.into_inner();

        let ids: Vec<Uuid> = input
            .conversation_ids
            .iter()
            .map(|raw| parse_uuid("conversation_ids", raw))
            .collect::<Result<_, _>>()?;

        let resumable = self
            .state
            .recorder
            .check_recordings(&ids)
            .await
            .map_err(status_from_error)?;
        Ok(Response::new(pb::CheckRecordingsResponse {
            resumable_conversation_ids: resumable.iter().map(Uuid::to_string).collect(),
        }))
    }

    async fn is_enabled(
        &self,
        _request: Request<pb::IsEnabledRequest>,
    ) -> Result<Response<pb::IsEnabledResponse>, Status> {
        Ok(Response::new(pb::IsEnabledResponse {
            enabled: self.state.recorder.enabled(),
        }))
    }
}
