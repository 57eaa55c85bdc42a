use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tonic::{Request, Response, Status, Streaming};

use super::{attachment_to_pb, parse_uuid, pb, status_from_error, subject_from_request};
use crate::{
    AppState,
    models::CreateAttachment,
    services::{BlobStoreError, BlobStream},
};

pub struct AttachmentsSvc {
    state: AppState,
}

impl AttachmentsSvc {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

/// Adapt the tail of an upload stream (post-metadata) into a byte stream.
fn chunk_stream(mut stream: Streaming<pb::UploadAttachmentRequest>) -> BlobStream {
    let bytes = async_stream::try_stream! {
        loop {
            let message = stream
                .message()
                .await
                .map_err(|e| BlobStoreError::Io(std::io::Error::other(e)))?;
            match message {
                Some(pb::UploadAttachmentRequest {
                    payload: Some(pb::upload_attachment_request::Payload::Chunk(chunk)),
                }) => yield Bytes::from(chunk),
                Some(_) => {
                    Err(BlobStoreError::Io(std::io::Error::other(
                        "metadata must only appear in the first message",
                    )))?;
                }
                None => break,
            }
        }
    };
    Box::pin(bytes)
}

#[tonic::async_trait]
impl pb::attachments_service_server::AttachmentsService for AttachmentsSvc {
    async fn upload_attachment(
        &self,
        request: Request<Streaming<pb::UploadAttachmentRequest>>,
    ) -> Result<Response<pb::Attachment>, Status> {
        let subject = subject_from_request(&self.state, request.metadata()).await?;
        let mut stream = request.into_inner();

        let metadata = match stream.message().await? {
            Some(pb::UploadAttachmentRequest {
                payload: Some(pb::upload_attachment_request::Payload::Metadata(metadata)),
            }) => metadata,
            _ => {
                return Err(Status::invalid_argument(
                    "the first upload message must carry metadata",
                ));
            }
        };

        let attachment = self
            .state
            .services
            .attachments
            .upload(
                &subject,
                CreateAttachment {
                    content_type: metadata.content_type,
                    filename: metadata.filename,
                    expires_in_secs: metadata.expires_in_secs,
                },
                chunk_stream(stream),
            )
            .await
            .map_err(status_from_error)?;

        Ok(Response::new(attachment_to_pb(attachment)))
    }

    async fn get_attachment(
        &self,
        request: Request<pb::GetAttachmentRequest>,
    ) -> Result<Response<pb::Attachment>, Status> {
        let subject = subject_from_request(&self.state, request.metadata()).await?;
        let id = parse_uuid("attachment_id", &request.into_inner().attachment_id)?;

        let attachment = self
            .state
            .services
            .attachments
            .get(&subject, id)
            .await
            .map_err(status_from_error)?;
        Ok(Response::new(attachment_to_pb(attachment)))
    }

    type DownloadAttachmentStream =
        Pin<Box<dyn Stream<Item = Result<pb::DownloadAttachmentResponse, Status>> + Send>>;

    async fn download_attachment(
        &self,
        request: Request<pb::DownloadAttachmentRequest>,
    ) -> Result<Response<Self::DownloadAttachmentStream>, Status> {
        let subject = subject_from_request(&self.state, request.metadata()).await?;
        let id = parse_uuid("attachment_id", &request.into_inner().attachment_id)?;

        let (attachment, mut bytes) = self
            .state
            .services
            .attachments
            .download(&subject, id)
            .await
            .map_err(status_from_error)?;

        // Mirror of upload: metadata first, then chunks.
        let frames = async_stream::try_stream! {
            yield pb::DownloadAttachmentResponse {
                payload: Some(pb::download_attachment_response::Payload::Metadata(
                    attachment_to_pb(attachment),
                )),
            };
            while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(|e| Status::internal(e.to_string()))?;
                yield pb::DownloadAttachmentResponse {
                    payload: Some(pb::download_attachment_response::Payload::Chunk(
                        chunk.to_vec(),
                    )),
                };
            }
        };

        Ok(Response::new(Box::pin(frames)))
    }

    async fn get_download_url(
        &self,
        request: Request<pb::GetDownloadUrlRequest>,
    ) -> Result<Response<pb::GetDownloadUrlResponse>, Status> {
        let subject = subject_from_request(&self.state, request.metadata()).await?;
        let id = parse_uuid("attachment_id", &request.into_inner().attachment_id)?;

        let url = self
            .state
            .services
            .attachments
            .download_url(&subject, id)
            .await
            .map_err(status_from_error)?;
        Ok(Response::new(pb::GetDownloadUrlResponse { url }))
    }

    async fn delete_attachment(
        &self,
        request: Request<pb::DeleteAttachmentRequest>,
    ) -> Result<Response<pb::DeleteAttachmentResponse>, Status> {
        let subject = subject_from_request(&self.state, request.metadata()).await?;
        let id = parse_uuid("attachment_id", &request.into_inner().attachment_id)?;

        self.state
            .services
            .attachments
            .delete(&subject, id)
            .await
            .map_err(status_from_error)?;
        Ok(Response::new(pb::DeleteAttachmentResponse {}))
    }
}
