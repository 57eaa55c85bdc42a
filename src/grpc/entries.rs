use tonic::{Request, Response, Status};

use super::{
    entry_to_pb, parse_json_array, parse_uuid, pb, status_from_error, subject_from_request,
};
use crate::{
    AppState,
    db::{Cursor, ListParams},
    models::{AppendEntries, Channel, EntryQuery, EpochFilter, NewEntry, SyncMemory},
};

pub struct EntriesSvc {
    state: AppState,
}

impl EntriesSvc {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

fn epoch_filter(raw: Option<&str>) -> Result<EpochFilter, Status> {
    match raw {
        None | Some("") => Ok(EpochFilter::All),
        Some("latest") => Ok(EpochFilter::Latest),
        Some(raw) => raw.parse().map(EpochFilter::At).map_err(|_| {
            Status::invalid_argument(format!("epoch must be 'latest' or an integer, got '{raw}'"))
        }),
    }
}

fn channel(raw: Option<&str>) -> Result<Option<Channel>, Status> {
    match raw {
        None | Some("") => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e: String| Status::invalid_argument(e)),
    }
}

#[tonic::async_trait]
impl pb::entries_service_server::EntriesService for EntriesSvc {
    async fn list_entries(
        &self,
        request: Request<pb::ListEntriesRequest>,
    ) -> Result<Response<pb::ListEntriesResponse>, Status> {
        let subject = subject_from_request(&self.state, request.metadata()).await?;
        let input = request.into_inner();
        let conversation_id = parse_uuid("conversation_id", &input.conversation_id)?;

        let (limit, cursor) = match &input.page {
            Some(page) => (
                page.limit,
                page.cursor
                    .as_deref()
                    .map(Cursor::decode)
                    .transpose()
                    .map_err(|e| Status::invalid_argument(format!("invalid cursor: {e}")))?,
            ),
            None => (None, None),
        };

        let query = EntryQuery {
            channel: channel(input.channel.as_deref())?,
            epoch: epoch_filter(input.epoch.as_deref())?,
            client_id: input.client_id.or_else(|| subject.client_id.clone()),
            all_forks: input.all_forks,
        };

        let result = self
            .state
            .services
            .entries
            .list(
                &subject,
                conversation_id,
                query,
                ListParams {
                    limit,
                    cursor,
                    ..Default::default()
                },
            )
            .await
            .map_err(status_from_error)?;

        let page = pb::PageInfo {
            has_more: result.has_more,
            next_cursor: result.cursors.next.as_ref().map(|c| c.encode()),
            prev_cursor: result.cursors.prev.as_ref().map(|c| c.encode()),
        };
        Ok(Response::new(pb::ListEntriesResponse {
            entries: result.items.into_iter().map(entry_to_pb).collect(),
            page: Some(page),
        }))
    }

    async fn append_entries(
        &self,
        request: Request<pb::AppendEntriesRequest>,
    ) -> Result<Response<pb::AppendEntriesResponse>, Status> {
        let subject = subject_from_request(&self.state, request.metadata()).await?;
        let input = request.into_inner();
        let conversation_id = parse_uuid("conversation_id", &input.conversation_id)?;

        let mut entries = Vec::with_capacity(input.entries.len());
        for new_entry in input.entries {
            entries.push(NewEntry {
                channel: new_entry
                    .channel
                    .parse()
                    .map_err(|e: String| Status::invalid_argument(e))?,
                content_type: new_entry.content_type,
                content: parse_json_array("content_json", &new_entry.content_json)?,
                epoch: new_entry.epoch,
                indexed_content: new_entry.indexed_content,
            });
        }

        let stored = self
            .state
            .services
            .entries
            .append(&subject, conversation_id, AppendEntries { entries })
            .await
            .map_err(status_from_error)?;
        Ok(Response::new(pb::AppendEntriesResponse {
            entries: stored.into_iter().map(entry_to_pb).collect(),
        }))
    }

    async fn sync_memory(
        &self,
        request: Request<pb::SyncMemoryRequest>,
    ) -> Result<Response<pb::SyncMemoryResponse>, Status> {
        let subject = subject_from_request(&self.state, request.metadata()).await?;
        let input = request.into_inner();
        let conversation_id = parse_uuid("conversation_id", &input.conversation_id)?;

        let outcome = self
            .state
            .services
            .entries
            .sync_memory(
                &subject,
                conversation_id,
                SyncMemory {
                    content_type: input.content_type,
                    content: parse_json_array("content_json", &input.content_json)?,
                },
            )
            .await
            .map_err(status_from_error)?;

        Ok(Response::new(pb::SyncMemoryResponse {
            no_op: outcome.no_op,
            epoch_incremented: outcome.epoch_incremented,
            epoch: outcome.epoch,
            entry: outcome.entry.map(entry_to_pb),
        }))
    }

    async fn index_transcript(
        &self,
        request: Request<pb::IndexTranscriptRequest>,
    ) -> Result<Response<pb::Entry>, Status> {
        let subject = subject_from_request(&self.state, request.metadata()).await?;
        let input = request.into_inner();
        let conversation_id = parse_uuid("conversation_id", &input.conversation_id)?;

        let entry = self
            .state
            .services
            .entries
            .index_transcript(
                &subject,
                conversation_id,
                input.content_type,
                parse_json_array("content_json", &input.content_json)?,
                input.indexed_content,
            )
            .await
            .map_err(status_from_error)?;
        Ok(Response::new(entry_to_pb(entry)))
    }
}
