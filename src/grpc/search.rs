use tonic::{Request, Response, Status};

use super::{entry_to_pb, pb, status_from_error, subject_from_request};
use crate::{AppState, db::ListParams, services::SearchMode};

pub struct SearchSvc {
    state: AppState,
}

impl SearchSvc {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl pb::search_service_server::SearchService for SearchSvc {
    async fn search(
        &self,
        request: Request<pb::SearchRequest>,
    ) -> Result<Response<pb::SearchResponse>, Status> {
        let subject = subject_from_request(&self.state, request.metadata()).await?;
        let input = request.into_inner();

        let mode = match input.mode.as_deref() {
            None | Some("") | Some("hybrid") => SearchMode::Hybrid,
            Some("lexical") => SearchMode::Lexical,
            Some("vector") => SearchMode::Vector,
            Some(other) => {
                return Err(Status::invalid_argument(format!(
                    "mode must be lexical, vector, or hybrid, got '{other}'"
                )));
            }
        };
        let limit = input.limit.unwrap_or(20).clamp(1, 100) as usize;

        let hits = self
            .state
            .services
            .search
            .search(&subject, &input.query, mode, limit, ListParams::default())
            .await
            .map_err(status_from_error)?;

        Ok(Response::new(pb::SearchResponse {
            hits: hits
                .into_iter()
                .map(|hit| pb::SearchHit {
                    entry: Some(entry_to_pb(hit.entry)),
                    score: hit.score,
                })
                .collect(),
        }))
    }
}
