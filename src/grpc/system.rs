use tonic::{Request, Response, Status};

use super::{pb, subject_from_request};
use crate::AppState;

pub struct SystemSvc {
    state: AppState,
}

impl SystemSvc {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl pb::system_service_server::SystemService for SystemSvc {
    async fn get_me(
        &self,
        request: Request<pb::GetMeRequest>,
    ) -> Result<Response<pb::GetMeResponse>, Status> {
        let subject = subject_from_request(&self.state, request.metadata()).await?;
        Ok(Response::new(pb::GetMeResponse {
            user_id: subject.user_id,
            client_id: subject.client_id,
        }))
    }

    async fn get_health(
        &self,
        _request: Request<pb::GetHealthRequest>,
    ) -> Result<Response<pb::GetHealthResponse>, Status> {
        match self.state.db.health_check().await {
            Ok(()) => Ok(Response::new(pb::GetHealthResponse {
                status: "ok".to_string(),
            })),
            Err(e) => Err(Status::unavailable(format!("database unavailable: {e}"))),
        }
    }
}
