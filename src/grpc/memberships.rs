use tonic::{Request, Response, Status};

use super::{membership_to_pb, parse_uuid, pb, status_from_error, subject_from_request, transfer_to_pb};
use crate::{
    AppState,
    models::{CreateTransfer, ShareRequest},
};

pub struct MembershipsSvc {
    state: AppState,
}

impl MembershipsSvc {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl pb::conversation_memberships_service_server::ConversationMembershipsService
    for MembershipsSvc
{
    async fn list_memberships(
        &self,
        request: Request<pb::ListMembershipsRequest>,
    ) -> Result<Response<pb::ListMembershipsResponse>, Status> {
        let subject = subject_from_request(&self.state, request.metadata()).await?;
        let id = parse_uuid("conversation_id", &request.into_inner().conversation_id)?;

        let memberships = self
            .state
            .services
            .memberships
            .list(&subject, id)
            .await
            .map_err(status_from_error)?;
        Ok(Response::new(pb::ListMembershipsResponse {
            memberships: memberships.into_iter().map(membership_to_pb).collect(),
        }))
    }

    async fn share(
        &self,
        request: Request<pb::ShareRequest>,
    ) -> Result<Response<pb::Membership>, Status> {
        let subject = subject_from_request(&self.state, request.metadata()).await?;
        let input = request.into_inner();
        let id = parse_uuid("conversation_id", &input.conversation_id)?;
        let access_level = input
            .access_level
            .parse()
            .map_err(|e: String| Status::invalid_argument(e))?;

        let membership = self
            .state
            .services
            .memberships
            .share(
                &subject,
                id,
                ShareRequest {
                    user_id: input.user_id,
                    access_level,
                },
            )
            .await
            .map_err(status_from_error)?;
        Ok(Response::new(membership_to_pb(membership)))
    }

    async fn unshare(
        &self,
        request: Request<pb::UnshareRequest>,
    ) -> Result<Response<pb::UnshareResponse>, Status> {
        let subject = subject_from_request(&self.state, request.metadata()).await?;
        let input = request.into_inner();
        let id = parse_uuid("conversation_id", &input.conversation_id)?;

        self.state
            .services
            .memberships
            .unshare(&subject, id, &input.user_id)
            .await
            .map_err(status_from_error)?;
        Ok(Response::new(pb::UnshareResponse {}))
    }
}

pub struct TransfersSvc {
    state: AppState,
}

impl TransfersSvc {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl pb::ownership_transfers_service_server::OwnershipTransfersService for TransfersSvc {
    async fn create_transfer(
        &self,
        request: Request<pb::CreateTransferRequest>,
    ) -> Result<Response<pb::OwnershipTransfer>, Status> {
        let subject = subject_from_request(&self.state, request.metadata()).await?;
        let input = request.into_inner();
        let id = parse_uuid("conversation_id", &input.conversation_id)?;

        let transfer = self
            .state
            .services
            .memberships
            .create_transfer(
                &subject,
                id,
                CreateTransfer {
                    to_user_id: input.to_user_id,
                },
            )
            .await
            .map_err(status_from_error)?;
        Ok(Response::new(transfer_to_pb(transfer)))
    }

    async fn list_transfers(
        &self,
        request: Request<pb::ListTransfersRequest>,
    ) -> Result<Response<pb::ListTransfersResponse>, Status> {
        let subject = subject_from_request(&self.state, request.metadata()).await?;
        let transfers = self
            .state
            .services
            .memberships
            .list_transfers(&subject)
            .await
            .map_err(status_from_error)?;
        Ok(Response::new(pb::ListTransfersResponse {
            transfers: transfers.into_iter().map(transfer_to_pb).collect(),
        }))
    }

    async fn get_transfer(
        &self,
        request: Request<pb::GetTransferRequest>,
    ) -> Result<Response<pb::OwnershipTransfer>, Status> {
        let subject = subject_from_request(&self.state, request.metadata()).await?;
        let id = parse_uuid("transfer_id", &request.into_inner().transfer_id)?;

        let transfer = self
            .state
            .services
            .memberships
            .get_transfer(&subject, id)
            .await
            .map_err(status_from_error)?;
        Ok(Response::new(transfer_to_pb(transfer)))
    }

    async fn accept_transfer(
        &self,
        request: Request<pb::AcceptTransferRequest>,
    ) -> Result<Response<pb::OwnershipTransfer>, Status> {
        let subject = subject_from_request(&self.state, request.metadata()).await?;
        let id = parse_uuid("transfer_id", &request.into_inner().transfer_id)?;

        let transfer = self
            .state
            .services
            .memberships
            .accept_transfer(&subject, id)
            .await
            .map_err(status_from_error)?;
        Ok(Response::new(transfer_to_pb(transfer)))
    }

    async fn cancel_transfer(
        &self,
        request: Request<pb::CancelTransferRequest>,
    ) -> Result<Response<pb::OwnershipTransfer>, Status> {
        let subject = subject_from_request(&self.state, request.metadata()).await?;
        let id = parse_uuid("transfer_id", &request.into_inner().transfer_id)?;

        let transfer = self
            .state
            .services
            .memberships
            .cancel_transfer(&subject, id)
            .await
            .map_err(status_from_error)?;
        Ok(Response::new(transfer_to_pb(transfer)))
    }
}
