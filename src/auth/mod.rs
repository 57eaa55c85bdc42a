//! Bearer-token resolution.
//!
//! Every request carries `Authorization: Bearer <token>`. A
//! [`TokenResolver`] turns the token into a user id: either by validating
//! an OIDC JWT (`jwt` feature) or, in passthrough mode, by treating the
//! token itself as the user id (test and API-key deployments).
//!
//! Agents additionally identify themselves with an `X-Client-ID` header;
//! the pair lands in a [`Subject`] attached to the request.

mod resolver;

pub use resolver::*;

use serde::Serialize;

/// The authenticated caller: a user, optionally acting through an agent.
#[derive(Debug, Clone, Serialize)]
pub struct Subject {
    pub user_id: String,
    /// Agent identity from `X-Client-ID`, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl Subject {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            client_id: None,
        }
    }

    pub fn with_client(user_id: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            client_id: Some(client_id.into()),
        }
    }
}
