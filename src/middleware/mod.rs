mod auth;
mod metrics;
mod request_id;

pub use auth::{CLIENT_ID_HEADER, auth_middleware};
pub use metrics::metrics_middleware;
pub use request_id::request_id_layer;
