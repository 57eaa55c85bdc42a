use uuid::Uuid;

use crate::db::error::{DbError, DbResult};

/// Parse a UUID string from the database, returning a DbError on failure
pub fn parse_uuid(s: &str) -> DbResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| DbError::Internal(format!("Invalid UUID in database: {}", e)))
}

/// Parse a UUID from an optional TEXT column.
pub fn parse_uuid_opt(s: Option<String>) -> DbResult<Option<Uuid>> {
    s.as_deref().map(parse_uuid).transpose()
}

/// Parse a JSON TEXT column.
pub fn parse_json(s: &str) -> DbResult<serde_json::Value> {
    serde_json::from_str(s).map_err(|e| DbError::Internal(format!("Invalid JSON in database: {}", e)))
}
