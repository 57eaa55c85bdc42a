use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LocatorError {
    #[error("Locator backend error: {0}")]
    Backend(String),
}

/// Where a live recording session can be found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeLocator {
    pub node_id: String,
    pub session_id: Uuid,
}

/// Shared KV mapping conversation id → recorder node, so a resume request
/// arriving at any node can be routed to the one holding the buffer.
///
/// Best effort: locator failure disables resume but never fails unrelated
/// requests.
#[async_trait]
pub trait LocatorStore: Send + Sync {
    async fn put(
        &self,
        conversation_id: Uuid,
        locator: &ResumeLocator,
        ttl: Duration,
    ) -> Result<(), LocatorError>;

    async fn get(&self, conversation_id: Uuid) -> Result<Option<ResumeLocator>, LocatorError>;

    async fn delete(&self, conversation_id: Uuid) -> Result<(), LocatorError>;
}

/// Process-local locator for single-node deployments and tests.
#[derive(Default)]
pub struct MemoryLocatorStore {
    entries: dashmap::DashMap<Uuid, (ResumeLocator, std::time::Instant)>,
}

impl MemoryLocatorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocatorStore for MemoryLocatorStore {
    async fn put(
        &self,
        conversation_id: Uuid,
        locator: &ResumeLocator,
        ttl: Duration,
    ) -> Result<(), LocatorError> {
        self.entries.insert(
            conversation_id,
            (locator.clone(), std::time::Instant::now() + ttl),
        );
        Ok(())
    }

    async fn get(&self, conversation_id: Uuid) -> Result<Option<ResumeLocator>, LocatorError> {
        // The read guard must drop before the expired-entry removal below.
        let live = match self.entries.get(&conversation_id) {
            Some(entry) if entry.1 > std::time::Instant::now() => Some(entry.0.clone()),
            Some(_) => None,
            None => return Ok(None),
        };
        match live {
            Some(locator) => Ok(Some(locator)),
            None => {
                self.entries.remove(&conversation_id);
                Ok(None)
            }
        }
    }

    async fn delete(&self, conversation_id: Uuid) -> Result<(), LocatorError> {
        self.entries.remove(&conversation_id);
        Ok(())
    }
}

/// Redis-backed locator for clustered deployments.
#[cfg(feature = "redis")]
pub struct RedisLocatorStore {
    client: redis::Client,
    key_prefix: String,
}

#[cfg(feature = "redis")]
impl RedisLocatorStore {
    pub fn new(url: &str) -> Result<Self, LocatorError> {
        let client = redis::Client::open(url).map_err(|e| LocatorError::Backend(e.to_string()))?;
        Ok(Self {
            client,
            key_prefix: "mnemo:resume:".to_string(),
        })
    }

    fn key(&self, conversation_id: Uuid) -> String {
        format!("{}{}", self.key_prefix, conversation_id)
    }
}

#[cfg(feature = "redis")]
#[async_trait]
impl LocatorStore for RedisLocatorStore {
    async fn put(
        &self,
        conversation_id: Uuid,
        locator: &ResumeLocator,
        ttl: Duration,
    ) -> Result<(), LocatorError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| LocatorError::Backend(e.to_string()))?;
        let value = format!("{}|{}", locator.node_id, locator.session_id);
        redis::cmd("SET")
            .arg(self.key(conversation_id))
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| LocatorError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, conversation_id: Uuid) -> Result<Option<ResumeLocator>, LocatorError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| LocatorError::Backend(e.to_string()))?;
        let value: Option<String> = redis::cmd("GET")
            .arg(self.key(conversation_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| LocatorError::Backend(e.to_string()))?;

        match value {
            None => Ok(None),
            Some(value) => {
                let (node_id, session_id) = value
                    .split_once('|')
                    .ok_or_else(|| LocatorError::Backend("malformed locator entry".into()))?;
                let session_id = Uuid::parse_str(session_id)
                    .map_err(|e| LocatorError::Backend(e.to_string()))?;
                Ok(Some(ResumeLocator {
                    node_id: node_id.to_string(),
                    session_id,
                }))
            }
        }
    }

    async fn delete(&self, conversation_id: Uuid) -> Result<(), LocatorError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| LocatorError::Backend(e.to_string()))?;
        redis::cmd("DEL")
            .arg(self.key(conversation_id))
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| LocatorError::Backend(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_locator_round_trip_and_ttl() {
        let store = MemoryLocatorStore::new();
        let conversation = Uuid::new_v4();
        let locator = ResumeLocator {
            node_id: "node-1".into(),
            session_id: Uuid::new_v4(),
        };

        store
            .put(conversation, &locator, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get(conversation).await.unwrap(), Some(locator.clone()));

        store.delete(conversation).await.unwrap();
        assert_eq!(store.get(conversation).await.unwrap(), None);

        // Zero TTL expires immediately.
        store
            .put(conversation, &locator, Duration::from_secs(0))
            .await
            .unwrap();
        assert_eq!(store.get(conversation).await.unwrap(), None);
    }
}
