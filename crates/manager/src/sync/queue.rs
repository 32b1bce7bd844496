//! Re-evaluation message sink.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::{AsyncCommands, Client as RedisClient};
use serde::Serialize;
use sqlx::FromRow;
use tracing::debug;
use uuid::Uuid;

/// A system to re-evaluate, identified by inventory id and owning account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct InventoryAid {
    pub inventory_id: Uuid,
    pub rh_account_id: i32,
}

/// Destination for re-evaluation messages.
#[async_trait]
pub trait EvalSink: Send + Sync {
    /// Publish one batch. Either the whole batch is accepted or an error is returned.
    async fn publish(&self, batch: &[InventoryAid]) -> Result<()>;
}

/// Redis list sink; each message is one JSON document pushed with `RPUSH`.
pub struct RedisEvalSink {
    redis: RedisClient,
    queue: String,
}

impl RedisEvalSink {
    pub fn new(redis: RedisClient, queue: impl Into<String>) -> Self {
        Self {
            redis,
            queue: queue.into(),
        }
    }

    /// Open a client for `url` without connecting yet.
    pub fn open(url: &str, queue: impl Into<String>) -> Result<Self> {
        let redis = RedisClient::open(url).context("failed to create Redis client")?;
        Ok(Self::new(redis, queue))
    }
}

/// Serialize a batch into queue payloads.
pub fn encode_batch(batch: &[InventoryAid]) -> Result<Vec<String>> {
    batch
        .iter()
        .map(|aid| serde_json::to_string(aid).context("failed to encode re-evaluation message"))
        .collect()
}

#[async_trait]
impl EvalSink for RedisEvalSink {
    async fn publish(&self, batch: &[InventoryAid]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let payloads = encode_batch(batch)?;

        let mut conn = self
            .redis
            .get_multiplexed_async_connection()
            .await
            .context("failed to get Redis connection")?;

        conn.rpush::<_, _, ()>(&self.queue, payloads)
            .await
            .context("failed to push re-evaluation batch")?;

        debug!(queue = %self.queue, count = batch.len(), "published re-evaluation batch");
        Ok(())
    }
}

impl std::fmt::Debug for RedisEvalSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisEvalSink")
            .field("queue", &self.queue)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn message_format() {
        let aid = InventoryAid {
            inventory_id: Uuid::nil(),
            rh_account_id: 3,
        };
        let payloads = encode_batch(&[aid]).unwrap();
        assert_eq!(
            payloads,
            vec![r#"{"inventory_id":"00000000-0000-0000-0000-000000000000","rh_account_id":3}"#]
        );
    }

    #[test]
    fn open_does_not_connect() {
        let sink = RedisEvalSink::open("redis://127.0.0.1:6379", "patch.evaluation").unwrap();
        assert_eq!(sink.queue, "patch.evaluation");
    }
}
