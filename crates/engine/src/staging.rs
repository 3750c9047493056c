//! Staging accumulator: per-recipient buffer of low-priority events.
//!
//! Items live in a Redis list whose TTL slides forward on every append. The
//! TTL is a safety net for a scheduler that never fires, not the debounce
//! window. The debounce marker lives next to the list.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::StagedItem;

/// Default lifetime of staged items (24h).
pub const DEFAULT_STAGING_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[async_trait]
pub trait StagingStore: Send + Sync {
    /// Append to the tail of the recipient's list and refresh its TTL.
    async fn append(&self, recipient_id: Uuid, item: &StagedItem) -> Result<(), AppError>;

    async fn length(&self, recipient_id: Uuid) -> Result<usize, AppError>;

    /// Read and remove the whole list in one atomic step.
    async fn drain_all(&self, recipient_id: Uuid) -> Result<Vec<StagedItem>, AppError>;

    async fn marker_exists(&self, recipient_id: Uuid) -> Result<bool, AppError>;

    async fn arm_marker(&self, recipient_id: Uuid, ttl: Duration) -> Result<(), AppError>;

    async fn clear_marker(&self, recipient_id: Uuid) -> Result<(), AppError>;
}

pub struct RedisStaging {
    conn: ConnectionManager,
    item_ttl: Duration,
}

impl RedisStaging {
    pub fn new(conn: ConnectionManager, item_ttl: Duration) -> Self {
        Self { conn, item_ttl }
    }

    fn items_key(recipient_id: Uuid) -> String {
        format!("herald:staging:{}", recipient_id)
    }

    fn marker_key(recipient_id: Uuid) -> String {
        format!("herald:digest:marker:{}", recipient_id)
    }
}

#[async_trait]
impl StagingStore for RedisStaging {
    async fn append(&self, recipient_id: Uuid, item: &StagedItem) -> Result<(), AppError> {
        let key = Self::items_key(recipient_id);
        let payload = serde_json::to_string(item)?;
        let mut conn = self.conn.clone();

        // MULTI: RPUSH + EXPIRE
        let _: () = redis::pipe()
            .atomic()
            .rpush(&key, payload)
            .ignore()
            .expire(&key, self.item_ttl.as_secs() as i64)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn length(&self, recipient_id: Uuid) -> Result<usize, AppError> {
        let mut conn = self.conn.clone();
        let len: usize = conn.llen(Self::items_key(recipient_id)).await?;
        Ok(len)
    }

    async fn drain_all(&self, recipient_id: Uuid) -> Result<Vec<StagedItem>, AppError> {
        let key = Self::items_key(recipient_id);
        let mut conn = self.conn.clone();

        // MULTI: LRANGE 0 -1 + DEL, so a concurrent RPUSH lands either wholly
        // before this drain or in a fresh list after it.
        let (raw,): (Vec<String>,) = redis::pipe()
            .atomic()
            .lrange(&key, 0, -1)
            .del(&key)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(raw
            .into_iter()
            .filter_map(|payload| match serde_json::from_str::<StagedItem>(&payload) {
                Ok(item) => Some(item),
                Err(e) => {
                    tracing::warn!(recipient_id = %recipient_id, error = %e, "Dropping malformed staged item");
                    None
                }
            })
            .collect())
    }

    async fn marker_exists(&self, recipient_id: Uuid) -> Result<bool, AppError> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(Self::marker_key(recipient_id)).await?;
        Ok(exists)
    }

    async fn arm_marker(&self, recipient_id: Uuid, ttl: Duration) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(Self::marker_key(recipient_id), "1", ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn clear_marker(&self, recipient_id: Uuid) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(Self::marker_key(recipient_id)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_distinct_per_purpose() {
        let id = Uuid::new_v4();
        assert_ne!(RedisStaging::items_key(id), RedisStaging::marker_key(id));
    }
}
