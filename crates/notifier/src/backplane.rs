//! Cross-process backplane: channel membership plus pub/sub message routing.
//!
//! Membership of a recipient's channel is a Redis sorted set scored by the
//! last heartbeat of each connection, so members left behind by a crashed
//! process age out instead of living forever. Messages are JSON envelopes
//! published on Redis pub/sub topics.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::mpsc;
use uuid::Uuid;

use herald_common::error::AppError;

use crate::protocol::{ConnectionId, Envelope};

/// Buffer between the subscription reader and the gateway listener.
const SUBSCRIPTION_BUFFER: usize = 1024;

/// Shared membership and message bus between gateway nodes.
#[async_trait]
pub trait Backplane: Send + Sync {
    /// Publish an envelope on a topic.
    async fn publish(&self, topic: &str, envelope: &Envelope) -> Result<(), AppError>;

    /// Subscribe to topics. The returned receiver closes when the
    /// subscription is lost.
    async fn subscribe(&self, topics: Vec<String>) -> Result<mpsc::Receiver<Envelope>, AppError>;

    /// Add (or refresh) a connection in the recipient's channel.
    async fn join(&self, recipient_id: Uuid, connection_id: &ConnectionId) -> Result<(), AppError>;

    /// Remove a connection from the recipient's channel.
    async fn leave(&self, recipient_id: Uuid, connection_id: &ConnectionId)
    -> Result<(), AppError>;

    /// Live connections of the recipient across all nodes, oldest first.
    async fn members(&self, recipient_id: Uuid) -> Result<Vec<ConnectionId>, AppError>;
}

/// Redis-backed backplane.
pub struct RedisBackplane {
    client: redis::Client,
    conn: ConnectionManager,
    membership_ttl: Duration,
}

impl RedisBackplane {
    pub fn new(client: redis::Client, conn: ConnectionManager, membership_ttl: Duration) -> Self {
        Self {
            client,
            conn,
            membership_ttl,
        }
    }

    fn members_key(recipient_id: Uuid) -> String {
        format!("herald:gateway:members:{}", recipient_id)
    }
}

#[async_trait]
impl Backplane for RedisBackplane {
    async fn publish(&self, topic: &str, envelope: &Envelope) -> Result<(), AppError> {
        let payload = serde_json::to_string(envelope)?;
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(topic, payload).await?;
        Ok(())
    }

    async fn subscribe(&self, topics: Vec<String>) -> Result<mpsc::Receiver<Envelope>, AppError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        for topic in &topics {
            pubsub.subscribe(topic).await?;
        }

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(error = %e, "Dropping non-text backplane message");
                        continue;
                    }
                };
                match serde_json::from_str::<Envelope>(&payload) {
                    Ok(envelope) => {
                        if tx.send(envelope).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            channel = msg.get_channel_name(),
                            error = %e,
                            "Dropping malformed backplane envelope"
                        );
                    }
                }
            }
            tracing::warn!("Backplane subscription stream ended");
        });

        tracing::info!(?topics, "Subscribed to backplane topics");
        Ok(rx)
    }

    async fn join(&self, recipient_id: Uuid, connection_id: &ConnectionId) -> Result<(), AppError> {
        let key = Self::members_key(recipient_id);
        let now_ms = Utc::now().timestamp_millis();
        let mut conn = self.conn.clone();

        // The whole set expires once no member has refreshed for two TTLs.
        let _: () = redis::pipe()
            .atomic()
            .zadd(&key, connection_id.to_string(), now_ms)
            .ignore()
            .expire(&key, (self.membership_ttl.as_secs() * 2).max(1) as i64)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn leave(
        &self,
        recipient_id: Uuid,
        connection_id: &ConnectionId,
    ) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        conn.zrem::<_, _, ()>(Self::members_key(recipient_id), connection_id.to_string())
            .await?;
        Ok(())
    }

    async fn members(&self, recipient_id: Uuid) -> Result<Vec<ConnectionId>, AppError> {
        let key = Self::members_key(recipient_id);
        let cutoff = Utc::now().timestamp_millis() - self.membership_ttl.as_millis() as i64;
        let mut conn = self.conn.clone();

        let (raw,): (Vec<String>,) = redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(&key)
            .arg("-inf")
            .arg(cutoff)
            .ignore()
            .cmd("ZRANGE")
            .arg(&key)
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await?;

        Ok(raw
            .into_iter()
            .filter_map(|member| match member.parse::<ConnectionId>() {
                Ok(id) => Some(id),
                Err(e) => {
                    tracing::warn!(member = %member, error = %e, "Ignoring malformed member");
                    None
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_members_key_is_per_recipient() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_ne!(RedisBackplane::members_key(a), RedisBackplane::members_key(b));
        assert!(RedisBackplane::members_key(a).ends_with(&a.to_string()));
    }
}
