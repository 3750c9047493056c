//! Delayed-job queue with per-job dedup keys.
//!
//! A job is identified by its dedup key; while a job with that key is
//! pending, scheduling another one is a no-op. This is the mechanism that
//! keeps exactly one digest flush per recipient across the whole fleet.
//!
//! Redis layout:
//! - `herald:jobs:key:<dedup>` holds the job payload (`SET NX PX`)
//! - `herald:jobs:due` is a sorted set of dedup keys scored by run time (ms)
//!
//! Scheduling and claiming are Lua scripts, so each is a single atomic step.
//! Claiming deletes the dedup key, which lets a new job with the same key be
//! scheduled while the claimed one runs.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::Script;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use herald_common::error::AppError;

const DUE_SET_KEY: &str = "herald:jobs:due";

/// How long a dedup key outlives its run time if the job is never claimed.
const DEFAULT_CLAIM_GRACE: Duration = Duration::from_secs(60 * 60);

const SCHEDULE_SCRIPT: &str = r#"
if redis.call('SET', KEYS[1], ARGV[1], 'NX', 'PX', ARGV[3]) then
  redis.call('ZADD', KEYS[2], ARGV[2], KEYS[1])
  return 1
end
return 0
"#;

const CLAIM_SCRIPT: &str = r#"
local keys = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
local claimed = {}
for _, key in ipairs(keys) do
  if redis.call('ZREM', KEYS[1], key) == 1 then
    local payload = redis.call('GET', key)
    redis.call('DEL', key)
    if payload then
      table.insert(claimed, payload)
    end
  end
end
return claimed
"#;

/// Background work scheduled for later.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    /// Turn the recipient's staged items into one digest notification.
    FlushDigest { recipient_id: Uuid },
    /// Return a snoozed notification to unread.
    Wake { notification_id: Uuid },
}

impl Job {
    pub fn dedup_key(&self) -> String {
        match self {
            Job::FlushDigest { recipient_id } => format!("digest:{}", recipient_id),
            Job::Wake { notification_id } => format!("wake:{}", notification_id),
        }
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue `job` to run at `run_at` unless a job with the same dedup key
    /// is already pending. Returns whether it was enqueued.
    async fn schedule(&self, job: &Job, run_at: DateTime<Utc>) -> Result<bool, AppError>;

    /// Claim up to `limit` jobs due at `now`. Each job is handed to exactly
    /// one caller across all processes.
    async fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Job>, AppError>;
}

pub struct RedisJobQueue {
    conn: ConnectionManager,
    claim_grace: Duration,
    schedule_script: Script,
    claim_script: Script,
}

impl RedisJobQueue {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            claim_grace: DEFAULT_CLAIM_GRACE,
            schedule_script: Script::new(SCHEDULE_SCRIPT),
            claim_script: Script::new(CLAIM_SCRIPT),
        }
    }

    fn job_key(job: &Job) -> String {
        format!("herald:jobs:key:{}", job.dedup_key())
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn schedule(&self, job: &Job, run_at: DateTime<Utc>) -> Result<bool, AppError> {
        let payload = serde_json::to_string(job)?;
        let delay_ms = (run_at - Utc::now()).num_milliseconds().max(0) as u64;
        let ttl_ms = delay_ms + self.claim_grace.as_millis() as u64;
        let mut conn = self.conn.clone();

        let enqueued: i64 = self
            .schedule_script
            .key(Self::job_key(job))
            .key(DUE_SET_KEY)
            .arg(payload)
            .arg(run_at.timestamp_millis())
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await?;

        Ok(enqueued == 1)
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Job>, AppError> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = self
            .claim_script
            .key(DUE_SET_KEY)
            .arg(now.timestamp_millis())
            .arg(limit)
            .invoke_async(&mut conn)
            .await?;

        Ok(raw
            .into_iter()
            .filter_map(|payload| match serde_json::from_str::<Job>(&payload) {
                Ok(job) => Some(job),
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping malformed job payload");
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
    fn test_dedup_key_per_subject() {
        let id = Uuid::new_v4();
        assert_eq!(
            Job::FlushDigest { recipient_id: id }.dedup_key(),
            format!("digest:{}", id)
        );
        assert_ne!(
            Job::FlushDigest { recipient_id: id }.dedup_key(),
            Job::Wake { notification_id: id }.dedup_key()
        );
    }

    #[test]
    fn test_job_payload_format() {
        let id = Uuid::new_v4();
        let json = serde_json::to_value(Job::Wake { notification_id: id }).unwrap();
        assert_eq!(json["kind"], "wake");
        assert_eq!(json["notification_id"], id.to_string());
    }
}
