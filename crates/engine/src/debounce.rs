//! Debounce scheduler: at most one pending digest flush per recipient.
//!
//! The job queue's dedup key decides whether a flush gets scheduled; two
//! processes that both see "no marker" end up with one job and one no-op.
//! The marker only saves the scheduling round-trip while a flush is pending.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::StagedItem;

use crate::jobs::{Job, JobQueue};
use crate::staging::StagingStore;

/// Default delay between the first low-priority event and the digest (5 min).
pub const DEFAULT_DIGEST_WINDOW: Duration = Duration::from_secs(300);

pub struct DebounceScheduler {
    staging: Arc<dyn StagingStore>,
    jobs: Arc<dyn JobQueue>,
    window: Duration,
}

impl DebounceScheduler {
    pub fn new(staging: Arc<dyn StagingStore>, jobs: Arc<dyn JobQueue>, window: Duration) -> Self {
        Self {
            staging,
            jobs,
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Schedule a flush for the recipient unless one is already pending.
    ///
    /// Returns `true` when this call enqueued the job. Safe to call from any
    /// number of processes at once.
    pub async fn schedule_flush(&self, recipient_id: Uuid, delay: Duration) -> Result<bool, AppError> {
        let run_at = Utc::now()
            + chrono::Duration::from_std(delay)
                .map_err(|e| AppError::Internal(format!("Invalid debounce delay: {}", e)))?;

        let scheduled = self
            .jobs
            .schedule(&Job::FlushDigest { recipient_id }, run_at)
            .await?;

        if scheduled {
            self.staging.arm_marker(recipient_id, delay).await?;
            tracing::debug!(
                recipient_id = %recipient_id,
                delay_secs = delay.as_secs(),
                "Digest flush scheduled"
            );
        } else {
            tracing::debug!(recipient_id = %recipient_id, "Digest flush already pending");
        }

        Ok(scheduled)
    }

    /// Stage a low-priority item and make sure a flush will pick it up.
    pub async fn stage(&self, recipient_id: Uuid, item: &StagedItem) -> Result<(), AppError> {
        self.staging.append(recipient_id, item).await?;

        if !self.staging.marker_exists(recipient_id).await? {
            self.schedule_flush(recipient_id, self.window).await?;
        }
        Ok(())
    }
}
