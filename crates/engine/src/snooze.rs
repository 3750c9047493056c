//! Snooze/wake scheduler.
//!
//! A delayed wake job per notification gives low latency; the periodic sweep
//! catches every snoozed notification whose job was lost. Both go through
//! `NotificationStore::wake`, which only flips rows that are still snoozed
//! and due, so running both is harmless.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::{Notification, NotificationStatus};
use herald_notifier::gateway::Gateway;

use crate::delivery::deliver;
use crate::jobs::{Job, JobQueue};
use crate::store::NotificationStore;

const SWEEP_BATCH: i64 = 500;

pub struct SnoozeScheduler {
    store: Arc<dyn NotificationStore>,
    jobs: Arc<dyn JobQueue>,
    gateway: Arc<Gateway>,
}

impl SnoozeScheduler {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        jobs: Arc<dyn JobQueue>,
        gateway: Arc<Gateway>,
    ) -> Self {
        Self {
            store,
            jobs,
            gateway,
        }
    }

    /// Schedule a wake job for the notification. Idempotent per notification.
    pub async fn schedule_wake(&self, notification_id: Uuid, delay: Duration) -> Result<bool, AppError> {
        let run_at = Utc::now()
            + chrono::Duration::from_std(delay)
                .map_err(|e| AppError::Validation(format!("Invalid snooze delay: {}", e)))?;
        self.schedule_wake_at(notification_id, run_at).await
    }

    pub async fn schedule_wake_at(
        &self,
        notification_id: Uuid,
        run_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        self.jobs
            .schedule(&Job::Wake { notification_id }, run_at)
            .await
    }

    /// Handle a fired wake job.
    ///
    /// A notification re-snoozed to a later time after this job was
    /// scheduled is not due yet; the job is re-armed for the new time.
    pub async fn wake(&self, notification_id: Uuid, now: DateTime<Utc>) -> Result<Option<Notification>, AppError> {
        if let Some(notification) = self.store.wake(notification_id, now).await? {
            self.resurface(&notification).await;
            return Ok(Some(notification));
        }

        if let Some(current) = self.store.get(notification_id).await?
            && current.status == NotificationStatus::Snoozed
            && let Some(until) = current.snoozed_until
        {
            self.schedule_wake_at(notification_id, until).await?;
            tracing::debug!(
                notification_id = %notification_id,
                until = %until,
                "Snooze extended, wake re-armed"
            );
        }
        Ok(None)
    }

    /// Wake every notification whose snooze has expired.
    pub async fn sweep(&self) -> Result<usize, AppError> {
        self.sweep_at(Utc::now()).await
    }

    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<usize, AppError> {
        let mut woken = 0;
        loop {
            let due = self.store.due_snoozed(now, SWEEP_BATCH).await?;
            let batch_len = due.len();
            let mut woken_in_batch = 0;

            for id in due {
                if let Some(notification) = self.store.wake(id, now).await? {
                    self.resurface(&notification).await;
                    woken_in_batch += 1;
                }
            }
            woken += woken_in_batch;

            // A short batch is the last one; a batch lost entirely to races
            // would only repeat itself.
            if (batch_len as i64) < SWEEP_BATCH || woken_in_batch == 0 {
                break;
            }
        }

        if woken > 0 {
            tracing::info!(woken, "Snooze sweep woke notifications");
        }
        Ok(woken)
    }

    async fn resurface(&self, notification: &Notification) {
        tracing::debug!(
            notification_id = %notification.id,
            recipient_id = %notification.recipient_id,
            "Notification woke from snooze"
        );
        deliver(&self.gateway, notification.clone()).await;
    }
}
