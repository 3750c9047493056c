//! Background loops: the delayed-job worker and the snooze sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use herald_common::error::AppError;

use crate::jobs::Job;
use crate::service::NotificationService;

/// Jobs claimed per poll.
const CLAIM_BATCH: usize = 100;

/// Polls the job queue and runs whatever is due.
pub struct JobWorker {
    service: Arc<NotificationService>,
    poll_interval: Duration,
}

impl JobWorker {
    pub fn new(service: Arc<NotificationService>, poll_interval: Duration) -> Self {
        Self {
            service,
            poll_interval,
        }
    }

    /// Claim and run every job due at `now`. Returns the number of jobs run.
    pub async fn run_due(&self, now: DateTime<Utc>) -> Result<usize, AppError> {
        let mut ran = 0;
        loop {
            let jobs = self.service.jobs().claim_due(now, CLAIM_BATCH).await?;
            let claimed = jobs.len();

            for job in jobs {
                self.run_job(job, now).await;
                ran += 1;
            }

            if claimed < CLAIM_BATCH {
                break;
            }
        }
        Ok(ran)
    }

    async fn run_job(&self, job: Job, now: DateTime<Utc>) {
        match job {
            Job::FlushDigest { recipient_id } => {
                if let Err(e) = self.service.digest().process_digest(recipient_id).await {
                    tracing::error!(recipient_id = %recipient_id, error = %e, "Digest flush failed, retrying");
                    let debounce = self.service.debounce();
                    if let Err(e) = debounce.schedule_flush(recipient_id, debounce.window()).await {
                        tracing::error!(recipient_id = %recipient_id, error = %e, "Failed to reschedule digest flush");
                    }
                }
            }
            Job::Wake { notification_id } => {
                if let Err(e) = self.service.snoozer().wake(notification_id, now).await {
                    // Left to the sweep.
                    tracing::warn!(notification_id = %notification_id, error = %e, "Wake job failed");
                }
            }
        }
    }

    /// Run the worker until the task is cancelled.
    pub async fn run(&self) {
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Job worker started"
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.run_due(Utc::now()).await {
                Ok(0) => {}
                Ok(ran) => tracing::debug!(ran, "Ran due jobs"),
                Err(e) => tracing::warn!(error = %e, "Job poll failed"),
            }
        }
    }
}

/// Run the snooze sweep every `interval` until the task is cancelled.
pub async fn run_snooze_sweep(service: Arc<NotificationService>, interval: Duration) {
    tracing::info!(interval_secs = interval.as_secs(), "Snooze sweep started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = service.snoozer().sweep().await {
            tracing::warn!(error = %e, "Snooze sweep failed");
        }
    }
}

/// Refresh this node's connection membership every `interval`.
pub async fn run_heartbeat(service: Arc<NotificationService>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if let Err(e) = service.gateway().heartbeat().await {
            tracing::warn!(error = %e, "Membership heartbeat failed");
        }
    }
}
