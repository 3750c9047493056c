//! Notification service: the entry points used by the rest of the application.
//!
//! Low-priority events are staged for a digest; everything else is persisted
//! and pushed right away.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use herald_common::config::AppConfig;
use herald_common::error::AppError;
use herald_common::types::{Notification, NotificationStatus, NotificationType, StagedItem};
use herald_notifier::gateway::Gateway;

use crate::debounce::{DEFAULT_DIGEST_WINDOW, DebounceScheduler};
use crate::delivery::deliver;
use crate::digest::DigestSynthesizer;
use crate::feed::{FeedPage, FeedReader};
use crate::jobs::JobQueue;
use crate::snooze::SnoozeScheduler;
use crate::staging::StagingStore;
use crate::store::NotificationStore;

/// Longest snooze accepted (30 days).
pub const MAX_SNOOZE_HOURS: i64 = 24 * 30;

/// Engine tunables.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub digest_window: Duration,
    pub digest_group_key: String,
}

impl EngineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            digest_window: Duration::from_secs(config.digest_window_secs),
            digest_group_key: config.digest_group_key.clone(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            digest_window: DEFAULT_DIGEST_WINDOW,
            digest_group_key: "projectId".to_string(),
        }
    }
}

pub struct NotificationService {
    store: Arc<dyn NotificationStore>,
    jobs: Arc<dyn JobQueue>,
    gateway: Arc<Gateway>,
    debounce: DebounceScheduler,
    digest: DigestSynthesizer,
    snooze: SnoozeScheduler,
    feed: FeedReader,
}

impl NotificationService {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        staging: Arc<dyn StagingStore>,
        jobs: Arc<dyn JobQueue>,
        gateway: Arc<Gateway>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            debounce: DebounceScheduler::new(staging.clone(), jobs.clone(), settings.digest_window),
            digest: DigestSynthesizer::new(
                store.clone(),
                staging,
                gateway.clone(),
                settings.digest_group_key,
            ),
            snooze: SnoozeScheduler::new(store.clone(), jobs.clone(), gateway.clone()),
            feed: FeedReader::new(store.clone()),
            store,
            jobs,
            gateway,
        }
    }

    pub fn jobs(&self) -> &Arc<dyn JobQueue> {
        &self.jobs
    }

    pub fn debounce(&self) -> &DebounceScheduler {
        &self.debounce
    }

    pub fn digest(&self) -> &DigestSynthesizer {
        &self.digest
    }

    pub fn snoozer(&self) -> &SnoozeScheduler {
        &self.snooze
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Raise one event for many recipients.
    ///
    /// Returns the notifications persisted by this call; staged
    /// (low-priority) events are not persisted until their digest runs.
    pub async fn create_many(
        &self,
        recipient_ids: &[Uuid],
        message: &str,
        context: &serde_json::Value,
        kind: NotificationType,
    ) -> Result<Vec<Notification>, AppError> {
        let mut recipients: Vec<Uuid> = Vec::with_capacity(recipient_ids.len());
        for id in recipient_ids {
            if !recipients.contains(id) {
                recipients.push(*id);
            }
        }

        if kind.is_low_priority() {
            let item = StagedItem::new(message, context.clone(), kind);
            for recipient_id in &recipients {
                self.debounce.stage(*recipient_id, &item).await?;
            }
            tracing::debug!(recipients = recipients.len(), "Low-priority event staged");
            return Ok(Vec::new());
        }

        let mut created = Vec::with_capacity(recipients.len());
        for recipient_id in recipients {
            let notification = self
                .store
                .create(recipient_id, message, context, kind)
                .await?;
            deliver(&self.gateway, notification.clone()).await;
            created.push(notification);
        }

        tracing::info!(count = created.len(), kind = %kind, "Notifications created");
        Ok(created)
    }

    /// Change the status of the recipient's notification. Unknown ids are a no-op.
    pub async fn set_status(
        &self,
        id: Uuid,
        recipient_id: Uuid,
        status: NotificationStatus,
    ) -> Result<Option<Notification>, AppError> {
        if status == NotificationStatus::Snoozed {
            return Err(AppError::Validation(
                "Use the snooze operation to snooze a notification".to_string(),
            ));
        }

        let updated = self.store.set_status(id, recipient_id, status).await?;
        if let Some(notification) = &updated {
            self.announce_update(notification).await;
        }
        Ok(updated)
    }

    pub async fn archive_all(&self, recipient_id: Uuid) -> Result<u64, AppError> {
        let archived = self.store.archive_all(recipient_id).await?;
        tracing::info!(recipient_id = %recipient_id, archived, "Archived all notifications");
        Ok(archived)
    }

    /// Snooze for `hours`, then wake it back to unread.
    pub async fn snooze(
        &self,
        id: Uuid,
        recipient_id: Uuid,
        hours: i64,
    ) -> Result<Option<Notification>, AppError> {
        if !(1..=MAX_SNOOZE_HOURS).contains(&hours) {
            return Err(AppError::Validation(format!(
                "Snooze hours must be between 1 and {}",
                MAX_SNOOZE_HOURS
            )));
        }

        let until = chrono::Utc::now() + chrono::Duration::hours(hours);
        let Some(notification) = self.store.snooze(id, recipient_id, until).await? else {
            return Ok(None);
        };

        // The sweep still wakes it if this job never gets scheduled.
        if let Err(e) = self.snooze.schedule_wake_at(id, until).await {
            tracing::warn!(notification_id = %id, error = %e, "Failed to schedule wake job");
        }
        self.announce_update(&notification).await;

        tracing::info!(notification_id = %id, until = %until, "Notification snoozed");
        Ok(Some(notification))
    }

    /// Wake a snoozed notification now and push it again.
    pub async fn unsnooze(&self, id: Uuid) -> Result<Option<Notification>, AppError> {
        let woken = self.store.unsnooze(id).await?;
        if let Some(notification) = &woken {
            deliver(&self.gateway, notification.clone()).await;
        }
        Ok(woken)
    }

    /// `unsnooze` on behalf of a recipient; other recipients' ids are a no-op.
    pub async fn unsnooze_owned(
        &self,
        id: Uuid,
        recipient_id: Uuid,
    ) -> Result<Option<Notification>, AppError> {
        match self.store.get(id).await? {
            Some(n) if n.recipient_id == recipient_id => self.unsnooze(id).await,
            _ => Ok(None),
        }
    }

    /// Delete every notification of the recipient whose context contains
    /// `partial`, and tell connected clients in one event.
    pub async fn delete_matching_context(
        &self,
        recipient_id: Uuid,
        partial: &serde_json::Value,
    ) -> Result<Vec<Uuid>, AppError> {
        if !partial.is_object() {
            return Err(AppError::Validation(
                "Context filter must be a JSON object".to_string(),
            ));
        }

        let ids = self
            .store
            .delete_matching_context(recipient_id, partial)
            .await?;

        if !ids.is_empty() {
            if let Err(e) = self.gateway.notify_deleted(recipient_id, ids.clone()).await {
                tracing::warn!(recipient_id = %recipient_id, error = %e, "Failed to announce deletion");
            }
            tracing::info!(recipient_id = %recipient_id, deleted = ids.len(), "Notifications deleted");
        }
        Ok(ids)
    }

    pub async fn list_for_user(
        &self,
        recipient_id: Uuid,
        status: Option<NotificationStatus>,
    ) -> Result<Vec<Notification>, AppError> {
        self.store.list_for_user(recipient_id, status).await
    }

    pub async fn list_by_cursor(
        &self,
        recipient_id: Uuid,
        status: NotificationStatus,
        cursor: Option<&str>,
        limit: Option<i64>,
    ) -> Result<FeedPage, AppError> {
        self.feed
            .list_by_cursor(recipient_id, status, cursor, limit)
            .await
    }

    async fn announce_update(&self, notification: &Notification) {
        if let Err(e) = self.gateway.notify_updated(notification).await {
            tracing::warn!(
                notification_id = %notification.id,
                error = %e,
                "Failed to announce notification update"
            );
        }
    }
}
