//! In-memory implementations of the storage and scheduling traits.
//!
//! Used by the test suites and by single-process development setups. They
//! honour the same contracts as the PostgreSQL/Redis implementations except
//! for expiry: staged items and markers never time out here.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::{
    Notification, NotificationStatus, NotificationType, StagedItem, context_contains,
};

use crate::feed::Keyset;
use crate::jobs::{Job, JobQueue};
use crate::staging::StagingStore;
use crate::store::NotificationStore;

fn newest_first(a: &Notification, b: &Notification) -> std::cmp::Ordering {
    Keyset::of(b).cmp(&Keyset::of(a))
}

#[derive(Default)]
pub struct MemoryNotificationStore {
    rows: RwLock<HashMap<Uuid, Notification>>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully-built row, e.g. one with a chosen `created_at`.
    pub async fn insert(&self, notification: Notification) {
        self.rows
            .write()
            .await
            .insert(notification.id, notification);
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn create(
        &self,
        recipient_id: Uuid,
        message: &str,
        context: &serde_json::Value,
        kind: NotificationType,
    ) -> Result<Notification, AppError> {
        let notification = Notification::new(recipient_id, message, context.clone(), kind);
        self.insert(notification.clone()).await;
        Ok(notification)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Notification>, AppError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn set_status(
        &self,
        id: Uuid,
        recipient_id: Uuid,
        status: NotificationStatus,
    ) -> Result<Option<Notification>, AppError> {
        let mut rows = self.rows.write().await;
        Ok(rows
            .get_mut(&id)
            .filter(|n| n.recipient_id == recipient_id)
            .map(|n| {
                n.status = status;
                n.snoozed_until = None;
                n.clone()
            }))
    }

    async fn archive_all(&self, recipient_id: Uuid) -> Result<u64, AppError> {
        let mut rows = self.rows.write().await;
        let mut changed = 0;
        for n in rows.values_mut() {
            if n.recipient_id == recipient_id && n.status != NotificationStatus::Archived {
                n.status = NotificationStatus::Archived;
                n.snoozed_until = None;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn snooze(
        &self,
        id: Uuid,
        recipient_id: Uuid,
        until: DateTime<Utc>,
    ) -> Result<Option<Notification>, AppError> {
        let mut rows = self.rows.write().await;
        Ok(rows
            .get_mut(&id)
            .filter(|n| n.recipient_id == recipient_id)
            .map(|n| {
                n.status = NotificationStatus::Snoozed;
                n.snoozed_until = Some(until);
                n.clone()
            }))
    }

    async fn unsnooze(&self, id: Uuid) -> Result<Option<Notification>, AppError> {
        let mut rows = self.rows.write().await;
        Ok(rows
            .get_mut(&id)
            .filter(|n| n.status == NotificationStatus::Snoozed)
            .map(|n| {
                n.status = NotificationStatus::Unread;
                n.snoozed_until = None;
                n.clone()
            }))
    }

    async fn wake(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<Notification>, AppError> {
        let mut rows = self.rows.write().await;
        Ok(rows
            .get_mut(&id)
            .filter(|n| {
                n.status == NotificationStatus::Snoozed
                    && n.snoozed_until.is_some_and(|until| until <= now)
            })
            .map(|n| {
                n.status = NotificationStatus::Unread;
                n.snoozed_until = None;
                n.clone()
            }))
    }

    async fn due_snoozed(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Uuid>, AppError> {
        let rows = self.rows.read().await;
        let mut due: Vec<(DateTime<Utc>, Uuid)> = rows
            .values()
            .filter(|n| n.status == NotificationStatus::Snoozed)
            .filter_map(|n| n.snoozed_until.filter(|until| *until <= now).map(|u| (u, n.id)))
            .collect();
        due.sort();
        Ok(due
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|(_, id)| id)
            .collect())
    }

    async fn delete_matching_context(
        &self,
        recipient_id: Uuid,
        partial: &serde_json::Value,
    ) -> Result<Vec<Uuid>, AppError> {
        let mut rows = self.rows.write().await;
        let ids: Vec<Uuid> = rows
            .values()
            .filter(|n| n.recipient_id == recipient_id && context_contains(&n.context, partial))
            .map(|n| n.id)
            .collect();
        for id in &ids {
            rows.remove(id);
        }
        Ok(ids)
    }

    async fn list_for_user(
        &self,
        recipient_id: Uuid,
        status: Option<NotificationStatus>,
    ) -> Result<Vec<Notification>, AppError> {
        let rows = self.rows.read().await;
        let mut list: Vec<Notification> = rows
            .values()
            .filter(|n| n.recipient_id == recipient_id)
            .filter(|n| status.is_none_or(|s| n.status == s))
            .cloned()
            .collect();
        list.sort_by(newest_first);
        Ok(list)
    }

    async fn list_page(
        &self,
        recipient_id: Uuid,
        status: NotificationStatus,
        after: Option<Keyset>,
        limit: i64,
    ) -> Result<Vec<Notification>, AppError> {
        let rows = self.rows.read().await;
        let mut page: Vec<Notification> = rows
            .values()
            .filter(|n| n.recipient_id == recipient_id && n.status == status)
            .filter(|n| after.is_none_or(|k| Keyset::of(n) < k))
            .cloned()
            .collect();
        page.sort_by(newest_first);
        page.truncate(limit.max(0) as usize);
        Ok(page)
    }
}

#[derive(Default)]
pub struct MemoryStaging {
    lists: Mutex<HashMap<Uuid, Vec<StagedItem>>>,
    markers: Mutex<HashSet<Uuid>>,
}

impl MemoryStaging {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StagingStore for MemoryStaging {
    async fn append(&self, recipient_id: Uuid, item: &StagedItem) -> Result<(), AppError> {
        self.lists
            .lock()
            .await
            .entry(recipient_id)
            .or_default()
            .push(item.clone());
        Ok(())
    }

    async fn length(&self, recipient_id: Uuid) -> Result<usize, AppError> {
        Ok(self
            .lists
            .lock()
            .await
            .get(&recipient_id)
            .map_or(0, Vec::len))
    }

    async fn drain_all(&self, recipient_id: Uuid) -> Result<Vec<StagedItem>, AppError> {
        Ok(self
            .lists
            .lock()
            .await
            .remove(&recipient_id)
            .unwrap_or_default())
    }

    async fn marker_exists(&self, recipient_id: Uuid) -> Result<bool, AppError> {
        Ok(self.markers.lock().await.contains(&recipient_id))
    }

    async fn arm_marker(&self, recipient_id: Uuid, _ttl: Duration) -> Result<(), AppError> {
        self.markers.lock().await.insert(recipient_id);
        Ok(())
    }

    async fn clear_marker(&self, recipient_id: Uuid) -> Result<(), AppError> {
        self.markers.lock().await.remove(&recipient_id);
        Ok(())
    }
}

#[derive(Default)]
struct QueueState {
    pending: HashMap<String, (DateTime<Utc>, Job)>,
}

#[derive(Default)]
pub struct MemoryJobQueue {
    state: Mutex<QueueState>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs waiting to be claimed.
    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Forget every pending job, as a delayed-job system might during a deploy.
    pub async fn drop_all(&self) {
        self.state.lock().await.pending.clear();
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn schedule(&self, job: &Job, run_at: DateTime<Utc>) -> Result<bool, AppError> {
        let mut state = self.state.lock().await;
        let key = job.dedup_key();
        if state.pending.contains_key(&key) {
            return Ok(false);
        }
        state.pending.insert(key, (run_at, job.clone()));
        Ok(true)
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Job>, AppError> {
        let mut state = self.state.lock().await;
        let mut due: Vec<(DateTime<Utc>, String)> = state
            .pending
            .iter()
            .filter(|(_, (run_at, _))| *run_at <= now)
            .map(|(key, (run_at, _))| (*run_at, key.clone()))
            .collect();
        due.sort();
        due.truncate(limit);

        Ok(due
            .into_iter()
            .filter_map(|(_, key)| state.pending.remove(&key).map(|(_, job)| job))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_status_is_scoped_to_owner() {
        let store = MemoryNotificationStore::new();
        let owner = Uuid::new_v4();
        let n = store
            .create(owner, "hi", &json!({}), NotificationType::Success)
            .await
            .unwrap();

        let other = store
            .set_status(n.id, Uuid::new_v4(), NotificationStatus::Done)
            .await
            .unwrap();
        assert!(other.is_none());

        let updated = store
            .set_status(n.id, owner, NotificationStatus::Done)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, NotificationStatus::Done);
    }

    #[tokio::test]
    async fn test_wake_only_when_due() {
        let store = MemoryNotificationStore::new();
        let owner = Uuid::new_v4();
        let n = store
            .create(owner, "hi", &json!({}), NotificationType::Warning)
            .await
            .unwrap();
        let now = Utc::now();
        store
            .snooze(n.id, owner, now + ChronoDuration::hours(1))
            .await
            .unwrap();

        assert!(store.wake(n.id, now).await.unwrap().is_none());
        let woken = store
            .wake(n.id, now + ChronoDuration::hours(2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(woken.status, NotificationStatus::Unread);
        assert_eq!(woken.snoozed_until, None);
        // Second wake is a no-op.
        assert!(store.wake(n.id, now + ChronoDuration::hours(2)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_job_dedup_until_claimed() {
        let queue = MemoryJobQueue::new();
        let job = Job::FlushDigest {
            recipient_id: Uuid::new_v4(),
        };
        let now = Utc::now();

        assert!(queue.schedule(&job, now).await.unwrap());
        assert!(!queue.schedule(&job, now).await.unwrap());
        assert_eq!(queue.claim_due(now, 10).await.unwrap(), vec![job.clone()]);
        // Claiming released the dedup key.
        assert!(queue.schedule(&job, now).await.unwrap());
    }

    #[tokio::test]
    async fn test_claim_respects_run_time() {
        let queue = MemoryJobQueue::new();
        let job = Job::Wake {
            notification_id: Uuid::new_v4(),
        };
        let now = Utc::now();
        queue
            .schedule(&job, now + ChronoDuration::minutes(5))
            .await
            .unwrap();

        assert!(queue.claim_due(now, 10).await.unwrap().is_empty());
        assert_eq!(
            queue
                .claim_due(now + ChronoDuration::minutes(5), 10)
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
