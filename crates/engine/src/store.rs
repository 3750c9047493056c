//! Notification store: durable notifications and their lifecycle state.
//!
//! Mutations that find no matching row return `None` rather than an error:
//! callers routinely race with deletions and background jobs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::{Notification, NotificationStatus, NotificationType, now_micros};

use crate::feed::Keyset;

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn create(
        &self,
        recipient_id: Uuid,
        message: &str,
        context: &serde_json::Value,
        kind: NotificationType,
    ) -> Result<Notification, AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<Notification>, AppError>;

    /// Set a status on a notification owned by `recipient_id`. Clears any snooze.
    async fn set_status(
        &self,
        id: Uuid,
        recipient_id: Uuid,
        status: NotificationStatus,
    ) -> Result<Option<Notification>, AppError>;

    /// Archive every non-archived notification of the recipient.
    async fn archive_all(&self, recipient_id: Uuid) -> Result<u64, AppError>;

    async fn snooze(
        &self,
        id: Uuid,
        recipient_id: Uuid,
        until: DateTime<Utc>,
    ) -> Result<Option<Notification>, AppError>;

    /// Return a snoozed notification to unread, regardless of its wake time.
    async fn unsnooze(&self, id: Uuid) -> Result<Option<Notification>, AppError>;

    /// Return a snoozed notification to unread if its wake time has passed.
    async fn wake(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<Notification>, AppError>;

    /// Ids of snoozed notifications due at `now`, earliest first.
    async fn due_snoozed(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Uuid>, AppError>;

    /// Delete the recipient's notifications whose context contains `partial`.
    async fn delete_matching_context(
        &self,
        recipient_id: Uuid,
        partial: &serde_json::Value,
    ) -> Result<Vec<Uuid>, AppError>;

    /// All notifications of the recipient, newest first.
    async fn list_for_user(
        &self,
        recipient_id: Uuid,
        status: Option<NotificationStatus>,
    ) -> Result<Vec<Notification>, AppError>;

    /// Up to `limit` notifications strictly after `after` in
    /// `(created_at desc, id desc)` order.
    async fn list_page(
        &self,
        recipient_id: Uuid,
        status: NotificationStatus,
        after: Option<Keyset>,
        limit: i64,
    ) -> Result<Vec<Notification>, AppError>;
}

/// PostgreSQL-backed store.
pub struct PgNotificationStore {
    pool: PgPool,
}

impl PgNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn create(
        &self,
        recipient_id: Uuid,
        message: &str,
        context: &serde_json::Value,
        kind: NotificationType,
    ) -> Result<Notification, AppError> {
        let notification: Notification = sqlx::query_as(
            r#"
            INSERT INTO notifications (id, recipient_id, message, context, type, status, created_at)
            VALUES ($1, $2, $3, $4, $5, 'unread', $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(recipient_id)
        .bind(message)
        .bind(context)
        .bind(kind.to_string())
        .bind(now_micros())
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(
            notification_id = %notification.id,
            recipient_id = %recipient_id,
            kind = %kind,
            "Notification created"
        );

        Ok(notification)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Notification>, AppError> {
        let notification = sqlx::query_as("SELECT * FROM notifications WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(notification)
    }

    async fn set_status(
        &self,
        id: Uuid,
        recipient_id: Uuid,
        status: NotificationStatus,
    ) -> Result<Option<Notification>, AppError> {
        let notification = sqlx::query_as(
            r#"
            UPDATE notifications
            SET status = $1, snoozed_until = NULL
            WHERE id = $2 AND recipient_id = $3
            RETURNING *
            "#,
        )
        .bind(status.to_string())
        .bind(id)
        .bind(recipient_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(notification)
    }

    async fn archive_all(&self, recipient_id: Uuid) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET status = 'archived', snoozed_until = NULL
            WHERE recipient_id = $1 AND status <> 'archived'
            "#,
        )
        .bind(recipient_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn snooze(
        &self,
        id: Uuid,
        recipient_id: Uuid,
        until: DateTime<Utc>,
    ) -> Result<Option<Notification>, AppError> {
        let notification = sqlx::query_as(
            r#"
            UPDATE notifications
            SET status = 'snoozed', snoozed_until = $1
            WHERE id = $2 AND recipient_id = $3
            RETURNING *
            "#,
        )
        .bind(until)
        .bind(id)
        .bind(recipient_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(notification)
    }

    async fn unsnooze(&self, id: Uuid) -> Result<Option<Notification>, AppError> {
        let notification = sqlx::query_as(
            r#"
            UPDATE notifications
            SET status = 'unread', snoozed_until = NULL
            WHERE id = $1 AND status = 'snoozed'
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(notification)
    }

    async fn wake(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<Notification>, AppError> {
        let notification = sqlx::query_as(
            r#"
            UPDATE notifications
            SET status = 'unread', snoozed_until = NULL
            WHERE id = $1 AND status = 'snoozed' AND snoozed_until <= $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(notification)
    }

    async fn due_snoozed(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Uuid>, AppError> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM notifications
            WHERE status = 'snoozed' AND snoozed_until <= $1
            ORDER BY snoozed_until
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn delete_matching_context(
        &self,
        recipient_id: Uuid,
        partial: &serde_json::Value,
    ) -> Result<Vec<Uuid>, AppError> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "DELETE FROM notifications WHERE recipient_id = $1 AND context @> $2 RETURNING id",
        )
        .bind(recipient_id)
        .bind(partial)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn list_for_user(
        &self,
        recipient_id: Uuid,
        status: Option<NotificationStatus>,
    ) -> Result<Vec<Notification>, AppError> {
        let notifications = sqlx::query_as(
            r#"
            SELECT * FROM notifications
            WHERE recipient_id = $1 AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(recipient_id)
        .bind(status.map(|s| s.to_string()))
        .fetch_all(&self.pool)
        .await?;
        Ok(notifications)
    }

    async fn list_page(
        &self,
        recipient_id: Uuid,
        status: NotificationStatus,
        after: Option<Keyset>,
        limit: i64,
    ) -> Result<Vec<Notification>, AppError> {
        let notifications = sqlx::query_as(
            r#"
            SELECT * FROM notifications
            WHERE recipient_id = $1
              AND status = $2
              AND ($3::timestamptz IS NULL OR (created_at, id) < ($3::timestamptz, $4::uuid))
            ORDER BY created_at DESC, id DESC
            LIMIT $5
            "#,
        )
        .bind(recipient_id)
        .bind(status.to_string())
        .bind(after.map(|k| k.created_at))
        .bind(after.map(|k| k.id))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(notifications)
    }
}
