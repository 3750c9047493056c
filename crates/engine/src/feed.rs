//! Feed reader: keyset pagination over the notification store.
//!
//! Rows are ordered by `(created_at desc, id desc)`. A cursor is the position
//! of the last row returned; the next page holds rows strictly after it in
//! that order, so inserts between calls can neither duplicate nor skip rows.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::{Notification, NotificationStatus};

use crate::store::NotificationStore;

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 50;

/// Sort position of a row. Field order matters: the derived `Ord` compares
/// `created_at` first and breaks ties on `id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Keyset {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

impl Keyset {
    pub fn of(notification: &Notification) -> Self {
        Self {
            created_at: notification.created_at,
            id: notification.id,
        }
    }

    /// Opaque cursor: URL-safe base64 of `"<unix micros>:<uuid>"`.
    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(format!("{}:{}", self.created_at.timestamp_micros(), self.id))
    }

    pub fn decode(cursor: &str) -> Option<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(cursor).ok()?;
        let text = String::from_utf8(bytes).ok()?;
        let (micros, id) = text.split_once(':')?;
        let created_at = DateTime::from_timestamp_micros(micros.parse().ok()?)?;
        let id = Uuid::parse_str(id).ok()?;
        Some(Self { created_at, id })
    }
}

/// One page of the feed.
#[derive(Debug, Clone, Serialize)]
pub struct FeedPage {
    pub data: Vec<Notification>,
    pub next_cursor: Option<String>,
}

pub fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

pub struct FeedReader {
    store: Arc<dyn NotificationStore>,
}

impl FeedReader {
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self { store }
    }

    /// Read one page. A cursor that does not decode starts from the top.
    pub async fn list_by_cursor(
        &self,
        recipient_id: Uuid,
        status: NotificationStatus,
        cursor: Option<&str>,
        limit: Option<i64>,
    ) -> Result<FeedPage, AppError> {
        let limit = clamp_limit(limit);
        let after = cursor.and_then(|c| {
            let decoded = Keyset::decode(c);
            if decoded.is_none() {
                tracing::debug!(recipient_id = %recipient_id, "Ignoring malformed feed cursor");
            }
            decoded
        });

        // One extra row tells whether another page exists.
        let mut data = self
            .store
            .list_page(recipient_id, status, after, limit + 1)
            .await?;

        let next_cursor = if data.len() as i64 > limit {
            data.truncate(limit as usize);
            data.last().map(|last| Keyset::of(last).encode())
        } else {
            None
        };

        Ok(FeedPage { data, next_cursor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryNotificationStore;
    use chrono::Duration;
    use herald_common::types::NotificationType;
    use std::collections::HashSet;

    fn row(recipient: Uuid, created_at: DateTime<Utc>) -> Notification {
        let mut n = Notification::new(
            recipient,
            "update",
            serde_json::json!({}),
            NotificationType::Success,
        );
        n.created_at = created_at;
        n
    }

    #[test]
    fn test_cursor_decodes_what_it_encodes() {
        let keyset = Keyset {
            created_at: herald_common::types::now_micros(),
            id: Uuid::new_v4(),
        };
        assert_eq!(Keyset::decode(&keyset.encode()), Some(keyset));
    }

    #[test]
    fn test_malformed_cursor_is_none() {
        assert_eq!(Keyset::decode("not base64 !!"), None);
        assert_eq!(Keyset::decode(&URL_SAFE_NO_PAD.encode("garbage")), None);
        assert_eq!(Keyset::decode(&URL_SAFE_NO_PAD.encode("12:not-a-uuid")), None);
    }

    #[test]
    fn test_limit_is_clamped() {
        assert_eq!(clamp_limit(None), DEFAULT_PAGE_SIZE);
        assert_eq!(clamp_limit(Some(500)), MAX_PAGE_SIZE);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(-3)), 1);
    }

    #[tokio::test]
    async fn test_pages_break_ties_on_id() {
        let store = Arc::new(MemoryNotificationStore::new());
        let recipient = Uuid::new_v4();
        let same_instant = herald_common::types::now_micros();
        for _ in 0..5 {
            store.insert(row(recipient, same_instant)).await;
        }
        let reader = FeedReader::new(store.clone());

        let mut seen = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = reader
                .list_by_cursor(recipient, NotificationStatus::Unread, cursor.as_deref(), Some(2))
                .await
                .unwrap();
            seen.extend(page.data.iter().map(|n| n.id));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        assert_eq!(seen.len(), 5);
        let mut sorted = seen.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(seen, sorted);
    }

    #[tokio::test]
    async fn test_no_duplicates_or_gaps_under_concurrent_inserts() {
        let store = Arc::new(MemoryNotificationStore::new());
        let recipient = Uuid::new_v4();
        let base = herald_common::types::now_micros();
        let mut original = Vec::new();
        for i in 0..7 {
            let n = row(recipient, base - Duration::seconds(i));
            original.push(n.id);
            store.insert(n).await;
        }
        let reader = FeedReader::new(store.clone());

        let mut seen = Vec::new();
        let mut cursor: Option<String> = None;
        let mut inserted = 0;
        loop {
            let page = reader
                .list_by_cursor(recipient, NotificationStatus::Unread, cursor.as_deref(), Some(3))
                .await
                .unwrap();
            seen.extend(page.data.iter().map(|n| n.id));

            // New rows arrive between page reads.
            inserted += 1;
            store
                .insert(row(recipient, base + Duration::seconds(inserted)))
                .await;

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        let unique: HashSet<Uuid> = seen.iter().copied().collect();
        assert_eq!(unique.len(), seen.len(), "duplicate rows across pages");
        assert_eq!(seen, original, "rows skipped or reordered");
    }

    #[tokio::test]
    async fn test_malformed_cursor_starts_from_top() {
        let store = Arc::new(MemoryNotificationStore::new());
        let recipient = Uuid::new_v4();
        store.insert(row(recipient, herald_common::types::now_micros())).await;
        let reader = FeedReader::new(store);

        let page = reader
            .list_by_cursor(recipient, NotificationStatus::Unread, Some("%%%"), None)
            .await
            .unwrap();
        assert_eq!(page.data.len(), 1);
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_status_filter() {
        let store = Arc::new(MemoryNotificationStore::new());
        let recipient = Uuid::new_v4();
        let mut saved = row(recipient, herald_common::types::now_micros());
        saved.status = NotificationStatus::Saved;
        store.insert(saved.clone()).await;
        store.insert(row(recipient, herald_common::types::now_micros())).await;
        let reader = FeedReader::new(store);

        let page = reader
            .list_by_cursor(recipient, NotificationStatus::Saved, None, None)
            .await
            .unwrap();
        assert_eq!(page.data, vec![saved]);
    }
}
