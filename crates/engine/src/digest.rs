//! Digest synthesizer: folds a recipient's staged items into one notification.

use std::collections::BTreeMap;
use std::sync::Arc;

use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::{Notification, NotificationType, StagedItem};
use herald_notifier::gateway::Gateway;

use crate::staging::StagingStore;
use crate::store::NotificationStore;

/// Groups named in the summary; the rest are folded into "other updates".
pub const MAX_LISTED_GROUPS: usize = 3;

fn updates(count: usize) -> String {
    if count == 1 {
        "1 update".to_string()
    } else {
        format!("{} updates", count)
    }
}

/// Group value of an item, if its context carries one.
fn group_of(item: &StagedItem, group_key: &str) -> Option<String> {
    match item.context.get(group_key)? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Summary text for a batch. Depends only on the items' contexts, so equal
/// batches always produce equal text.
pub fn summarize(items: &[StagedItem], group_key: &str) -> String {
    let total = items.len();

    let mut groups: BTreeMap<String, usize> = BTreeMap::new();
    let mut ungrouped = 0;
    for item in items {
        match group_of(item, group_key) {
            Some(group) => *groups.entry(group).or_default() += 1,
            None => ungrouped += 1,
        }
    }

    let headline = format!("You have {} new {}", total, if total == 1 { "update" } else { "updates" });
    if groups.is_empty() {
        return headline;
    }

    // Largest groups first; BTreeMap iteration already orders ties by name.
    let mut ranked: Vec<(String, usize)> = groups.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));

    let listed = ranked.len().min(MAX_LISTED_GROUPS);
    let remainder: usize = ranked[listed..].iter().map(|(_, c)| c).sum::<usize>() + ungrouped;

    let mut parts: Vec<String> = ranked[..listed]
        .iter()
        .map(|(group, count)| format!("{} in {}", updates(*count), group))
        .collect();
    if remainder > 0 {
        parts.push(if remainder == 1 {
            "1 other update".to_string()
        } else {
            format!("{} other updates", remainder)
        });
    }

    let body = match parts.split_last() {
        Some((last, rest)) if !rest.is_empty() => format!("{} and {}", rest.join(", "), last),
        Some((last, _)) => last.clone(),
        None => String::new(),
    };
    format!("{}: {}", headline, body)
}

pub struct DigestSynthesizer {
    store: Arc<dyn NotificationStore>,
    staging: Arc<dyn StagingStore>,
    gateway: Arc<Gateway>,
    group_key: String,
}

impl DigestSynthesizer {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        staging: Arc<dyn StagingStore>,
        gateway: Arc<Gateway>,
        group_key: impl Into<String>,
    ) -> Self {
        Self {
            store,
            staging,
            gateway,
            group_key: group_key.into(),
        }
    }

    /// Drain the recipient's staged items into one digest notification.
    ///
    /// The marker is cleared before the drain: an item staged after this
    /// point schedules a fresh flush instead of being stranded behind a
    /// marker that nobody will clear. Returns `None` when nothing was staged.
    pub async fn process_digest(&self, recipient_id: Uuid) -> Result<Option<Notification>, AppError> {
        self.staging.clear_marker(recipient_id).await?;
        let items = self.staging.drain_all(recipient_id).await?;

        if items.is_empty() {
            tracing::debug!(recipient_id = %recipient_id, "Digest flush found nothing staged");
            return Ok(None);
        }

        let count = items.len();
        let message = summarize(&items, &self.group_key);
        let context = serde_json::json!({ "type": "digest", "count": count });

        let notification = match self
            .store
            .create(recipient_id, &message, &context, NotificationType::Info)
            .await
        {
            Ok(n) => n,
            Err(e) => {
                // Put the batch back so a retried flush still sees it.
                for item in &items {
                    if let Err(restage) = self.staging.append(recipient_id, item).await {
                        tracing::error!(recipient_id = %recipient_id, error = %restage, "Lost staged item");
                    }
                }
                return Err(e);
            }
        };

        if let Err(e) = self.gateway.push_notification(&notification).await {
            tracing::warn!(
                notification_id = %notification.id,
                error = %e,
                "Failed to push digest"
            );
        }

        tracing::info!(
            recipient_id = %recipient_id,
            notification_id = %notification.id,
            count,
            "Digest created"
        );
        Ok(Some(notification))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(context: serde_json::Value) -> StagedItem {
        StagedItem::new("X assigned to you", context, NotificationType::Info)
    }

    #[test]
    fn test_single_group() {
        let items = vec![
            item(json!({"projectId": "p1"})),
            item(json!({"projectId": "p1"})),
            item(json!({"projectId": "p1"})),
        ];
        assert_eq!(
            summarize(&items, "projectId"),
            "You have 3 new updates: 3 updates in p1"
        );
    }

    #[test]
    fn test_groups_ranked_and_remainder_folded() {
        let mut items = Vec::new();
        for (group, n) in [("a", 1), ("b", 4), ("c", 2), ("d", 2)] {
            for _ in 0..n {
                items.push(item(json!({"projectId": group})));
            }
        }
        items.push(item(json!({"other": true})));

        assert_eq!(
            summarize(&items, "projectId"),
            "You have 10 new updates: 4 updates in b, 2 updates in c, 2 updates in d and 2 other updates"
        );
    }

    #[test]
    fn test_ungrouped_only() {
        let items = vec![item(json!({})), item(json!({"projectId": null}))];
        assert_eq!(summarize(&items, "projectId"), "You have 2 new updates");
    }

    #[test]
    fn test_singular_phrasing_and_numeric_groups() {
        let items = vec![item(json!({"projectId": 7})), item(json!({}))];
        assert_eq!(
            summarize(&items, "projectId"),
            "You have 2 new updates: 1 update in 7 and 1 other update"
        );
    }

    #[test]
    fn test_summary_ignores_item_order_within_equal_batches() {
        let a = vec![item(json!({"projectId": "p1"})), item(json!({"projectId": "p2"}))];
        let b = vec![item(json!({"projectId": "p2"})), item(json!({"projectId": "p1"}))];
        assert_eq!(summarize(&a, "projectId"), summarize(&b, "projectId"));
        assert_eq!(summarize(&a, "projectId"), summarize(&a, "projectId"));
    }
}
