//! Choosing how a persisted notification reaches its recipient.

use std::sync::Arc;

use herald_common::types::Notification;
use herald_notifier::gateway::Gateway;

/// Push a persisted notification to its recipient.
///
/// Types that need confirmation go through the ack protocol on a background
/// task, so callers never wait on slow clients. An undelivered result needs
/// no further action: the row is durable and shows up on the next feed read.
pub async fn deliver(gateway: &Arc<Gateway>, notification: Notification) {
    if notification.kind.requires_ack() {
        let gateway = Arc::clone(gateway);
        tokio::spawn(async move {
            let recipient_id = notification.recipient_id;
            gateway
                .push_with_ack(&notification, |notification_id, delivered| {
                    if !delivered {
                        tracing::info!(
                            recipient_id = %recipient_id,
                            notification_id = %notification_id,
                            "Push unacknowledged, notification left for the feed"
                        );
                    }
                })
                .await;
        });
        return;
    }

    if let Err(e) = gateway.push_notification(&notification).await {
        tracing::warn!(
            notification_id = %notification.id,
            error = %e,
            "Failed to broadcast notification"
        );
    }
}
