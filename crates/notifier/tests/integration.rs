//! Integration tests for the Redis backplane.
//!
//! Requires a running Redis with `REDIS_URL` set:
//!
//! ```bash
//! REDIS_URL="redis://localhost:6379" \
//!   cargo test -p herald-notifier --test integration -- --ignored --nocapture
//! ```

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use herald_common::redis_pool::{create_redis_pool, open_client};
use herald_common::types::{Notification, NotificationType};
use herald_notifier::backplane::{Backplane, RedisBackplane};
use herald_notifier::gateway::{DeliveryAttempt, Gateway};
use herald_notifier::protocol::{ConnectionId, ServerEvent};

const MEMBERSHIP_TTL: Duration = Duration::from_secs(60);

async fn backplane() -> Arc<RedisBackplane> {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let conn = create_redis_pool(&url).await.unwrap();
    let client = open_client(&url).unwrap();
    Arc::new(RedisBackplane::new(client, conn, MEMBERSHIP_TTL))
}

async fn node(name: &str) -> Arc<Gateway> {
    let gateway = Arc::new(Gateway::new(
        format!("{}-{}", name, Uuid::new_v4()),
        backplane().await,
        Duration::from_millis(500),
    ));
    gateway.start().await.unwrap();
    gateway
}

#[tokio::test]
#[ignore]
async fn test_membership_roundtrip() {
    let bp = backplane().await;
    let recipient = Uuid::new_v4();
    let first = ConnectionId::new("node-a");
    let second = ConnectionId::new("node-b");

    bp.join(recipient, &first).await.unwrap();
    bp.join(recipient, &second).await.unwrap();
    let members = bp.members(recipient).await.unwrap();
    assert_eq!(members.len(), 2);
    assert!(members.contains(&first) && members.contains(&second));

    bp.leave(recipient, &first).await.unwrap();
    assert_eq!(bp.members(recipient).await.unwrap(), vec![second]);
}

#[tokio::test]
#[ignore]
async fn test_ack_crosses_nodes() {
    let sender = node("sender").await;
    let holder = node("holder").await;
    let recipient = Uuid::new_v4();
    let (conn, mut rx) = holder.connect(recipient).await.unwrap();

    // Client on the holder node acknowledges whatever it receives.
    let client_holder = holder.clone();
    let client = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let ServerEvent::Notification {
                ack_id: Some(ack_id),
                ..
            } = event
            {
                client_holder.client_ack(&conn, ack_id, true).await;
                return true;
            }
        }
        false
    });

    let n = Notification::new(recipient, "Disk almost full", serde_json::json!({}), NotificationType::Warning);
    let attempt = sender.push_with_ack(&n, |_, _| {}).await;

    assert_eq!(attempt, DeliveryAttempt::Delivered);
    assert!(client.await.unwrap());
}

#[tokio::test]
#[ignore]
async fn test_broadcast_reaches_every_node() {
    let a = node("a").await;
    let b = node("b").await;
    let recipient = Uuid::new_v4();
    let (_ca, mut rx_a) = a.connect(recipient).await.unwrap();
    let (_cb, mut rx_b) = b.connect(recipient).await.unwrap();

    let ids = vec![Uuid::new_v4()];
    a.notify_deleted(recipient, ids.clone()).await.unwrap();

    for rx in [&mut rx_a, &mut rx_b] {
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, ServerEvent::NotificationDeleted { ids: ids.clone() });
    }
}
