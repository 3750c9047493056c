//! Delivery fan-out gateway.
//!
//! Each node keeps the socket writers it physically owns; which connections
//! belong to a recipient is known only to the backplane. Two delivery modes
//! exist:
//!
//! - [`Gateway::push`] broadcasts to every connection of the recipient on
//!   every node, without confirmation.
//! - [`Gateway::push_with_ack`] walks the recipient's connections one at a
//!   time, sends a targeted delivery to the owning node and waits a bounded
//!   time for the client's ack. The first positive ack wins and the remaining
//!   connections are skipped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::Notification;

use crate::backplane::Backplane;
use crate::protocol::{ConnectionId, Envelope, ServerEvent, broadcast_topic, node_topic};

/// Default bound on a single connection's acknowledgment (tuned for mobile).
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(2);

/// Outbound frames buffered per connection before the socket writer catches up.
const CONNECTION_BUFFER: usize = 256;

/// Pause before re-subscribing after the backplane subscription is lost.
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// Outcome of one `push_with_ack` call. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryAttempt {
    /// A connection acknowledged the notification.
    Delivered,
    /// No connection existed, or every connection refused it.
    Undelivered,
    /// At least one connection did not answer in time and none accepted.
    TimedOut,
}

impl DeliveryAttempt {
    pub fn is_delivered(self) -> bool {
        self == DeliveryAttempt::Delivered
    }
}

struct LocalConnection {
    recipient_id: Uuid,
    sender: mpsc::Sender<ServerEvent>,
}

/// Deliveries this node handed to one of its sockets and is waiting on.
struct InboundAck {
    connection_id: ConnectionId,
    reply_to: String,
}

pub struct Gateway {
    node_id: String,
    backplane: Arc<dyn Backplane>,
    ack_timeout: Duration,
    connections: RwLock<HashMap<ConnectionId, LocalConnection>>,
    /// Acks this node is waiting for, keyed by ack id.
    pending_acks: Mutex<HashMap<Uuid, oneshot::Sender<bool>>>,
    inbound_acks: Mutex<HashMap<Uuid, InboundAck>>,
}

impl Gateway {
    pub fn new(
        node_id: impl Into<String>,
        backplane: Arc<dyn Backplane>,
        ack_timeout: Duration,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            backplane,
            ack_timeout,
            connections: RwLock::new(HashMap::new()),
            pending_acks: Mutex::new(HashMap::new()),
            inbound_acks: Mutex::new(HashMap::new()),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }

    /// Subscribe to this node's backplane topics and spawn the listener.
    ///
    /// The first subscription is awaited so that nothing published after this
    /// returns is missed. If the subscription is later lost the listener
    /// re-subscribes on its own.
    pub async fn start(self: &Arc<Self>) -> Result<JoinHandle<()>, AppError> {
        let topics = vec![broadcast_topic(), node_topic(&self.node_id)];
        let mut rx = self.backplane.subscribe(topics.clone()).await?;
        let gateway = Arc::clone(self);

        Ok(tokio::spawn(async move {
            loop {
                while let Some(envelope) = rx.recv().await {
                    gateway.handle_envelope(envelope).await;
                }

                tracing::warn!(node_id = %gateway.node_id, "Backplane subscription lost");
                loop {
                    tokio::time::sleep(RESUBSCRIBE_DELAY).await;
                    match gateway.backplane.subscribe(topics.clone()).await {
                        Ok(next) => {
                            rx = next;
                            break;
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to re-subscribe to backplane");
                        }
                    }
                }
            }
        }))
    }

    /// Register an authenticated connection and join the recipient's channel.
    ///
    /// Returns the connection id and the stream of frames to write to the socket.
    pub async fn connect(
        &self,
        recipient_id: Uuid,
    ) -> Result<(ConnectionId, mpsc::Receiver<ServerEvent>), AppError> {
        let connection_id = ConnectionId::new(self.node_id.clone());
        let (sender, rx) = mpsc::channel(CONNECTION_BUFFER);

        self.connections.write().await.insert(
            connection_id.clone(),
            LocalConnection {
                recipient_id,
                sender,
            },
        );

        if let Err(e) = self.backplane.join(recipient_id, &connection_id).await {
            self.connections.write().await.remove(&connection_id);
            return Err(e);
        }

        tracing::info!(
            recipient_id = %recipient_id,
            connection_id = %connection_id,
            "Connection joined recipient channel"
        );
        Ok((connection_id, rx))
    }

    /// Drop a connection. Deliveries still waiting on it are refused at once
    /// so their senders do not sit out the full ack timeout.
    pub async fn disconnect(&self, connection_id: &ConnectionId) {
        let removed = self.connections.write().await.remove(connection_id);
        let Some(connection) = removed else {
            return;
        };

        if let Err(e) = self
            .backplane
            .leave(connection.recipient_id, connection_id)
            .await
        {
            // Membership ages out through the heartbeat TTL anyway.
            tracing::warn!(connection_id = %connection_id, error = %e, "Failed to leave channel");
        }

        let orphaned: Vec<(Uuid, String)> = {
            let mut inbound = self.inbound_acks.lock().await;
            let ids: Vec<Uuid> = inbound
                .iter()
                .filter(|(_, ack)| &ack.connection_id == connection_id)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| inbound.remove(&id).map(|ack| (id, ack.reply_to)))
                .collect()
        };
        for (ack_id, reply_to) in orphaned {
            self.reply(&reply_to, ack_id, false).await;
        }

        tracing::info!(
            recipient_id = %connection.recipient_id,
            connection_id = %connection_id,
            "Connection left recipient channel"
        );
    }

    /// Refresh membership of every local connection.
    pub async fn heartbeat(&self) -> Result<(), AppError> {
        let local: Vec<(Uuid, ConnectionId)> = self
            .connections
            .read()
            .await
            .iter()
            .map(|(id, c)| (c.recipient_id, id.clone()))
            .collect();

        for (recipient_id, connection_id) in &local {
            self.backplane.join(*recipient_id, connection_id).await?;
        }
        tracing::debug!(connections = local.len(), "Membership heartbeat");
        Ok(())
    }

    /// Number of sockets held by this node.
    pub async fn local_connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// A client answered a delivery that required an ack.
    pub async fn client_ack(&self, connection_id: &ConnectionId, ack_id: Uuid, delivered: bool) {
        let inbound = {
            let mut inbound = self.inbound_acks.lock().await;
            let owned = inbound
                .get(&ack_id)
                .is_some_and(|ack| &ack.connection_id == connection_id);
            if owned { inbound.remove(&ack_id) } else { None }
        };

        match inbound {
            Some(ack) => self.reply(&ack.reply_to, ack_id, delivered).await,
            None => tracing::debug!(
                connection_id = %connection_id,
                ack_id = %ack_id,
                "Ignoring unknown or late ack"
            ),
        }
    }

    /// Fire-and-forget broadcast to every connection of the recipient.
    pub async fn push(&self, recipient_id: Uuid, event: ServerEvent) -> Result<(), AppError> {
        self.backplane
            .publish(&broadcast_topic(), &Envelope::Broadcast { recipient_id, event })
            .await
    }

    /// Broadcast a new or re-surfaced notification without requiring an ack.
    pub async fn push_notification(&self, notification: &Notification) -> Result<(), AppError> {
        self.push(
            notification.recipient_id,
            ServerEvent::Notification {
                notification: notification.clone(),
                ack_id: None,
            },
        )
        .await
    }

    pub async fn notify_deleted(&self, recipient_id: Uuid, ids: Vec<Uuid>) -> Result<(), AppError> {
        self.push(recipient_id, ServerEvent::NotificationDeleted { ids })
            .await
    }

    pub async fn notify_updated(&self, notification: &Notification) -> Result<(), AppError> {
        self.push(
            notification.recipient_id,
            ServerEvent::NotificationUpdated {
                notification: notification.clone(),
            },
        )
        .await
    }

    /// At-least-once delivery of a notification to any one of the
    /// recipient's connections.
    ///
    /// Connections are tried in membership order, each bounded by the ack
    /// timeout. `on_result(notification_id, delivered)` is invoked exactly
    /// once before returning, so callers can run their fallback there.
    pub async fn push_with_ack<F>(&self, notification: &Notification, on_result: F) -> DeliveryAttempt
    where
        F: FnOnce(Uuid, bool) + Send,
    {
        let recipient_id = notification.recipient_id;
        let members = match self.backplane.members(recipient_id).await {
            Ok(members) => members,
            Err(e) => {
                tracing::warn!(recipient_id = %recipient_id, error = %e, "Failed to list channel members");
                Vec::new()
            }
        };

        let mut attempt = DeliveryAttempt::Undelivered;
        for connection_id in members {
            match self.deliver_to(&connection_id, notification).await {
                Some(true) => {
                    attempt = DeliveryAttempt::Delivered;
                    break;
                }
                Some(false) => {}
                None => attempt = DeliveryAttempt::TimedOut,
            }
        }

        tracing::debug!(
            recipient_id = %recipient_id,
            notification_id = %notification.id,
            ?attempt,
            "Acknowledged push finished"
        );
        on_result(notification.id, attempt.is_delivered());
        attempt
    }

    /// One targeted delivery. `None` means the ack timed out.
    async fn deliver_to(&self, connection_id: &ConnectionId, notification: &Notification) -> Option<bool> {
        let ack_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.pending_acks.lock().await.insert(ack_id, tx);

        let envelope = Envelope::Deliver {
            connection_id: connection_id.clone(),
            ack_id,
            reply_to: self.node_id.clone(),
            event: ServerEvent::Notification {
                notification: notification.clone(),
                ack_id: Some(ack_id),
            },
        };

        let routed = if connection_id.node_id == self.node_id {
            self.handle_envelope(envelope).await;
            Ok(())
        } else {
            self.backplane
                .publish(&node_topic(&connection_id.node_id), &envelope)
                .await
        };

        let outcome = match routed {
            Ok(()) => match tokio::time::timeout(self.ack_timeout, rx).await {
                Ok(Ok(delivered)) => Some(delivered),
                // Sender dropped without an answer counts as a refusal.
                Ok(Err(_)) => Some(false),
                Err(_) => None,
            },
            Err(e) => {
                tracing::warn!(connection_id = %connection_id, error = %e, "Failed to route delivery");
                Some(false)
            }
        };

        self.pending_acks.lock().await.remove(&ack_id);
        outcome
    }

    /// Apply one backplane envelope to this node.
    pub async fn handle_envelope(&self, envelope: Envelope) {
        match envelope {
            Envelope::Broadcast {
                recipient_id,
                event,
            } => {
                let senders: Vec<mpsc::Sender<ServerEvent>> = self
                    .connections
                    .read()
                    .await
                    .values()
                    .filter(|c| c.recipient_id == recipient_id)
                    .map(|c| c.sender.clone())
                    .collect();
                // The listener serves every socket on this node, so it never
                // waits on one of them: a full buffer loses the frame.
                for sender in senders {
                    if let Err(mpsc::error::TrySendError::Full(_)) = sender.try_send(event.clone()) {
                        tracing::warn!(
                            recipient_id = %recipient_id,
                            "Connection buffer full, broadcast frame dropped"
                        );
                    }
                }
            }
            Envelope::Deliver {
                connection_id,
                ack_id,
                reply_to,
                event,
            } => {
                let sender = self
                    .connections
                    .read()
                    .await
                    .get(&connection_id)
                    .map(|c| c.sender.clone());

                let Some(sender) = sender else {
                    // Stale membership: the socket is gone from this node.
                    self.reply(&reply_to, ack_id, false).await;
                    return;
                };

                self.inbound_acks.lock().await.insert(
                    ack_id,
                    InboundAck {
                        connection_id: connection_id.clone(),
                        reply_to: reply_to.clone(),
                    },
                );
                // A socket that cannot take the frame now refuses it.
                if let Err(e) = sender.try_send(event) {
                    if matches!(e, mpsc::error::TrySendError::Full(_)) {
                        tracing::warn!(connection_id = %connection_id, "Connection buffer full, delivery refused");
                    }
                    self.inbound_acks.lock().await.remove(&ack_id);
                    self.reply(&reply_to, ack_id, false).await;
                }
            }
            Envelope::AckReply { ack_id, delivered } => {
                if let Some(tx) = self.pending_acks.lock().await.remove(&ack_id) {
                    let _ = tx.send(delivered);
                }
            }
        }
    }

    /// Report a delivery outcome to the node waiting for it.
    async fn reply(&self, reply_to: &str, ack_id: Uuid, delivered: bool) {
        if reply_to == self.node_id {
            if let Some(tx) = self.pending_acks.lock().await.remove(&ack_id) {
                let _ = tx.send(delivered);
            }
            return;
        }

        if let Err(e) = self
            .backplane
            .publish(&node_topic(reply_to), &Envelope::AckReply { ack_id, delivered })
            .await
        {
            // The waiting node falls back to its timeout.
            tracing::warn!(reply_to = %reply_to, ack_id = %ack_id, error = %e, "Failed to publish ack reply");
        }
    }
}
