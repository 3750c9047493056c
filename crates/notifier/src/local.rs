//! In-process backplane.
//!
//! Several gateways sharing one `LocalBackplane` behave like several server
//! processes sharing Redis, which is how the fan-out protocol is tested and
//! how a single-node development setup runs without Redis.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

use herald_common::error::AppError;

use crate::backplane::Backplane;
use crate::protocol::{ConnectionId, Envelope};

const SUBSCRIPTION_BUFFER: usize = 1024;

#[derive(Default)]
struct Inner {
    subscribers: HashMap<String, Vec<mpsc::Sender<Envelope>>>,
    members: HashMap<Uuid, Vec<ConnectionId>>,
}

#[derive(Default)]
pub struct LocalBackplane {
    inner: Mutex<Inner>,
}

impl LocalBackplane {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Backplane for LocalBackplane {
    async fn publish(&self, topic: &str, envelope: &Envelope) -> Result<(), AppError> {
        let senders = {
            let mut inner = self.inner.lock().await;
            match inner.subscribers.get_mut(topic) {
                Some(senders) => {
                    senders.retain(|tx| !tx.is_closed());
                    senders.clone()
                }
                None => return Ok(()),
            }
        };

        for tx in senders {
            // A subscriber that went away is pruned on the next publish.
            let _ = tx.send(envelope.clone()).await;
        }
        Ok(())
    }

    async fn subscribe(&self, topics: Vec<String>) -> Result<mpsc::Receiver<Envelope>, AppError> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let mut inner = self.inner.lock().await;
        for topic in topics {
            inner.subscribers.entry(topic).or_default().push(tx.clone());
        }
        Ok(rx)
    }

    async fn join(&self, recipient_id: Uuid, connection_id: &ConnectionId) -> Result<(), AppError> {
        let mut inner = self.inner.lock().await;
        let members = inner.members.entry(recipient_id).or_default();
        if !members.contains(connection_id) {
            members.push(connection_id.clone());
        }
        Ok(())
    }

    async fn leave(
        &self,
        recipient_id: Uuid,
        connection_id: &ConnectionId,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.lock().await;
        if let Some(members) = inner.members.get_mut(&recipient_id) {
            members.retain(|m| m != connection_id);
            if members.is_empty() {
                inner.members.remove(&recipient_id);
            }
        }
        Ok(())
    }

    async fn members(&self, recipient_id: Uuid) -> Result<Vec<ConnectionId>, AppError> {
        let inner = self.inner.lock().await;
        Ok(inner.members.get(&recipient_id).cloned().unwrap_or_default())
    }
}
