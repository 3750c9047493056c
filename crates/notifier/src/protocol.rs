//! Wire types: client frames, server frames and backplane envelopes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use herald_common::types::Notification;

/// Identity of one live client connection in the fleet.
///
/// The owning node is part of the identity so any process can route a
/// targeted delivery to the process that holds the socket.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ConnectionId {
    pub node_id: String,
    pub local_id: Uuid,
}

impl ConnectionId {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            local_id: Uuid::new_v4(),
        }
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.node_id, self.local_id)
    }
}

impl std::str::FromStr for ConnectionId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Node ids may contain '/', the local id never does.
        let (node_id, local) = s
            .rsplit_once('/')
            .ok_or_else(|| format!("malformed connection id '{}'", s))?;
        let local_id = Uuid::parse_str(local).map_err(|e| e.to_string())?;
        Ok(Self {
            node_id: node_id.to_string(),
            local_id,
        })
    }
}

impl From<ConnectionId> for String {
    fn from(id: ConnectionId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for ConnectionId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Why a handshake was rejected. Clients refresh their token on `Expired`
/// and give up on `Invalid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthFailure {
    Expired,
    Invalid,
}

impl std::fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthFailure::Expired => write!(f, "expired"),
            AuthFailure::Invalid => write!(f, "invalid"),
        }
    }
}

/// Frames sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Authenticate { token: String },
    Ack { ack_id: Uuid, delivered: bool },
}

/// Frames sent to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Authenticated {
        recipient_id: Uuid,
    },
    Unauthorized {
        reason: AuthFailure,
    },
    Notification {
        notification: Notification,
        /// Present when the client must answer with an `ack` frame.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ack_id: Option<Uuid>,
    },
    NotificationDeleted {
        ids: Vec<Uuid>,
    },
    NotificationUpdated {
        notification: Notification,
    },
}

/// Messages exchanged between gateway nodes over the backplane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Envelope {
    /// Deliver to every connection of the recipient, no acknowledgment.
    Broadcast {
        recipient_id: Uuid,
        event: ServerEvent,
    },
    /// Deliver to one connection and report the client's answer to `reply_to`.
    Deliver {
        connection_id: ConnectionId,
        ack_id: Uuid,
        reply_to: String,
        event: ServerEvent,
    },
    /// Outcome of a targeted delivery.
    AckReply { ack_id: Uuid, delivered: bool },
}

/// Topic every node subscribes to for recipient broadcasts.
pub fn broadcast_topic() -> String {
    "herald:gateway:broadcast".to_string()
}

/// Topic owned by a single node for targeted deliveries and ack replies.
pub fn node_topic(node_id: &str) -> String {
    format!("herald:gateway:node:{}", node_id)
}
