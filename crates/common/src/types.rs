use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Notification category, chosen by the collaborator that raises the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Info,
    Success,
    Warning,
    Error,
}

impl NotificationType {
    /// Low-priority events are staged and folded into a digest instead of
    /// being persisted and pushed one by one.
    pub fn is_low_priority(self) -> bool {
        matches!(self, NotificationType::Info)
    }

    /// Whether a push of this type must be confirmed by a client.
    pub fn requires_ack(self) -> bool {
        matches!(self, NotificationType::Warning | NotificationType::Error)
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationType::Info => write!(f, "info"),
            NotificationType::Success => write!(f, "success"),
            NotificationType::Warning => write!(f, "warning"),
            NotificationType::Error => write!(f, "error"),
        }
    }
}

/// Lifecycle state of a persisted notification.
///
/// This enum is the only stored read-state; a boolean "read" view is derived
/// from it where needed (see [`Notification::is_read`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Unread,
    Done,
    Saved,
    Snoozed,
    Archived,
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationStatus::Unread => write!(f, "unread"),
            NotificationStatus::Done => write!(f, "done"),
            NotificationStatus::Saved => write!(f, "saved"),
            NotificationStatus::Snoozed => write!(f, "snoozed"),
            NotificationStatus::Archived => write!(f, "archived"),
        }
    }
}

impl std::str::FromStr for NotificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unread" => Ok(NotificationStatus::Unread),
            "done" => Ok(NotificationStatus::Done),
            "saved" => Ok(NotificationStatus::Saved),
            "snoozed" => Ok(NotificationStatus::Snoozed),
            "archived" => Ok(NotificationStatus::Archived),
            other => Err(format!("unknown notification status '{}'", other)),
        }
    }
}

/// A persisted notification.
///
/// `snoozed_until` is `Some` exactly when `status == Snoozed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub message: String,
    pub context: serde_json::Value,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub status: NotificationStatus,
    pub snoozed_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Build a fresh unread notification.
    pub fn new(
        recipient_id: Uuid,
        message: impl Into<String>,
        context: serde_json::Value,
        kind: NotificationType,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            recipient_id,
            message: message.into(),
            context,
            kind,
            status: NotificationStatus::Unread,
            snoozed_until: None,
            created_at: now_micros(),
        }
    }

    pub fn is_read(&self) -> bool {
        self.status != NotificationStatus::Unread
    }
}

/// A low-priority event waiting in the staging area for its digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedItem {
    pub message: String,
    pub context: serde_json::Value,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub created_at: DateTime<Utc>,
}

impl StagedItem {
    pub fn new(message: impl Into<String>, context: serde_json::Value, kind: NotificationType) -> Self {
        Self {
            message: message.into(),
            context,
            kind,
            created_at: Utc::now(),
        }
    }
}

/// Current time truncated to the microsecond precision PostgreSQL stores.
///
/// Keyset cursors compare timestamps for strict ordering, so every backend
/// must hold the same precision the cursor encodes.
pub fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Structural containment with PostgreSQL `jsonb @>` semantics.
///
/// Objects contain another object when every key of `partial` is present and
/// its value is contained recursively. Arrays contain another array when each
/// element of `partial` is contained in some element of `value`. Numbers
/// compare by value; other scalars must be equal.
pub fn context_contains(value: &serde_json::Value, partial: &serde_json::Value) -> bool {
    use serde_json::Value;

    match (value, partial) {
        (Value::Object(whole), Value::Object(part)) => part.iter().all(|(key, expected)| {
            whole
                .get(key)
                .is_some_and(|actual| context_contains(actual, expected))
        }),
        (Value::Array(whole), Value::Array(part)) => part
            .iter()
            .all(|expected| whole.iter().any(|actual| context_contains(actual, expected))),
        // jsonb compares numbers by value: 1 and 1.0 are equal.
        (Value::Number(actual), Value::Number(expected)) => match (actual.as_i64(), expected.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ => match (actual.as_u64(), expected.as_u64()) {
                (Some(a), Some(b)) => a == b,
                _ => actual.as_f64() == expected.as_f64(),
            },
        },
        (actual, expected) => actual == expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_contains_ignores_extra_keys() {
        let ctx = json!({"projectId": "p1", "inviteId": "i1", "meta": {"a": 1}});
        assert!(context_contains(&ctx, &json!({"inviteId": "i1"})));
        assert!(context_contains(&ctx, &json!({})));
    }

    #[test]
    fn test_contains_value_mismatch() {
        let ctx = json!({"inviteId": "i2"});
        assert!(!context_contains(&ctx, &json!({"inviteId": "i1"})));
        assert!(!context_contains(&ctx, &json!({"projectId": "p1"})));
    }

    #[test]
    fn test_contains_nested_objects_and_arrays() {
        let ctx = json!({"meta": {"a": 1, "b": 2}, "tags": ["x", "y", "z"]});
        assert!(context_contains(&ctx, &json!({"meta": {"b": 2}})));
        assert!(context_contains(&ctx, &json!({"tags": ["z", "x"]})));
        assert!(!context_contains(&ctx, &json!({"tags": ["w"]})));
        assert!(!context_contains(&ctx, &json!({"meta": {"a": 2}})));
    }

    #[test]
    fn test_contains_compares_numbers_by_value() {
        let ctx = json!({"count": 1, "ratio": 0.5, "big": u64::MAX});
        assert!(context_contains(&ctx, &json!({"count": 1.0})));
        assert!(context_contains(&ctx, &json!({"ratio": 0.50})));
        assert!(context_contains(&ctx, &json!({"big": u64::MAX})));
        assert!(!context_contains(&ctx, &json!({"count": 1.5})));
        assert!(context_contains(&json!({"ids": [1.0, 2]}), &json!({"ids": [1]})));
    }

    #[test]
    fn test_contains_scalar_types_are_strict() {
        let ctx = json!({"count": 1});
        assert!(!context_contains(&ctx, &json!({"count": "1"})));
    }

    #[test]
    fn test_status_roundtrip_through_str() {
        for status in [
            NotificationStatus::Unread,
            NotificationStatus::Done,
            NotificationStatus::Saved,
            NotificationStatus::Snoozed,
            NotificationStatus::Archived,
        ] {
            assert_eq!(status.to_string().parse::<NotificationStatus>(), Ok(status));
        }
        assert!("read".parse::<NotificationStatus>().is_err());
    }

    #[test]
    fn test_read_view_is_derived_from_status() {
        let mut n = Notification::new(Uuid::new_v4(), "hi", json!({}), NotificationType::Info);
        assert!(!n.is_read());
        n.status = NotificationStatus::Saved;
        assert!(n.is_read());
    }

    #[test]
    fn test_priority_and_ack_classification() {
        assert!(NotificationType::Info.is_low_priority());
        assert!(!NotificationType::Error.is_low_priority());
        assert!(NotificationType::Error.requires_ack());
        assert!(NotificationType::Warning.requires_ack());
        assert!(!NotificationType::Success.requires_ack());
    }
}
