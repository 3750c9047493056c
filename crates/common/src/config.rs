use serde::Deserialize;

use crate::error::AppError;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string (staging, delayed jobs, pub/sub backplane)
    pub redis_url: String,

    /// Address the API server binds to
    pub listen_addr: String,

    /// Identifier of this process on the backplane (default: random UUID)
    pub node_id: String,

    /// JWT secret for API and WebSocket authentication
    pub jwt_secret: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Delay between the first low-priority event and its digest (default: 300)
    pub digest_window_secs: u64,

    /// Safety-net TTL of staged items (default: 24h)
    pub staging_ttl_secs: u64,

    /// Context key used to group staged items inside a digest
    pub digest_group_key: String,

    /// How long a single connection gets to acknowledge a delivery (default: 2000)
    pub ack_timeout_ms: u64,

    /// Interval of the snoozed-notification sweep (default: 300)
    pub snooze_sweep_interval_secs: u64,

    /// How often the job worker polls for due jobs (default: 1000)
    pub job_poll_interval_ms: u64,

    /// Connections not refreshed within this window are pruned from channel membership
    pub membership_ttl_secs: u64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| required("DATABASE_URL"))?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            listen_addr: std::env::var("LISTEN_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            node_id: std::env::var("NODE_ID")
                .unwrap_or_else(|_| uuid::Uuid::new_v4().to_string()),
            jwt_secret: std::env::var("JWT_SECRET")
                .map_err(|_| required("JWT_SECRET"))?,
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", 20)?,
            digest_window_secs: parse_var("DIGEST_WINDOW_SECS", 300)?,
            staging_ttl_secs: parse_var("STAGING_TTL_SECS", 86_400)?,
            digest_group_key: std::env::var("DIGEST_GROUP_KEY")
                .unwrap_or_else(|_| "projectId".to_string()),
            ack_timeout_ms: parse_var("ACK_TIMEOUT_MS", 2000)?,
            snooze_sweep_interval_secs: parse_var("SNOOZE_SWEEP_INTERVAL_SECS", 300)?,
            job_poll_interval_ms: parse_var("JOB_POLL_INTERVAL_MS", 1000)?,
            membership_ttl_secs: parse_var("MEMBERSHIP_TTL_SECS", 60)?,
        })
    }
}

fn required(name: &str) -> AppError {
    AppError::Config(format!("{} environment variable is required", name))
}

/// Read a numeric variable, falling back to `default` when it is unset.
fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, AppError> {
    match std::env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| {
            AppError::Config(format!(
                "{} must be a valid {}",
                name,
                std::any::type_name::<T>()
            ))
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_var_default_when_unset() {
        let value: u64 = parse_var("HERALD_TEST_SURELY_UNSET_VAR", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_parse_var_rejects_malformed_value() {
        // SAFETY: the variable name is unique to this test.
        unsafe { std::env::set_var("HERALD_TEST_MALFORMED_U32", "twenty") };
        let err = parse_var::<u32>("HERALD_TEST_MALFORMED_U32", 20).unwrap_err();
        assert!(matches!(err, AppError::Config(ref msg) if msg.contains("HERALD_TEST_MALFORMED_U32")));
    }

    #[test]
    fn test_required_reports_variable_name() {
        let err = required("JWT_SECRET");
        assert_eq!(err.to_string(), "Configuration error: JWT_SECRET environment variable is required");
    }
}
