//! Shared application state for the Axum API server.

use std::sync::Arc;
use std::time::Duration;

use herald_common::config::AppConfig;
use herald_engine::service::NotificationService;
use herald_notifier::gateway::Gateway;

use crate::routes::ws::HANDSHAKE_TIMEOUT;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<NotificationService>,
    pub gateway: Arc<Gateway>,
    pub config: AppConfig,
    /// How long an unauthenticated socket may stay open.
    pub handshake_timeout: Duration,
}

impl AppState {
    pub fn new(service: Arc<NotificationService>, config: AppConfig) -> Self {
        Self {
            gateway: service.gateway().clone(),
            service,
            config,
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}
