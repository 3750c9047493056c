//! Herald HTTP and WebSocket server.
//!
//! Endpoints:
//! - GET   /health
//! - GET   /api/notifications: Keyset-paginated feed
//! - GET   /api/notifications/all: Whole feed, optionally filtered by status
//! - PATCH /api/notifications/{id}/status
//! - POST  /api/notifications/{id}/snooze
//! - POST  /api/notifications/{id}/unsnooze
//! - POST  /api/notifications/archive-all
//! - GET   /ws: Real-time push channel

pub mod middleware;
pub mod routes;
pub mod state;
