//! Notification state machine, staging and scheduling.
//!
//! Storage and scheduling sit behind traits ([`store::NotificationStore`],
//! [`staging::StagingStore`], [`jobs::JobQueue`]) with PostgreSQL/Redis
//! implementations for production and in-memory ones in [`memory`].

pub mod debounce;
pub mod delivery;
pub mod digest;
pub mod feed;
pub mod jobs;
pub mod memory;
pub mod service;
pub mod snooze;
pub mod staging;
pub mod store;
pub mod worker;
