//! Real-time delivery of notifications to connected clients.
//!
//! Every server process runs one [`gateway::Gateway`]. Channel membership and
//! message routing go through a shared [`backplane::Backplane`] so that a
//! recipient may be connected to any process in the fleet.

pub mod backplane;
pub mod gateway;
pub mod local;
pub mod protocol;
