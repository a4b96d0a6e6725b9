//! Alert dispatcher: sweeps active alerts, claims new matches and delivers
//! them, under a single-writer lock.

pub mod backlog;
pub mod coordinator;
pub mod dispatch;
pub mod health;
pub mod heartbeat;
pub mod retry;
pub mod summary;
pub mod sweep;
