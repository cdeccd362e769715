//! Socket and connection management.
//!
//! Provides connection pooling and socket handling mirroring Chromium's `net/socket/`:
//! - [`pool`]: Connection pooling (8 per host by default, FIFO queuing)
//! - [`connectjob`]: DNS → TCP connection flow, or Unix-domain connects
//! - [`options`]: Pool options, per-checkout overrides, and JSON config
//! - [`scheduler`]: Timers driving idle eviction

pub mod client;
pub mod connectjob;
pub mod endpoint;
pub mod error;
pub mod options;
pub mod pool;
pub mod scheduler;
