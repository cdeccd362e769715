//! # sockpool
//!
//! An endpoint-keyed client socket pool for Tokio.
//!
//! `sockpool` hands out transport connections keyed by `host:port` (or
//! `unix:///path`), reusing idle ones and bounding how many each endpoint may
//! hold at once.
//!
//! ## Features
//!
//! - **Per-host limits**: 8 connections per endpoint by default, pending
//!   connects included
//! - **FIFO queuing**: requests over the limit wait in arrival order
//! - **Idle eviction**: unused connections close after 10s by default
//! - **Liveness checks**: dead connections are dropped on checkin and skipped
//!   on checkout
//! - **Bind addresses**: connections remember the local address they were
//!   bound to and are only reused for matching requests
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sockpool::socket::options::OptionOverrides;
//! use sockpool::socket::pool::ClientSocketPool;
//! use tokio::io::AsyncWriteExt;
//!
//! #[tokio::main]
//! async fn main() {
//!     let pool = ClientSocketPool::new();
//!     let mut socket = pool
//!         .checkout("example.com:80", &OptionOverrides::new())
//!         .await
//!         .unwrap();
//!     socket.write_all(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n").await.unwrap();
//!     pool.checkin(socket).unwrap();
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Core types and error definitions
//! - [`socket`] - Connection pooling, connectors, and timers

pub mod base;
pub mod socket;
