//! bosun scheduler library.
//!
//! The scheduler registers as a framework with an offer-based cluster
//! master, accepts task specifications over an HTTP control API, places
//! tasks onto offers subject to per-task filters, and tracks task lifecycle
//! through the master's status updates. State is written through to a
//! key-value store so a restarted scheduler can resubscribe with its old
//! framework identity and reconcile.

pub mod api;
pub mod config;
pub mod controller;
pub mod handlers;
pub mod master;
pub mod resource;
pub mod storage;
pub mod task;
