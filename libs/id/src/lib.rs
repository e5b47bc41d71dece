//! # bosun-id
//!
//! Typed identifiers for the bosun scheduler.
//!
//! ## Design Principles
//!
//! - IDs are typed to prevent mixing different resource kinds
//! - Master-issued IDs (offers, agents, frameworks, executors) are opaque
//!   strings; we validate shape (non-empty) but never assume structure
//! - Task IDs are scheduler-generated: `{task-name}-{uuid}`
//! - All IDs support roundtrip serialization (parse → format → parse)
//!
//! ## ID Kinds
//!
//! | Type | Issued by |
//! |---|---|
//! | `FrameworkId` | master, on first subscribe |
//! | `OfferId` | master, per offer |
//! | `AgentId` | master, per agent |
//! | `ExecutorId` | scheduler or master |
//! | `TaskId` | scheduler, at launch |

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;
