//! # bosun-events
//!
//! Protocol vocabulary shared between the event controller, the master
//! caller, and the control API.
//!
//! ## Design Principles
//!
//! - The master's event set is fixed by its protocol, so events are a single
//!   sum type; each variant carries only its fields
//! - Payload types are plain serde structs; the wire codec itself lives
//!   behind the caller and is not this crate's concern
//! - Resource math is centralized here so that placement and planning agree
//!   on one epsilon
//!
//! ## Contents
//!
//! - [`Event`] and its payloads — everything the master can tell us
//! - [`Offer`], [`Resource`], [`ResourceQuota`] — what agents advertise
//! - [`TaskState`], [`TaskStatus`] — task lifecycle vocabulary
//! - [`TaskInfo`], [`OfferOperation`], [`OfferFilters`], [`FrameworkInfo`],
//!   [`ReconcileTask`] — what we send back

mod error;
mod resource;
mod types;

pub use error::EventError;
pub use resource::*;
pub use types::*;
