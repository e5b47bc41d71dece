//! The master-facing call interface.
//!
//! The wire codec and streaming transport live behind this trait; the core
//! only ever sees an injected [`MasterCaller`]. Subscribing yields a
//! channel of [`Event`]s that stays open until the transport drops, at
//! which point the controller backs off and resubscribes.

pub mod client;
pub mod mock;

pub use client::HttpMasterCaller;
pub use mock::{MockMaster, RecordedCall};

use async_trait::async_trait;
use bosun_events::{
    Event, FrameworkInfo, OfferFilters, OfferOperation, ReconcileTask, Resource,
};
use bosun_id::{AgentId, ExecutorId, OfferId, TaskId};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors from calls to the master.
#[derive(Debug, Error, Clone)]
pub enum CallError {
    /// The transport failed; the subscription may be dead.
    #[error("transport error: {0}")]
    Transport(String),

    /// The master understood the call and refused it.
    #[error("master rejected call: {0}")]
    Rejected(String),
}

impl CallError {
    /// True when the master refused because it does not know the subject,
    /// which idempotent paths (kill) treat as success.
    #[must_use]
    pub fn is_unknown_subject(&self) -> bool {
        matches!(self, CallError::Rejected(msg) if msg.contains("unknown task"))
    }
}

/// The calls a subscribed framework can make.
///
/// Implementations own serialization and transport; every method blocks on
/// network I/O and is only invoked from the event-loop task.
#[async_trait]
pub trait MasterCaller: Send + Sync {
    /// Open a subscription; events arrive on the returned channel until
    /// the transport drops it.
    async fn subscribe(
        &self,
        framework: &FrameworkInfo,
    ) -> Result<mpsc::Receiver<Event>, CallError>;

    /// Unregister the framework and let the master kill its tasks.
    async fn teardown(&self) -> Result<(), CallError>;

    /// Accept offers, applying the given operations.
    async fn accept(
        &self,
        offer_ids: &[OfferId],
        operations: &[OfferOperation],
        filters: &OfferFilters,
    ) -> Result<(), CallError>;

    /// Decline offers.
    async fn decline(&self, offer_ids: &[OfferId], filters: &OfferFilters)
        -> Result<(), CallError>;

    /// Kill a task.
    async fn kill(&self, task_id: &TaskId, agent_id: Option<&AgentId>) -> Result<(), CallError>;

    /// Resume receiving offers.
    async fn revive(&self) -> Result<(), CallError>;

    /// Pause offers until the next revive.
    async fn suppress(&self) -> Result<(), CallError>;

    /// Ask for authoritative status of the listed tasks.
    async fn reconcile(&self, tasks: &[ReconcileTask]) -> Result<(), CallError>;

    /// Acknowledge a status update.
    async fn acknowledge(
        &self,
        agent_id: &AgentId,
        task_id: &TaskId,
        uuid: &str,
    ) -> Result<(), CallError>;

    /// Shut down an executor.
    async fn shutdown_executor(
        &self,
        executor_id: &ExecutorId,
        agent_id: &AgentId,
    ) -> Result<(), CallError>;

    /// Send opaque bytes to an executor.
    async fn message(
        &self,
        agent_id: &AgentId,
        executor_id: &ExecutorId,
        data: &[u8],
    ) -> Result<(), CallError>;

    /// Hint the allocator about resources we want.
    async fn request(&self, resources: &[Resource]) -> Result<(), CallError>;
}
