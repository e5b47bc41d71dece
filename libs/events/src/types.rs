//! Event and call payload definitions for the master protocol.
//!
//! The scheduler receives [`Event`]s over the subscription stream and sends
//! calls through the caller trait; the payload types here are shared by
//! both directions.

use std::collections::BTreeMap;

use bosun_id::{AgentId, ExecutorId, FrameworkId, OfferId, TaskId};
use serde::{Deserialize, Serialize};

use crate::error::EventError;
use crate::resource::{Resource, ResourceQuota};

// =============================================================================
// Task Lifecycle
// =============================================================================

/// The single lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Admitted but not yet examined by the controller.
    Unknown,
    /// Queued for placement; has no agent assignment.
    Staging,
    /// Launched; the executor is bringing it up.
    Starting,
    /// Running on an agent.
    Running,
    /// Exited successfully.
    Finished,
    /// Exited with an error.
    Failed,
    /// Killed on request.
    Killed,
    /// The master lost track of it; recoverable.
    Lost,
    /// Rejected outright by the master or an agent.
    Error,
}

impl TaskState {
    /// True for states that end a task's life in the registry.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Finished | TaskState::Failed | TaskState::Killed | TaskState::Error
        )
    }

    /// True for states a task comes back from (re-queued to staging).
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TaskState::Lost)
    }

    /// Canonical lowercase name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Unknown => "unknown",
            TaskState::Staging => "staging",
            TaskState::Starting => "starting",
            TaskState::Running => "running",
            TaskState::Finished => "finished",
            TaskState::Failed => "failed",
            TaskState::Killed => "killed",
            TaskState::Lost => "lost",
            TaskState::Error => "error",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskState {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(TaskState::Unknown),
            "staging" => Ok(TaskState::Staging),
            "starting" => Ok(TaskState::Starting),
            "running" => Ok(TaskState::Running),
            "finished" => Ok(TaskState::Finished),
            "failed" => Ok(TaskState::Failed),
            "killed" => Ok(TaskState::Killed),
            "lost" => Ok(TaskState::Lost),
            "error" => Ok(TaskState::Error),
            other => Err(EventError::UnknownState(other.to_string())),
        }
    }
}

/// A status update relayed by the master for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    /// The task the update is about.
    pub task_id: TaskId,

    /// Reported state.
    pub state: TaskState,

    /// Free-form reason from the agent or master.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Agent the task runs on, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,

    /// Executor that produced the update, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_id: Option<ExecutorId>,

    /// Acknowledgement token. Empty means the update must not be acked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

// =============================================================================
// Offers
// =============================================================================

/// A time-bounded grant of resources on one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    /// Opaque offer identity.
    pub id: OfferId,

    /// Agent the resources live on.
    pub agent_id: AgentId,

    /// Agent hostname, used by hostname placement filters.
    pub hostname: String,

    /// Agent attributes (arbitrary key → value).
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,

    /// Advertised resources by name.
    #[serde(default)]
    pub resources: Vec<Resource>,
}

impl Offer {
    /// The scalar capacity this offer advertises.
    #[must_use]
    pub fn quota(&self) -> ResourceQuota {
        ResourceQuota::from_resources(&self.resources)
    }
}

// =============================================================================
// Outbound call payloads
// =============================================================================

/// The identity this framework presents on subscribe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkInfo {
    /// Unix user tasks run as.
    pub user: String,

    /// Human-readable framework name.
    pub name: String,

    /// Stored identity; present on re-subscription (failover).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework_id: Option<FrameworkId>,

    /// How long the master keeps our tasks after we disconnect.
    pub failover_timeout_secs: f64,

    /// Whether agents checkpoint our tasks across agent restarts.
    pub checkpoint: bool,

    /// Allocation role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Hostname to advertise for this scheduler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    /// Authentication principal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
}

/// What to launch, bundled into an `Accept` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    /// User-supplied task name.
    pub name: String,

    /// Minted task identity.
    pub task_id: TaskId,

    /// Agent chosen by placement.
    pub agent_id: AgentId,

    /// Shell command, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Container image, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Environment passed to the executor.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    /// Resources the launch consumes from the offer.
    pub resources: Vec<Resource>,
}

/// An operation applied to accepted offers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OfferOperation {
    /// Launch tasks against the offered resources.
    Launch { tasks: Vec<TaskInfo> },
    /// Reserve resources for this framework's role.
    Reserve { resources: Vec<Resource> },
}

/// Decline/accept filter telling the master when to re-offer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OfferFilters {
    /// Seconds the master withholds the declined resources from us.
    pub refuse_seconds: f64,
}

impl OfferFilters {
    /// Short refusal used while staged work remains.
    pub const SHORT_REFUSE_SECS: f64 = 5.0;
    /// Long refusal used when the staging queue is empty.
    pub const LONG_REFUSE_SECS: f64 = 120.0;

    /// Filter for the planning path (work remains).
    #[must_use]
    pub fn short() -> Self {
        Self {
            refuse_seconds: Self::SHORT_REFUSE_SECS,
        }
    }

    /// Filter for the quiesce path (no staged work).
    #[must_use]
    pub fn long() -> Self {
        Self {
            refuse_seconds: Self::LONG_REFUSE_SECS,
        }
    }
}

/// One task's last-known identity, listed in an explicit reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileTask {
    /// Task identity as of our last observation.
    pub task_id: TaskId,

    /// Agent assignment as of our last observation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
}

// =============================================================================
// Calls
// =============================================================================

/// Everything a framework can tell the master.
///
/// Mirrors [`Event`]: one sum type, tagged on the wire, each variant
/// carrying only its fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Call {
    /// Open (or re-open, with a framework id) a subscription.
    Subscribe { framework: FrameworkInfo },

    /// Unregister and let the master kill our tasks.
    Teardown,

    /// Consume offers with the given operations.
    Accept {
        offer_ids: Vec<OfferId>,
        operations: Vec<OfferOperation>,
        filters: OfferFilters,
    },

    /// Return offers unused.
    Decline {
        offer_ids: Vec<OfferId>,
        filters: OfferFilters,
    },

    /// Kill one task.
    Kill {
        task_id: TaskId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<AgentId>,
    },

    /// Resume receiving offers.
    Revive,

    /// Pause offers until the next revive.
    Suppress,

    /// Ask for authoritative status of the listed tasks.
    Reconcile { tasks: Vec<ReconcileTask> },

    /// Acknowledge one status update.
    Acknowledge {
        agent_id: AgentId,
        task_id: TaskId,
        uuid: String,
    },

    /// Shut down an executor.
    Shutdown {
        executor_id: ExecutorId,
        agent_id: AgentId,
    },

    /// Opaque framework-to-executor bytes.
    Message {
        agent_id: AgentId,
        executor_id: ExecutorId,
        data: Vec<u8>,
    },

    /// Hint the allocator about resources we want.
    Request { requests: Vec<Resource> },
}

// =============================================================================
// Events
// =============================================================================

/// Everything the master can tell a subscribed framework.
///
/// The event set is fixed by the master protocol; each variant carries only
/// its fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Subscription acknowledged; carries our framework identity.
    Subscribed {
        framework_id: FrameworkId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        heartbeat_interval_secs: Option<f64>,
    },

    /// New resource offers.
    Offers { offers: Vec<Offer> },

    /// A previously sent offer is no longer valid.
    Rescind { offer_id: OfferId },

    /// Task status update; acknowledged iff `status.uuid` is non-empty.
    Update { status: TaskStatus },

    /// An agent or executor terminated.
    Failure {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<AgentId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        executor_id: Option<ExecutorId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<i32>,
    },

    /// Opaque executor-to-framework bytes.
    Message {
        agent_id: AgentId,
        executor_id: ExecutorId,
        data: Vec<u8>,
    },

    /// Unrecoverable error; the subscription is dead.
    Error { message: String },

    /// Keep-alive; no payload.
    Heartbeat,

    /// Maintenance drain request; acknowledged, not acted upon.
    InverseOffers { offer_ids: Vec<OfferId> },

    /// A maintenance drain request was withdrawn.
    RescindInverseOffer { offer_id: OfferId },
}

// =============================================================================
// Tests
// =============================================================================
