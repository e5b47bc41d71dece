//! Task records: the immutable user spec plus mutable runtime identity.

pub mod manager;

pub use manager::{TaskManager, TaskManagerError};

use std::collections::BTreeMap;

use bosun_events::{ResourceQuota, TaskInfo, TaskState};
use bosun_id::{AgentId, ExecutorId, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::resource::filter::Filter;

/// Optional health probe the executor runs against the task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    /// HTTP path probed on the task, when the check is HTTP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_path: Option<String>,

    /// Shell command run inside the task, when the check is a command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Seconds between probes.
    pub interval_secs: f64,
}

/// The immutable user-supplied half of a task.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Unique task name; the registry key.
    pub name: String,

    /// Requested cpu/mem/disk.
    pub resources: ResourceQuota,

    /// Shell command, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Container image, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Environment passed to the executor.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    /// Health probe, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,

    /// Free-form labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// User-declared placement filters, kept on the record so recovery can
    /// re-register them.
    #[serde(default)]
    pub filters: Vec<Filter>,
}

/// A registered task: spec, runtime identity, and lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Immutable spec.
    pub spec: TaskSpec,

    /// Identity minted at launch; fresh per launch from staging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,

    /// Agent assigned at dispatch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,

    /// Executor that owns the task, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_id: Option<ExecutorId>,

    /// Current lifecycle state.
    pub state: TaskState,

    /// When the record was created.
    pub created_at: DateTime<Utc>,

    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a fresh record in state `Unknown`.
    #[must_use]
    pub fn new(spec: TaskSpec) -> Self {
        let now = Utc::now();
        Self {
            spec,
            task_id: None,
            agent_id: None,
            executor_id: None,
            state: TaskState::Unknown,
            created_at: now,
            updated_at: now,
        }
    }

    /// The registry key.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Clear runtime identity and return to the staging queue.
    pub fn requeue(&mut self) {
        self.task_id = None;
        self.agent_id = None;
        self.executor_id = None;
        self.state = TaskState::Staging;
    }

    /// Serialize for storage. Stable JSON; round-trips with equality.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize a stored record.
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Build the wire launch payload. Requires a minted task-id and an
    /// assigned agent.
    #[must_use]
    pub fn launch_info(&self, task_id: &TaskId, agent_id: &AgentId) -> TaskInfo {
        TaskInfo {
            name: self.spec.name.clone(),
            task_id: task_id.clone(),
            agent_id: agent_id.clone(),
            command: self.spec.command.clone(),
            image: self.spec.image.clone(),
            environment: self.spec.environment.clone(),
            resources: self.spec.resources.to_resources(),
        }
    }
}
