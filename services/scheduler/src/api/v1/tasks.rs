//! Task endpoints: deploy, update, kill, status, stats.

use std::time::Duration;

use axum::{
    extract::{Query, State},
    routing::{get, post, put},
    Json, Router,
};
use bosun_events::{ResourceQuota, TaskState};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::warn;

use crate::api::AppState;
use crate::controller::Intent;
use crate::handlers::KillOutcome;
use crate::resource::filter::{Filter, FilterSpec};
use crate::task::{HealthCheck, Task, TaskSpec};

/// How long an API request waits on the event loop before giving up.
const INTENT_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Create task routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/deploy", post(deploy))
        .route("/update", put(update))
        .route("/kill", post(kill))
        .route("/status", get(status))
        .route("/stats", get(stats))
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Task specification submitted on deploy and update.
#[derive(Debug, Deserialize)]
pub struct DeployRequest {
    /// Unique task name.
    pub name: String,

    /// Requested cpu/mem/disk.
    #[serde(default)]
    pub resources: ResourceQuota,

    /// Shell command, if any.
    #[serde(default)]
    pub command: Option<String>,

    /// Container image, if any.
    #[serde(default)]
    pub image: Option<String>,

    /// Environment passed to the executor.
    #[serde(default)]
    pub environment: std::collections::BTreeMap<String, String>,

    /// Health probe, if any.
    #[serde(default)]
    pub health_check: Option<HealthCheck>,

    /// Free-form labels.
    #[serde(default)]
    pub labels: std::collections::BTreeMap<String, String>,

    /// Placement filters, validated before anything is registered.
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
}

/// Kill request body.
#[derive(Debug, Deserialize)]
pub struct KillRequest {
    pub name: String,
}

/// Name query for status and stats.
#[derive(Debug, Deserialize)]
pub struct NameQuery {
    pub name: String,
}

/// Response status vocabulary, fixed by the API contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiStatus {
    #[serde(rename = "QUEUED")]
    Queued,
    #[serde(rename = "LAUNCHED")]
    Launched,
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "KILLED")]
    Killed,
    #[serde(rename = "NOTFOUND")]
    NotFound,
    #[serde(rename = "FAILED")]
    Failed,
}

/// Uniform task-endpoint response.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResponse {
    pub status: ApiStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TaskResponse {
    fn ok(status: ApiStatus, task_name: &str) -> Self {
        Self {
            status,
            task_name: Some(task_name.to_string()),
            message: None,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            status: ApiStatus::Failed,
            task_name: None,
            message: Some(message.into()),
        }
    }
}

// =============================================================================
// Handlers
// =============================================================================

fn build_task(request: &DeployRequest, filters: Vec<Filter>) -> Task {
    Task::new(TaskSpec {
        name: request.name.clone(),
        resources: request.resources,
        command: request.command.clone(),
        image: request.image.clone(),
        environment: request.environment.clone(),
        health_check: request.health_check.clone(),
        labels: request.labels.clone(),
        filters,
    })
}

fn validate_filters(request: &DeployRequest) -> Result<Vec<Filter>, String> {
    request
        .filters
        .iter()
        .map(Filter::from_spec)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| err.to_string())
}

/// `POST /v1/api/deploy` — queue a new task.
async fn deploy(
    State(state): State<AppState>,
    Json(request): Json<DeployRequest>,
) -> Json<TaskResponse> {
    if request.name.is_empty() {
        return Json(TaskResponse::failed("task name is required"));
    }

    let filters = match validate_filters(&request) {
        Ok(filters) => filters,
        Err(message) => return Json(TaskResponse::failed(message)),
    };

    let task = build_task(&request, filters.clone());
    if let Err(err) = state.tasks().add(task.clone()).await {
        return Json(TaskResponse {
            status: ApiStatus::Failed,
            task_name: Some(request.name.clone()),
            message: Some(err.to_string()),
        });
    }

    state.resources().restore_filters(&request.name, filters);
    if let Err(err) = state.tasks().set(TaskState::Staging, &task).await {
        warn!(task = %request.name, error = %err, "Failed to stage deployed task");
    }

    if state
        .intents()
        .send(Intent::TaskQueued {
            name: request.name.clone(),
        })
        .await
        .is_err()
    {
        warn!(task = %request.name, "Event loop is gone; task staged but offers stay closed");
    }

    Json(TaskResponse::ok(ApiStatus::Queued, &request.name))
}

/// `PUT /v1/api/update` — stage a replacement and kill the old task.
async fn update(
    State(state): State<AppState>,
    Json(request): Json<DeployRequest>,
) -> Json<TaskResponse> {
    if state.tasks().get(&request.name).await.is_err() {
        return Json(TaskResponse::failed(format!(
            "no task named '{}' to update",
            request.name
        )));
    }

    let filters = match validate_filters(&request) {
        Ok(filters) => filters,
        Err(message) => return Json(TaskResponse::failed(message)),
    };

    let replacement = build_task(&request, filters);
    state.tasks().stage_replacement(&request.name, replacement);

    let (reply_tx, reply_rx) = oneshot::channel();
    let sent = state
        .intents()
        .send(Intent::Replace {
            name: request.name.clone(),
            reply: reply_tx,
        })
        .await;
    if sent.is_err() {
        return Json(TaskResponse::failed("scheduler is shutting down"));
    }

    match tokio::time::timeout(INTENT_REPLY_TIMEOUT, reply_rx).await {
        Ok(Ok(Ok(()))) => Json(TaskResponse {
            status: ApiStatus::Update,
            task_name: Some(request.name.clone()),
            message: Some(format!("updating {}", request.name)),
        }),
        Ok(Ok(Err(message))) => Json(TaskResponse::failed(message)),
        Ok(Err(_)) | Err(_) => Json(TaskResponse::failed("event loop did not answer")),
    }
}

/// `POST /v1/api/kill` — kill and remove a task.
async fn kill(
    State(state): State<AppState>,
    Json(request): Json<KillRequest>,
) -> Json<TaskResponse> {
    if state.tasks().get(&request.name).await.is_err() {
        return Json(TaskResponse::ok(ApiStatus::NotFound, &request.name));
    }

    let (reply_tx, reply_rx) = oneshot::channel();
    let sent = state
        .intents()
        .send(Intent::Kill {
            name: request.name.clone(),
            reply: reply_tx,
        })
        .await;
    if sent.is_err() {
        return Json(TaskResponse::failed("scheduler is shutting down"));
    }

    match tokio::time::timeout(INTENT_REPLY_TIMEOUT, reply_rx).await {
        Ok(Ok(KillOutcome::Killed)) => Json(TaskResponse::ok(ApiStatus::Killed, &request.name)),
        Ok(Ok(KillOutcome::NotFound)) => Json(TaskResponse::ok(ApiStatus::NotFound, &request.name)),
        Ok(Ok(KillOutcome::Failed(message))) => Json(TaskResponse {
            status: ApiStatus::Failed,
            task_name: Some(request.name.clone()),
            message: Some(message),
        }),
        Ok(Err(_)) | Err(_) => Json(TaskResponse::failed("event loop did not answer")),
    }
}

/// `GET /v1/api/status?name=…` — queued or launched.
async fn status(
    State(state): State<AppState>,
    Query(query): Query<NameQuery>,
) -> Json<TaskResponse> {
    match state.tasks().get(&query.name).await {
        Ok(task) => {
            let status = match task.state {
                TaskState::Unknown | TaskState::Staging => ApiStatus::Queued,
                _ => ApiStatus::Launched,
            };
            Json(TaskResponse::ok(status, &query.name))
        }
        Err(err) => Json(TaskResponse::failed(err.to_string())),
    }
}

/// `GET /v1/api/stats?name=…` — human-readable diagnostics.
async fn stats(State(state): State<AppState>, Query(query): Query<NameQuery>) -> String {
    let task = match state.tasks().get(&query.name).await {
        Ok(task) => task,
        Err(err) => return format!("task not found: {err}\n"),
    };

    let filters = state.resources().filters_for(&query.name);
    let mut out = String::new();
    out.push_str(&format!("name: {}\n", task.name()));
    out.push_str(&format!("state: {}\n", task.state));
    out.push_str(&format!(
        "task_id: {}\n",
        task.task_id.as_ref().map(|id| id.as_str()).unwrap_or("-")
    ));
    out.push_str(&format!(
        "agent_id: {}\n",
        task.agent_id.as_ref().map(|id| id.as_str()).unwrap_or("-")
    ));
    out.push_str(&format!(
        "resources: cpu={} mem={} disk={}\n",
        task.spec.resources.cpu, task.spec.resources.mem, task.spec.resources.disk
    ));
    out.push_str(&format!("filters: {}\n", filters.len()));
    out.push_str(&format!(
        "replacement_pending: {}\n",
        state.tasks().has_replacement(&query.name)
    ));
    out.push_str(&format!(
        "offers_pooled: {}\n",
        state.resources().offers().len()
    ));
    out
}
