//! Per-event handlers.
//!
//! One method per master event type, plus the intent operations the control
//! API routes through the event loop (kill, replace). Each method is a
//! function of the event and the injected managers; nothing here blocks on
//! I/O other than scheduler calls and storage write-through. All methods
//! run on the controller task.

use std::collections::BTreeMap;
use std::sync::Arc;

use bosun_events::{Offer, OfferFilters, OfferOperation, TaskInfo, TaskState, TaskStatus};
use bosun_id::{AgentId, ExecutorId, OfferId, TaskId};
use tracing::{debug, info, warn};

use crate::master::MasterCaller;
use crate::resource::ResourceManager;
use crate::storage::{Storage, FRAMEWORK_ID_KEY};
use crate::task::{Task, TaskManager};

/// Outcome of a kill intent, mapped onto the API response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KillOutcome {
    /// The task is gone (or the master never knew it).
    Killed,
    /// No task registered under the name.
    NotFound,
    /// The master refused or the transport failed.
    Failed(String),
}

/// Event glue: owns nothing but handles everything.
pub struct Handlers {
    tasks: Arc<TaskManager>,
    resources: Arc<ResourceManager>,
    caller: Arc<dyn MasterCaller>,
    storage: Arc<dyn Storage>,
}

impl Handlers {
    pub fn new(
        tasks: Arc<TaskManager>,
        resources: Arc<ResourceManager>,
        caller: Arc<dyn MasterCaller>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            tasks,
            resources,
            caller,
            storage,
        }
    }

    /// Subscription acknowledged: persist the framework identity the first
    /// time we see one, reconcile every launched task, and reopen offers.
    pub async fn subscribed(
        &self,
        stored: &mut Option<bosun_id::FrameworkId>,
        assigned: bosun_id::FrameworkId,
    ) {
        match stored {
            None => {
                info!(framework_id = %assigned, "Subscribed; persisting framework identity");
                if let Err(err) = self
                    .storage
                    .create(FRAMEWORK_ID_KEY, assigned.as_str())
                    .await
                {
                    warn!(error = %err, "Failed to persist framework identity");
                }
                *stored = Some(assigned);
            }
            Some(existing) if *existing != assigned => {
                // The stored identity is the failover token; keep it.
                warn!(
                    stored = %existing,
                    assigned = %assigned,
                    "Master assigned a different framework identity than the stored one"
                );
            }
            Some(_) => {
                info!(framework_id = %assigned, "Resubscribed with stored framework identity");
            }
        }

        let launched: Vec<_> = self
            .tasks
            .tasks()
            .await
            .into_iter()
            .filter(|task| !task.state.is_terminal())
            .filter_map(|task| {
                task.task_id.map(|task_id| bosun_events::ReconcileTask {
                    task_id,
                    agent_id: task.agent_id,
                })
            })
            .collect();

        if !launched.is_empty() {
            debug!(count = launched.len(), "Reconciling launched tasks");
            if let Err(err) = self.caller.reconcile(&launched).await {
                warn!(error = %err, "Reconcile call failed");
            }
        }

        if let Err(err) = self.caller.revive().await {
            warn!(error = %err, "Revive call failed");
        }
    }

    /// New offers: pool them, place staged tasks, accept the launches, and
    /// decline the rest.
    ///
    /// When the round places nothing, there is no staged work the current
    /// supply can satisfy, so offers are declined with the long refusal and
    /// suppressed until an intent revives them.
    pub async fn offers(&self, offers: Vec<Offer>) {
        debug!(count = offers.len(), "Received offers");
        self.resources.add_offers(offers);

        let staged = self
            .tasks
            .get_state(TaskState::Staging)
            .await
            .unwrap_or_default();

        // Launches batched per offer; a shared offer gets one accept call.
        let mut batches: BTreeMap<OfferId, (AgentId, Vec<TaskInfo>)> = BTreeMap::new();

        for mut task in staged {
            if task.task_id.is_some() {
                // Already dispatched; waiting on the master's update.
                continue;
            }

            let offer = match self.resources.assign(&task) {
                Ok(offer) => offer,
                Err(err) => {
                    debug!(task = %task.name(), error = %err, "No offer for task this round");
                    continue;
                }
            };

            let task_id = TaskId::generate(task.name());
            let info = task.launch_info(&task_id, &offer.agent_id);

            task.task_id = Some(task_id);
            task.agent_id = Some(offer.agent_id.clone());
            if let Err(err) = self.tasks.set(TaskState::Staging, &task).await {
                warn!(task = %task.name(), error = %err, "Failed to record dispatch");
                continue;
            }

            batches
                .entry(offer.id.clone())
                .or_insert_with(|| (offer.agent_id.clone(), Vec::new()))
                .1
                .push(info);
        }

        let launched_any = !batches.is_empty();
        for (offer_id, (agent_id, infos)) in batches {
            info!(
                offer = %offer_id,
                agent = %agent_id,
                tasks = infos.len(),
                "Accepting offer"
            );
            let operations = vec![OfferOperation::Launch { tasks: infos }];
            if let Err(err) = self
                .caller
                .accept(&[offer_id.clone()], &operations, &OfferFilters::short())
                .await
            {
                warn!(offer = %offer_id, error = %err, "Accept call failed");
            }
        }

        let unused = self.resources.drain_unused();
        if launched_any {
            if !unused.is_empty() {
                if let Err(err) = self.caller.decline(&unused, &OfferFilters::short()).await {
                    warn!(error = %err, "Decline call failed");
                }
            }
        } else {
            if !unused.is_empty() {
                if let Err(err) = self.caller.decline(&unused, &OfferFilters::long()).await {
                    warn!(error = %err, "Decline call failed");
                }
            }
            debug!("Nothing placeable; suppressing offers");
            if let Err(err) = self.caller.suppress().await {
                warn!(error = %err, "Suppress call failed");
            }
        }
    }

    /// An offer is gone; make sure no later plan can touch it.
    pub async fn rescind(&self, offer_id: OfferId) {
        let was_pooled = self.resources.rescind(&offer_id);
        debug!(offer = %offer_id, was_pooled, "Offer rescinded");
    }

    /// Status update: move the named task, then acknowledge.
    pub async fn update(&self, status: TaskStatus) {
        let task = match self.tasks.get_by_id(&status.task_id).await {
            Ok(task) => Some(task),
            Err(_) => {
                // Stale id from before a relaunch, or a task we already
                // removed. Nothing to move; still acknowledge below.
                debug!(task_id = %status.task_id, state = %status.state, "Update for unknown task dropped");
                None
            }
        };

        if let Some(mut task) = task {
            info!(task = %task.name(), state = %status.state, "Task status update");

            if let Some(agent_id) = &status.agent_id {
                task.agent_id = Some(agent_id.clone());
            }
            if let Some(executor_id) = &status.executor_id {
                task.executor_id = Some(executor_id.clone());
            }

            match status.state {
                TaskState::Finished | TaskState::Killed => {
                    if let Err(err) = self.tasks.set(status.state, &task).await {
                        warn!(task = %task.name(), error = %err, "Failed to apply terminal state");
                    }
                    self.resources.remove_filters(task.name());
                    self.admit_replacement(task.name()).await;
                }
                TaskState::Failed | TaskState::Error => {
                    // `set` persists the terminal report, then the record
                    // leaves registry and storage.
                    if let Err(err) = self.tasks.set(status.state, &task).await {
                        warn!(task = %task.name(), error = %err, "Failed to apply terminal state");
                    }
                    if let Err(err) = self.tasks.delete(&task).await {
                        warn!(task = %task.name(), error = %err, "Failed to remove failed task");
                    }
                    self.resources.remove_filters(task.name());
                    self.admit_replacement(task.name()).await;
                }
                TaskState::Lost => {
                    self.requeue(task).await;
                }
                state => {
                    if let Err(err) = self.tasks.set(state, &task).await {
                        warn!(task = %task.name(), error = %err, "Failed to apply state");
                    }
                }
            }
        }

        match &status.uuid {
            Some(uuid) if !uuid.is_empty() => {
                let Some(agent_id) = &status.agent_id else {
                    warn!(task_id = %status.task_id, "Update carries an ack token but no agent; cannot acknowledge");
                    return;
                };
                if let Err(err) = self
                    .caller
                    .acknowledge(agent_id, &status.task_id, uuid)
                    .await
                {
                    warn!(error = %err, "Acknowledge call failed");
                }
            }
            _ => {}
        }
    }

    /// Executor or agent failure: everything that was running there is
    /// lost and goes back to the staging queue.
    pub async fn failure(
        &self,
        agent_id: Option<AgentId>,
        executor_id: Option<ExecutorId>,
        status: Option<i32>,
    ) {
        let affected: Vec<Task> = match (&executor_id, &agent_id) {
            (Some(executor_id), _) => {
                info!(executor = %executor_id, status = ?status, "Executor terminated");
                self.tasks
                    .tasks()
                    .await
                    .into_iter()
                    .filter(|task| task.executor_id.as_ref() == Some(executor_id))
                    .collect()
            }
            (None, Some(agent_id)) => {
                info!(agent = %agent_id, "Agent terminated");
                self.tasks
                    .tasks()
                    .await
                    .into_iter()
                    .filter(|task| task.agent_id.as_ref() == Some(agent_id))
                    .collect()
            }
            (None, None) => {
                debug!("Failure event with no agent or executor");
                return;
            }
        };

        for task in affected {
            self.requeue(task).await;
        }
    }

    /// Opaque executor bytes; logged only.
    pub async fn message(&self, agent_id: AgentId, executor_id: ExecutorId, data: Vec<u8>) {
        info!(
            agent = %agent_id,
            executor = %executor_id,
            bytes = data.len(),
            "Executor message"
        );
    }

    /// Maintenance drain; acknowledged, never acted upon.
    pub async fn inverse_offers(&self, offer_ids: Vec<OfferId>) {
        debug!(count = offer_ids.len(), "Ignoring inverse offers");
    }

    /// A drain request went away; nothing to undo.
    pub async fn rescind_inverse_offer(&self, offer_id: OfferId) {
        debug!(offer = %offer_id, "Ignoring rescinded inverse offer");
    }

    // =========================================================================
    // Intent operations
    // =========================================================================

    /// Kill a task on behalf of the control API.
    ///
    /// One kill call; a master that no longer knows the task counts as
    /// success. Tasks that never launched are simply removed.
    pub async fn kill_task(&self, name: &str) -> KillOutcome {
        let task = match self.tasks.get(name).await {
            Ok(task) => task,
            Err(_) => return KillOutcome::NotFound,
        };

        if let Some(task_id) = &task.task_id {
            match self.caller.kill(task_id, task.agent_id.as_ref()).await {
                Ok(()) => {}
                Err(err) if err.is_unknown_subject() => {
                    debug!(task = %name, "Master does not know the task; treating kill as done");
                }
                Err(err) => {
                    warn!(task = %name, error = %err, "Kill call failed");
                    return KillOutcome::Failed(err.to_string());
                }
            }
        }

        if let Err(err) = self.tasks.delete(&task).await {
            warn!(task = %name, error = %err, "Failed to remove killed task");
        }
        self.resources.remove_filters(name);
        if self.tasks.take_replacement(name).is_some() {
            debug!(task = %name, "Dropped staged replacement of explicitly killed task");
        }
        KillOutcome::Killed
    }

    /// Kill the old incarnation of a task whose replacement is staged.
    ///
    /// If the old task never launched, or the master no longer knows it,
    /// the replacement is admitted immediately; otherwise admission waits
    /// for the old task-id's terminal update.
    pub async fn replace_task(&self, name: &str) -> Result<(), String> {
        let old = match self.tasks.get(name).await {
            Ok(task) => task,
            Err(_) => {
                // Old record already gone; nothing to wait for.
                self.admit_replacement(name).await;
                return Ok(());
            }
        };

        let Some(task_id) = &old.task_id else {
            if let Err(err) = self.tasks.delete(&old).await {
                warn!(task = %name, error = %err, "Failed to remove staged task");
            }
            self.resources.remove_filters(name);
            self.admit_replacement(name).await;
            return Ok(());
        };

        match self.caller.kill(task_id, old.agent_id.as_ref()).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_unknown_subject() => {
                if let Err(err) = self.tasks.delete(&old).await {
                    warn!(task = %name, error = %err, "Failed to remove unknown task");
                }
                self.resources.remove_filters(name);
                self.admit_replacement(name).await;
                Ok(())
            }
            Err(err) => {
                warn!(task = %name, error = %err, "Kill for replacement failed");
                Err(err.to_string())
            }
        }
    }

    /// Poke offers back open after a deploy.
    pub async fn task_queued(&self, name: &str) {
        debug!(task = %name, "Task queued; reviving offers");
        if let Err(err) = self.caller.revive().await {
            warn!(error = %err, "Revive call failed");
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Mark a task lost, return it to the staging queue, and reopen offers.
    async fn requeue(&self, task: Task) {
        info!(task = %task.name(), "Task lost; re-queueing");
        if let Err(err) = self.tasks.set(TaskState::Lost, &task).await {
            warn!(task = %task.name(), error = %err, "Failed to mark task lost");
        }

        let mut requeued = task;
        requeued.requeue();
        if let Err(err) = self.tasks.set(TaskState::Staging, &requeued).await {
            warn!(task = %requeued.name(), error = %err, "Failed to re-queue task");
        }
        if let Err(err) = self.caller.revive().await {
            warn!(error = %err, "Revive call failed");
        }
    }

    /// Admit a staged replacement, if one waits under the name.
    async fn admit_replacement(&self, name: &str) {
        let Some(replacement) = self.tasks.take_replacement(name) else {
            return;
        };
        info!(task = %name, "Admitting staged replacement");

        self.resources
            .restore_filters(name, replacement.spec.filters.clone());
        if let Err(err) = self.tasks.add(replacement.clone()).await {
            warn!(task = %name, error = %err, "Failed to admit replacement");
            self.resources.remove_filters(name);
            return;
        }
        if let Err(err) = self.tasks.set(TaskState::Staging, &replacement).await {
            warn!(task = %name, error = %err, "Failed to stage replacement");
        }
        if let Err(err) = self.caller.revive().await {
            warn!(error = %err, "Revive call failed");
        }
    }
}
