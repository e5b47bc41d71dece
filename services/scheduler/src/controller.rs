//! The event controller: the scheduler's single consumer of master events
//! and control-API intents.
//!
//! One task owns the loop. It multiplexes the subscription stream, the
//! intent channel, the heartbeat deadline, and the shutdown signal; every
//! mutation of the task and resource managers triggered by master traffic
//! happens here, so per-task update ordering falls out of the loop itself.
//!
//! Subscription moves `Disconnected → Subscribing → Subscribed` and back on
//! transport loss. The stored framework identity is read before the first
//! subscribe, attached when present, persisted on the first `Subscribed`,
//! and never mutated on transport errors.

use std::sync::Arc;
use std::time::Duration;

use bosun_events::{Event, FrameworkInfo};
use bosun_id::FrameworkId;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::handlers::{Handlers, KillOutcome};
use crate::master::MasterCaller;
use crate::resource::ResourceManager;
use crate::storage::{Storage, StorageError, FRAMEWORK_ID_KEY};
use crate::task::TaskManager;

/// Fallback keep-alive period until the master announces its own.
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Grace given to in-flight calls during shutdown.
const SHUTDOWN_CALL_DEADLINE: Duration = Duration::from_secs(3);

/// A control-API request routed through the event loop.
///
/// Scheduler calls never run on API worker threads; intents carry a reply
/// channel where the HTTP response depends on the outcome.
#[derive(Debug)]
pub enum Intent {
    /// A task entered the staging queue; reopen offers.
    TaskQueued { name: String },

    /// Kill and remove a task.
    Kill {
        name: String,
        reply: oneshot::Sender<KillOutcome>,
    },

    /// Kill the old incarnation of a task whose replacement is staged.
    Replace {
        name: String,
        reply: oneshot::Sender<Result<(), String>>,
    },
}

/// Fatal controller outcomes.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The master declared the subscription unrecoverable.
    #[error("master error: {0}")]
    Master(String),

    /// Storage failed while loading state at startup.
    #[error("storage error at startup: {0}")]
    Startup(#[from] StorageError),
}

/// Subscription state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubscriptionState {
    Disconnected,
    Subscribing,
    Subscribed,
}

/// Exponential backoff between subscribe attempts.
#[derive(Debug, Clone)]
struct BackoffPolicy {
    base: Duration,
    max: Duration,
    jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
            jitter: 0.25,
        }
    }
}

impl BackoffPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        let delay = self.base.as_millis() as f64 * 2.0_f64.powi(attempt.min(16) as i32);
        let delay = delay.min(self.max.as_millis() as f64);
        let jitter = rand_jitter(delay * self.jitter);
        Duration::from_millis((delay + jitter).max(0.0) as u64)
    }
}

/// Cheap jitter without a randomness dependency.
fn rand_jitter(range: f64) -> f64 {
    use std::time::SystemTime;
    let seed = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let random = seed.wrapping_mul(6364136223846793005).wrapping_add(1) as f64;
    let normalized = (random / u64::MAX as f64) * 2.0 - 1.0;
    normalized * range
}

/// The long-running driver.
pub struct EventController {
    config: Config,
    caller: Arc<dyn MasterCaller>,
    tasks: Arc<TaskManager>,
    resources: Arc<ResourceManager>,
    storage: Arc<dyn Storage>,
    handlers: Handlers,
    intents: mpsc::Receiver<Intent>,
    intents_open: bool,
    shutdown: watch::Receiver<bool>,
    state: SubscriptionState,
    framework_id: Option<FrameworkId>,
    heartbeat_interval: Duration,
    backoff: BackoffPolicy,
}

impl EventController {
    pub fn new(
        config: Config,
        caller: Arc<dyn MasterCaller>,
        tasks: Arc<TaskManager>,
        resources: Arc<ResourceManager>,
        storage: Arc<dyn Storage>,
        intents: mpsc::Receiver<Intent>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let handlers = Handlers::new(
            tasks.clone(),
            resources.clone(),
            caller.clone(),
            storage.clone(),
        );
        Self {
            config,
            caller,
            tasks,
            resources,
            storage,
            handlers,
            intents,
            intents_open: true,
            shutdown,
            state: SubscriptionState::Disconnected,
            framework_id: None,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            backoff: BackoffPolicy::default(),
        }
    }

    /// The registry, for control-API reads.
    pub fn task_manager(&self) -> Arc<TaskManager> {
        self.tasks.clone()
    }

    /// The offer pool, for control-API reads.
    pub fn resource_manager(&self) -> Arc<ResourceManager> {
        self.resources.clone()
    }

    /// The master caller.
    pub fn scheduler(&self) -> Arc<dyn MasterCaller> {
        self.caller.clone()
    }

    /// Run until shutdown is signalled or the master declares us dead.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        self.load_framework_id().await?;

        let recovered = self.tasks.recover().await?;
        for task in &recovered {
            self.resources
                .restore_filters(task.name(), task.spec.filters.clone());
        }

        let result = self.event_loop().await;
        self.drain_and_teardown().await;
        result
    }

    async fn event_loop(&mut self) -> Result<(), ControllerError> {
        'session: loop {
            if *self.shutdown.borrow() {
                return Ok(());
            }

            self.state = SubscriptionState::Subscribing;
            let Some(mut events) = self.subscribe_with_backoff().await else {
                return Ok(());
            };

            let mut deadline = Instant::now() + 2 * self.heartbeat_interval;
            loop {
                tokio::select! {
                    biased;

                    _ = self.shutdown.changed() => {
                        if *self.shutdown.borrow() {
                            info!("Event controller received shutdown signal");
                            return Ok(());
                        }
                    }

                    maybe_event = events.recv() => {
                        match maybe_event {
                            Some(event) => {
                                self.handle_event(event).await?;
                                deadline = Instant::now() + 2 * self.heartbeat_interval;
                            }
                            None => {
                                warn!("Subscription stream closed; resubscribing");
                                break;
                            }
                        }
                    }

                    maybe_intent = self.intents.recv(), if self.intents_open => {
                        match maybe_intent {
                            Some(intent) => self.handle_intent(intent).await,
                            None => {
                                debug!("Intent channel closed");
                                self.intents_open = false;
                            }
                        }
                    }

                    _ = tokio::time::sleep_until(deadline),
                        if self.state == SubscriptionState::Subscribed => {
                        warn!(
                            interval_secs = self.heartbeat_interval.as_secs_f64(),
                            "Missed two heartbeats; resubscribing"
                        );
                        break;
                    }
                }
            }

            // Connection lost: offers tied to it are worthless.
            self.state = SubscriptionState::Disconnected;
            let dropped = self.resources.drain_unused();
            if !dropped.is_empty() {
                debug!(count = dropped.len(), "Discarded offers from dead subscription");
            }
            continue 'session;
        }
    }

    async fn handle_event(&mut self, event: Event) -> Result<(), ControllerError> {
        match event {
            Event::Subscribed {
                framework_id,
                heartbeat_interval_secs,
            } => {
                self.state = SubscriptionState::Subscribed;
                if let Some(secs) = heartbeat_interval_secs {
                    if secs > 0.0 {
                        self.heartbeat_interval = Duration::from_secs_f64(secs);
                    }
                }
                self.handlers
                    .subscribed(&mut self.framework_id, framework_id)
                    .await;
            }
            Event::Offers { offers } => self.handlers.offers(offers).await,
            Event::Rescind { offer_id } => self.handlers.rescind(offer_id).await,
            Event::Update { status } => self.handlers.update(status).await,
            Event::Failure {
                agent_id,
                executor_id,
                status,
            } => self.handlers.failure(agent_id, executor_id, status).await,
            Event::Message {
                agent_id,
                executor_id,
                data,
            } => self.handlers.message(agent_id, executor_id, data).await,
            Event::Error { message } => {
                error!(message = %message, "Master reported unrecoverable error");
                return Err(ControllerError::Master(message));
            }
            Event::Heartbeat => {
                debug!("Heartbeat");
            }
            Event::InverseOffers { offer_ids } => self.handlers.inverse_offers(offer_ids).await,
            Event::RescindInverseOffer { offer_id } => {
                self.handlers.rescind_inverse_offer(offer_id).await
            }
        }
        Ok(())
    }

    async fn handle_intent(&mut self, intent: Intent) {
        match intent {
            Intent::TaskQueued { name } => self.handlers.task_queued(&name).await,
            Intent::Kill { name, reply } => {
                let outcome = self.handlers.kill_task(&name).await;
                let _ = reply.send(outcome);
            }
            Intent::Replace { name, reply } => {
                let result = self.handlers.replace_task(&name).await;
                let _ = reply.send(result);
            }
        }
    }

    /// Subscribe, backing off exponentially on failure. Returns `None` when
    /// shutdown arrives first.
    async fn subscribe_with_backoff(&mut self) -> Option<mpsc::Receiver<Event>> {
        let mut attempt = 0u32;
        loop {
            if *self.shutdown.borrow() {
                return None;
            }

            let framework = self.framework_info();
            info!(
                attempt,
                failover = framework.framework_id.is_some(),
                "Subscribing to master"
            );
            match self.caller.subscribe(&framework).await {
                Ok(events) => return Some(events),
                Err(err) => {
                    let delay = self.backoff.delay(attempt);
                    warn!(
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "Subscribe failed; backing off"
                    );
                    attempt += 1;
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.shutdown.changed() => {
                            if *self.shutdown.borrow() {
                                return None;
                            }
                        }
                    }
                }
            }
        }
    }

    fn framework_info(&self) -> FrameworkInfo {
        FrameworkInfo {
            user: self.config.framework_user.clone(),
            name: self.config.framework_name.clone(),
            framework_id: self.framework_id.clone(),
            failover_timeout_secs: self.config.failover_timeout_secs,
            checkpoint: self.config.checkpointing,
            role: self.config.role.clone(),
            hostname: self.config.hostname.clone(),
            principal: self.config.principal.clone(),
        }
    }

    async fn load_framework_id(&mut self) -> Result<(), StorageError> {
        self.framework_id = match self.storage.read(FRAMEWORK_ID_KEY).await? {
            Some(raw) => match FrameworkId::parse(&raw) {
                Ok(id) => {
                    info!(framework_id = %id, "Loaded stored framework identity");
                    Some(id)
                }
                Err(err) => {
                    warn!(error = %err, "Stored framework identity is unusable; subscribing fresh");
                    None
                }
            },
            None => None,
        };
        Ok(())
    }

    /// Answer any queued intents, optionally tear the framework down, and
    /// leave tasks in storage for a later failover.
    async fn drain_and_teardown(&mut self) {
        while let Ok(intent) = self.intents.try_recv() {
            match intent {
                Intent::TaskQueued { .. } => {}
                Intent::Kill { reply, .. } => {
                    let _ = reply.send(KillOutcome::Failed("scheduler shutting down".to_string()));
                }
                Intent::Replace { reply, .. } => {
                    let _ = reply.send(Err("scheduler shutting down".to_string()));
                }
            }
        }

        let _ = self.resources.drain_unused();

        if self.config.teardown_on_shutdown {
            info!("Tearing down framework");
            match tokio::time::timeout(SHUTDOWN_CALL_DEADLINE, self.caller.teardown()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(error = %err, "Teardown call failed"),
                Err(_) => warn!("Teardown call timed out"),
            }
        }

        info!("Event controller stopped");
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(100),
            max: Duration::from_secs(5),
            jitter: 0.0,
        };

        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(800));
        assert_eq!(policy.delay(30), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_bounded() {
        for _ in 0..32 {
            let j = rand_jitter(100.0);
            assert!((-100.0..=100.0).contains(&j));
        }
    }
}
