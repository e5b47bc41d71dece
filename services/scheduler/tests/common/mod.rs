//! Shared harness for integration tests: a real controller over a mock
//! master and in-memory storage.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use bosun_events::{Event, Offer, Resource, ResourceQuota, TaskState, TaskStatus};
use bosun_id::TaskId;
use bosun_scheduler::config::{Config, PersistenceConfig};
use bosun_scheduler::controller::{ControllerError, EventController, Intent};
use bosun_scheduler::master::MockMaster;
use bosun_scheduler::resource::ResourceManager;
use bosun_scheduler::storage::{MemoryStore, Storage};
use bosun_scheduler::task::{Task, TaskManager, TaskSpec};

pub struct Harness {
    pub tasks: Arc<TaskManager>,
    pub resources: Arc<ResourceManager>,
    pub master: Arc<MockMaster>,
    pub intents: mpsc::Sender<Intent>,
    events: Option<mpsc::Sender<Event>>,
    shutdown: watch::Sender<bool>,
    controller: JoinHandle<Result<(), ControllerError>>,
}

impl Harness {
    pub async fn start() -> Self {
        Self::start_with(Arc::new(MemoryStore::new()), Config::for_tests()).await
    }

    pub async fn start_with(storage: Arc<dyn Storage>, config: Config) -> Self {
        let master = Arc::new(MockMaster::new());
        let events = master.push_stream();

        let tasks = Arc::new(TaskManager::new(
            storage.clone(),
            PersistenceConfig {
                retry_interval: Duration::from_millis(10),
                max_retries: 3,
            },
        ));
        let resources = Arc::new(ResourceManager::new());
        let (intents_tx, intents_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let controller = EventController::new(
            config,
            master.clone(),
            tasks.clone(),
            resources.clone(),
            storage,
            intents_rx,
            shutdown_rx,
        );
        let handle = tokio::spawn(controller.run());

        Self {
            tasks,
            resources,
            master,
            intents: intents_tx,
            events: Some(events),
            shutdown: shutdown_tx,
            controller: handle,
        }
    }

    /// Drop the live event stream, simulating transport loss.
    pub fn close_stream(&mut self) {
        self.events = None;
    }

    /// Point the harness at a replacement stream's sender.
    pub fn use_stream(&mut self, events: mpsc::Sender<Event>) {
        self.events = Some(events);
    }

    /// Complete the subscription handshake and wait for the revive that
    /// ends subscribed-event handling.
    pub async fn subscribe(&self, framework_id: &str) {
        self.send(Event::Subscribed {
            framework_id: framework_id.parse().unwrap(),
            heartbeat_interval_secs: None,
        })
        .await;

        let master = self.master.clone();
        assert!(
            eventually(|| {
                let master = master.clone();
                async move {
                    master.saw(|call| {
                        matches!(call, bosun_scheduler::master::RecordedCall::Revive)
                    })
                }
            })
            .await,
            "controller never finished subscription handling"
        );
    }

    /// What the deploy endpoint does: register, stage, poke the loop.
    pub async fn deploy(&self, name: &str, cpu: f64, mem: f64) {
        let task = Task::new(TaskSpec {
            name: name.to_string(),
            resources: ResourceQuota::new(cpu, mem, 0.0),
            command: Some("./run".to_string()),
            ..TaskSpec::default()
        });
        self.tasks.add(task.clone()).await.unwrap();
        self.tasks.set(TaskState::Staging, &task).await.unwrap();
        self.intents
            .send(Intent::TaskQueued {
                name: name.to_string(),
            })
            .await
            .unwrap();
    }

    pub async fn send(&self, event: Event) {
        self.events
            .as_ref()
            .expect("event stream was closed")
            .send(event)
            .await
            .unwrap();
    }

    /// Signal shutdown and collect the controller's verdict.
    pub async fn stop(self) -> Result<(), ControllerError> {
        let _ = self.shutdown.send(true);
        self.controller.await.unwrap()
    }

    /// Wait for the controller task to end on its own (fatal paths).
    pub async fn join(self) -> Result<(), ControllerError> {
        self.controller.await.unwrap()
    }
}

/// Poll an async condition until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn offer(id: &str, agent: &str, hostname: &str, cpu: f64, mem: f64) -> Offer {
    Offer {
        id: id.parse().unwrap(),
        agent_id: agent.parse().unwrap(),
        hostname: hostname.to_string(),
        attributes: BTreeMap::new(),
        resources: vec![
            Resource::scalar("cpus", cpu),
            Resource::scalar("mem", mem),
        ],
    }
}

pub fn offers(list: Vec<Offer>) -> Event {
    Event::Offers { offers: list }
}

pub fn update(task_id: &TaskId, state: TaskState, agent: &str, uuid: &str) -> Event {
    Event::Update {
        status: TaskStatus {
            task_id: task_id.clone(),
            state,
            message: None,
            agent_id: Some(agent.parse().unwrap()),
            executor_id: None,
            uuid: if uuid.is_empty() {
                None
            } else {
                Some(uuid.to_string())
            },
        },
    }
}
