//! The authoritative task registry.
//!
//! Every mutation is written through to storage as a full task record.
//! Storage outages are absorbed by a bounded retry policy: `add` surfaces
//! exhaustion to its caller (the deploy fails), while `set` and `delete`
//! keep the in-memory registry authoritative, log the give-up, and move on.
//! Per-task update ordering is provided by the event loop being the only
//! writer for launched tasks; the registry itself only guarantees that no
//! reader observes a half-applied record.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bosun_events::TaskState;
use bosun_id::TaskId;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::config::PersistenceConfig;
use crate::storage::{task_key, Storage, StorageError, TASKS_PREFIX};

use super::Task;

/// Errors from registry operations.
#[derive(Debug, Error)]
pub enum TaskManagerError {
    /// A task with this name is already registered.
    #[error("task '{0}' already exists")]
    Duplicate(String),

    /// No task with this name or id.
    #[error("task not found: {0}")]
    NotFound(String),

    /// No tasks currently in the requested state.
    #[error("no tasks in state {0}")]
    EmptySet(TaskState),

    /// The input was malformed (empty name, unencodable record).
    #[error("invalid task: {0}")]
    Invalid(String),

    /// Storage failed after all retries.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

struct TaskEntry {
    /// Insertion order; survives deletes so staging stays oldest-first.
    seq: u64,
    task: Task,
}

/// Concurrent-safe registry of tasks with write-through persistence.
pub struct TaskManager {
    tasks: RwLock<HashMap<String, TaskEntry>>,
    /// Replacements staged by the update endpoint, admitted once the old
    /// task reaches a terminal state.
    replacements: std::sync::Mutex<HashMap<String, Task>>,
    storage: Arc<dyn Storage>,
    retry: PersistenceConfig,
    next_seq: AtomicU64,
}

enum PersistOp<'a> {
    Put(&'a str, String),
    Delete(&'a str),
}

impl TaskManager {
    /// Create a registry backed by the given store.
    pub fn new(storage: Arc<dyn Storage>, retry: PersistenceConfig) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            replacements: std::sync::Mutex::new(HashMap::new()),
            storage,
            retry,
            next_seq: AtomicU64::new(0),
        }
    }

    /// Register a new task in state `Unknown` and persist it.
    ///
    /// Fails on duplicate names, empty names, and storage exhaustion; a
    /// task that could not be persisted is not kept in memory.
    pub async fn add(&self, mut task: Task) -> Result<(), TaskManagerError> {
        if task.name().is_empty() {
            return Err(TaskManagerError::Invalid("task name is empty".to_string()));
        }
        task.state = TaskState::Unknown;
        task.updated_at = Utc::now();

        let name = task.name().to_string();
        let encoded = task
            .encode()
            .map_err(|e| TaskManagerError::Invalid(e.to_string()))?;

        {
            let mut tasks = self.tasks.write().await;
            if tasks.contains_key(&name) {
                return Err(TaskManagerError::Duplicate(name));
            }
            let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
            tasks.insert(name.clone(), TaskEntry { seq, task });
        }

        let key = task_key(&name);
        if let Err(err) = self.persist(PersistOp::Put(&key, encoded)).await {
            // The deploy failed; back the registration out.
            self.tasks.write().await.remove(&name);
            return Err(err.into());
        }
        Ok(())
    }

    /// Look up a task by name.
    pub async fn get(&self, name: &str) -> Result<Task, TaskManagerError> {
        self.tasks
            .read()
            .await
            .get(name)
            .map(|entry| entry.task.clone())
            .ok_or_else(|| TaskManagerError::NotFound(name.to_string()))
    }

    /// Look up a task by its minted launch id.
    pub async fn get_by_id(&self, task_id: &TaskId) -> Result<Task, TaskManagerError> {
        self.tasks
            .read()
            .await
            .values()
            .find(|entry| entry.task.task_id.as_ref() == Some(task_id))
            .map(|entry| entry.task.clone())
            .ok_or_else(|| TaskManagerError::NotFound(task_id.to_string()))
    }

    /// True when a task with this record's name is registered.
    pub async fn has_task(&self, task: &Task) -> bool {
        self.tasks.read().await.contains_key(task.name())
    }

    /// Transition a task and persist the result.
    ///
    /// The passed record's runtime identity (task/agent/executor ids) is
    /// taken as current. `Finished` and `Killed` additionally remove the
    /// task from registry and storage.
    pub async fn set(&self, state: TaskState, task: &Task) -> Result<(), TaskManagerError> {
        let name = task.name().to_string();
        let key = task_key(&name);

        let removes = matches!(state, TaskState::Finished | TaskState::Killed);
        let encoded;
        {
            let mut tasks = self.tasks.write().await;
            let entry = tasks
                .get_mut(&name)
                .ok_or_else(|| TaskManagerError::NotFound(name.clone()))?;

            entry.task.state = state;
            entry.task.task_id = task.task_id.clone();
            entry.task.agent_id = task.agent_id.clone();
            entry.task.executor_id = task.executor_id.clone();
            entry.task.updated_at = Utc::now();

            if removes {
                tasks.remove(&name);
                encoded = None;
            } else {
                encoded = Some(
                    entry
                        .task
                        .encode()
                        .map_err(|e| TaskManagerError::Invalid(e.to_string()))?,
                );
            }
        }

        let op = match encoded {
            Some(record) => PersistOp::Put(&key, record),
            None => PersistOp::Delete(&key),
        };
        if let Err(err) = self.persist(op).await {
            // In-memory state stays authoritative; reconciliation against
            // a stale record is handled at recovery.
            error!(task = %name, state = %state, error = %err, "Giving up persisting state transition");
        }
        Ok(())
    }

    /// Remove a task from registry and storage.
    ///
    /// Removing an unregistered task is a no-op on the registry; the
    /// storage delete still runs so a stale record cannot survive.
    pub async fn delete(&self, task: &Task) -> Result<(), TaskManagerError> {
        let name = task.name().to_string();
        self.tasks.write().await.remove(&name);

        let key = task_key(&name);
        if let Err(err) = self.persist(PersistOp::Delete(&key)).await {
            error!(task = %name, error = %err, "Giving up deleting stored record");
        }
        Ok(())
    }

    /// All tasks currently in `state`, oldest registration first.
    pub async fn get_state(&self, state: TaskState) -> Result<Vec<Task>, TaskManagerError> {
        let tasks = self.tasks.read().await;
        let mut matching: Vec<_> = tasks
            .values()
            .filter(|entry| entry.task.state == state)
            .map(|entry| (entry.seq, entry.task.clone()))
            .collect();
        if matching.is_empty() {
            return Err(TaskManagerError::EmptySet(state));
        }
        matching.sort_by_key(|(seq, _)| *seq);
        Ok(matching.into_iter().map(|(_, task)| task).collect())
    }

    /// Number of registered tasks.
    pub async fn total_tasks(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// Snapshot of every registered task, oldest registration first.
    pub async fn tasks(&self) -> Vec<Task> {
        let tasks = self.tasks.read().await;
        let mut all: Vec<_> = tasks
            .values()
            .map(|entry| (entry.seq, entry.task.clone()))
            .collect();
        all.sort_by_key(|(seq, _)| *seq);
        all.into_iter().map(|(_, task)| task).collect()
    }

    /// Stage a replacement for a running task; admitted by the event loop
    /// once the old task-id reaches a terminal state.
    pub fn stage_replacement(&self, name: &str, task: Task) {
        self.replacements
            .lock()
            .unwrap()
            .insert(name.to_string(), task);
    }

    /// Claim a staged replacement, if one is waiting.
    pub fn take_replacement(&self, name: &str) -> Option<Task> {
        self.replacements.lock().unwrap().remove(name)
    }

    /// True when a replacement is staged for the name.
    pub fn has_replacement(&self, name: &str) -> bool {
        self.replacements.lock().unwrap().contains_key(name)
    }

    /// Load every decodable task record from storage.
    ///
    /// Corrupt records are skipped loudly and never block startup. `Lost`
    /// and `Unknown` records go straight back to the staging queue.
    /// Returns the recovered tasks so the caller can re-register filters.
    pub async fn recover(&self) -> Result<Vec<Task>, StorageError> {
        let records = self.storage.read_prefix(TASKS_PREFIX).await?;

        let mut recovered: Vec<Task> = Vec::new();
        for (key, raw) in records {
            match Task::decode(&raw) {
                Ok(mut task) => {
                    if task.state.is_terminal() {
                        warn!(key = %key, state = %task.state, "Skipping terminal record left in storage");
                        continue;
                    }
                    if matches!(task.state, TaskState::Lost | TaskState::Unknown) {
                        task.requeue();
                    }
                    recovered.push(task);
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "Skipping undecodable task record");
                }
            }
        }

        // Registration order follows original creation so the staging
        // queue drains oldest-first after a failover.
        recovered.sort_by_key(|task| task.created_at);

        let mut tasks = self.tasks.write().await;
        for task in &recovered {
            let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
            tasks.insert(
                task.name().to_string(),
                TaskEntry {
                    seq,
                    task: task.clone(),
                },
            );
        }
        info!(count = recovered.len(), "Recovered tasks from storage");
        Ok(recovered)
    }

    async fn persist(&self, op: PersistOp<'_>) -> Result<(), StorageError> {
        let mut attempt = 0u32;
        loop {
            let result = match &op {
                PersistOp::Put(key, value) => self.storage.update(key, value).await,
                PersistOp::Delete(key) => self.storage.delete(key).await,
            };
            match result {
                Ok(()) => return Ok(()),
                Err(err) if attempt < self.retry.max_retries => {
                    attempt += 1;
                    warn!(attempt, error = %err, "Storage write failed; retrying");
                    tokio::time::sleep(self.retry.retry_interval).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FlakyStore, MemoryStore};
    use crate::task::TaskSpec;
    use bosun_events::ResourceQuota;
    use std::time::Duration;

    fn fast_retry() -> PersistenceConfig {
        PersistenceConfig {
            retry_interval: Duration::from_millis(5),
            max_retries: 3,
        }
    }

    fn test_task(name: &str) -> Task {
        Task::new(TaskSpec {
            name: name.to_string(),
            resources: ResourceQuota::new(0.1, 64.0, 0.0),
            command: Some("/bin/sleep 50".to_string()),
            ..TaskSpec::default()
        })
    }

    fn manager() -> TaskManager {
        TaskManager::new(Arc::new(MemoryStore::new()), fast_retry())
    }

    #[tokio::test]
    async fn test_add_get_delete_cycle() {
        let manager = manager();
        let task = test_task("testTask");

        manager.add(task.clone()).await.unwrap();
        let fetched = manager.get("testTask").await.unwrap();
        assert_eq!(fetched.spec, task.spec);

        manager.delete(&fetched).await.unwrap();
        assert!(manager.get("testTask").await.is_err());
    }

    #[tokio::test]
    async fn test_add_duplicate_fails() {
        let manager = manager();
        manager.add(test_task("testTask")).await.unwrap();
        let err = manager.add(test_task("testTask")).await.unwrap_err();
        assert!(matches!(err, TaskManagerError::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_add_empty_name_fails() {
        let manager = manager();
        let err = manager.add(test_task("")).await.unwrap_err();
        assert!(matches!(err, TaskManagerError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_total_tasks_tracks_adds_and_deletes() {
        let manager = manager();
        for name in ["a", "b", "c"] {
            manager.add(test_task(name)).await.unwrap();
        }
        assert_eq!(manager.total_tasks().await, 3);

        manager.delete(&test_task("b")).await.unwrap();
        assert_eq!(manager.total_tasks().await, 2);

        manager.delete(&test_task("a")).await.unwrap();
        manager.delete(&test_task("c")).await.unwrap();
        assert_eq!(manager.total_tasks().await, 0);
    }

    #[tokio::test]
    async fn test_get_by_id() {
        let manager = manager();
        let mut task = test_task("testTask");
        let task_id = TaskId::generate("testTask");
        manager.add(task.clone()).await.unwrap();

        task.task_id = Some(task_id.clone());
        manager.set(TaskState::Staging, &task).await.unwrap();

        let fetched = manager.get_by_id(&task_id).await.unwrap();
        assert_eq!(fetched.name(), "testTask");

        let missing = TaskId::generate("other");
        assert!(manager.get_by_id(&missing).await.is_err());
    }

    #[tokio::test]
    async fn test_get_state_insertion_order() {
        let manager = manager();
        for name in ["first", "second", "third"] {
            let task = test_task(name);
            manager.add(task.clone()).await.unwrap();
            manager.set(TaskState::Staging, &task).await.unwrap();
        }

        let staged = manager.get_state(TaskState::Staging).await.unwrap();
        let names: Vec<_> = staged.iter().map(Task::name).collect();
        assert_eq!(names, vec!["first", "second", "third"]);

        assert!(matches!(
            manager.get_state(TaskState::Running).await,
            Err(TaskManagerError::EmptySet(_))
        ));
    }

    #[tokio::test]
    async fn test_set_terminal_removes() {
        let manager = manager();
        let task = test_task("testTask");
        manager.add(task.clone()).await.unwrap();

        manager.set(TaskState::Finished, &task).await.unwrap();
        assert!(manager.get("testTask").await.is_err());

        manager.add(task.clone()).await.unwrap();
        manager.set(TaskState::Killed, &task).await.unwrap();
        assert!(manager.get("testTask").await.is_err());
        assert_eq!(manager.total_tasks().await, 0);
    }

    #[tokio::test]
    async fn test_set_unregistered_fails() {
        let manager = manager();
        let err = manager
            .set(TaskState::Running, &test_task("ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskManagerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_has_task() {
        let manager = manager();
        let task = test_task("testTask");
        manager.add(task.clone()).await.unwrap();
        assert!(manager.has_task(&task).await);

        manager.delete(&task).await.unwrap();
        assert!(!manager.has_task(&task).await);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent_on_registry() {
        let manager = manager();
        let task = test_task("testTask");
        manager.add(task.clone()).await.unwrap();
        manager.delete(&task).await.unwrap();
        manager.delete(&task).await.unwrap();
    }

    #[tokio::test]
    async fn test_add_surfaces_broken_storage() {
        let manager = TaskManager::new(Arc::new(FlakyStore::failing(u32::MAX)), fast_retry());
        let err = manager.add(test_task("testTask")).await.unwrap_err();
        assert!(matches!(err, TaskManagerError::Storage(_)));
        // Failed adds must not leak into the registry.
        assert_eq!(manager.total_tasks().await, 0);
    }

    #[tokio::test]
    async fn test_set_keeps_memory_truth_on_broken_storage() {
        let storage = Arc::new(FlakyStore::failing(0));
        let manager = TaskManager::new(storage.clone(), fast_retry());
        let task = test_task("testTask");
        manager.add(task.clone()).await.unwrap();

        storage.fail_next(u32::MAX);
        manager.set(TaskState::Running, &task).await.unwrap();
        let fetched = manager.get("testTask").await.unwrap();
        assert_eq!(fetched.state, TaskState::Running);
    }

    #[tokio::test]
    async fn test_set_recovers_within_retry_budget() {
        let storage = Arc::new(FlakyStore::failing(0));
        let manager = TaskManager::new(storage.clone(), fast_retry());
        let task = test_task("testTask");
        manager.add(task.clone()).await.unwrap();

        // The set rides out three failed writes and lands on the fourth.
        storage.fail_next(3);
        manager.set(TaskState::Running, &task).await.unwrap();

        assert_eq!(
            manager.get("testTask").await.unwrap().state,
            TaskState::Running
        );
        let stored = storage.read(&task_key("testTask")).await.unwrap().unwrap();
        let decoded = Task::decode(&stored).unwrap();
        assert_eq!(decoded.state, TaskState::Running);
    }

    #[tokio::test]
    async fn test_replacement_side_map() {
        let manager = manager();
        manager.stage_replacement("web", test_task("web"));
        assert!(manager.has_replacement("web"));
        assert!(manager.take_replacement("web").is_some());
        assert!(manager.take_replacement("web").is_none());
    }

    #[tokio::test]
    async fn test_recover_skips_corrupt_records() {
        let storage = Arc::new(MemoryStore::new());
        {
            let manager = TaskManager::new(storage.clone(), fast_retry());
            let first = test_task("first");
            let second = test_task("second");
            manager.add(first.clone()).await.unwrap();
            manager.add(second.clone()).await.unwrap();
            manager.set(TaskState::Running, &first).await.unwrap();
            manager.set(TaskState::Staging, &second).await.unwrap();
        }
        storage.update("tasks/corrupt", "{nonsense").await.unwrap();

        let manager = TaskManager::new(storage, fast_retry());
        let recovered = manager.recover().await.unwrap();
        assert_eq!(recovered.len(), 2);
        assert_eq!(manager.total_tasks().await, 2);
        assert_eq!(
            manager.get("first").await.unwrap().state,
            TaskState::Running
        );
    }

    #[tokio::test]
    async fn test_recover_requeues_lost() {
        let storage = Arc::new(MemoryStore::new());
        {
            let manager = TaskManager::new(storage.clone(), fast_retry());
            let mut task = test_task("lostling");
            manager.add(task.clone()).await.unwrap();
            task.task_id = Some(TaskId::generate("lostling"));
            task.agent_id = Some("agent-1".parse().unwrap());
            manager.set(TaskState::Lost, &task).await.unwrap();
        }

        let manager = TaskManager::new(storage, fast_retry());
        manager.recover().await.unwrap();
        let task = manager.get("lostling").await.unwrap();
        assert_eq!(task.state, TaskState::Staging);
        assert!(task.agent_id.is_none());
    }
}
