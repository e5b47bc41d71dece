//! A scriptable, recording master for tests.
//!
//! Tests queue subscription streams with [`MockMaster::push_stream`], feed
//! events through the returned sender, and assert on the recorded calls.
//! When the queue is empty, `subscribe` fails, which is how tests exercise
//! the controller's backoff-and-resubscribe path.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use bosun_events::{
    Event, FrameworkInfo, OfferFilters, OfferOperation, ReconcileTask, Resource,
};
use bosun_id::{AgentId, ExecutorId, OfferId, TaskId};
use tokio::sync::mpsc;

use super::{CallError, MasterCaller};

/// One call observed by the mock.
#[derive(Debug, Clone)]
pub enum RecordedCall {
    Subscribe {
        framework: FrameworkInfo,
    },
    Teardown,
    Accept {
        offer_ids: Vec<OfferId>,
        operations: Vec<OfferOperation>,
        filters: OfferFilters,
    },
    Decline {
        offer_ids: Vec<OfferId>,
        filters: OfferFilters,
    },
    Kill {
        task_id: TaskId,
        agent_id: Option<AgentId>,
    },
    Revive,
    Suppress,
    Reconcile {
        tasks: Vec<ReconcileTask>,
    },
    Acknowledge {
        agent_id: AgentId,
        task_id: TaskId,
        uuid: String,
    },
    ShutdownExecutor {
        executor_id: ExecutorId,
        agent_id: AgentId,
    },
    Message {
        agent_id: AgentId,
        executor_id: ExecutorId,
        data: Vec<u8>,
    },
    Request {
        resources: Vec<Resource>,
    },
}

/// Recording [`MasterCaller`] double.
#[derive(Default)]
pub struct MockMaster {
    calls: Mutex<Vec<RecordedCall>>,
    streams: Mutex<VecDeque<mpsc::Receiver<Event>>>,
    kill_error: Mutex<Option<CallError>>,
}

impl MockMaster {
    /// A mock with no subscription streams queued.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one subscription stream; returns the sender a test uses to
    /// inject master events.
    pub fn push_stream(&self) -> mpsc::Sender<Event> {
        let (tx, rx) = mpsc::channel(64);
        self.streams.lock().unwrap().push_back(rx);
        tx
    }

    /// Make the next kill call fail with the given error.
    pub fn fail_next_kill(&self, error: CallError) {
        *self.kill_error.lock().unwrap() = Some(error);
    }

    /// Snapshot of every recorded call.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Recorded accepts, in order.
    pub fn accepts(&self) -> Vec<(Vec<OfferId>, Vec<OfferOperation>)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::Accept {
                    offer_ids,
                    operations,
                    ..
                } => Some((offer_ids, operations)),
                _ => None,
            })
            .collect()
    }

    /// Recorded declines, in order.
    pub fn declines(&self) -> Vec<(Vec<OfferId>, OfferFilters)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::Decline { offer_ids, filters } => Some((offer_ids, filters)),
                _ => None,
            })
            .collect()
    }

    /// Frameworks presented on each subscribe, in order.
    pub fn subscribes(&self) -> Vec<FrameworkInfo> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::Subscribe { framework } => Some(framework),
                _ => None,
            })
            .collect()
    }

    /// True when any recorded call matches the predicate.
    pub fn saw(&self, predicate: impl Fn(&RecordedCall) -> bool) -> bool {
        self.calls.lock().unwrap().iter().any(predicate)
    }

    fn record(&self, call: RecordedCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl MasterCaller for MockMaster {
    async fn subscribe(
        &self,
        framework: &FrameworkInfo,
    ) -> Result<mpsc::Receiver<Event>, CallError> {
        self.record(RecordedCall::Subscribe {
            framework: framework.clone(),
        });
        self.streams
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| CallError::Transport("no stream available".to_string()))
    }

    async fn teardown(&self) -> Result<(), CallError> {
        self.record(RecordedCall::Teardown);
        Ok(())
    }

    async fn accept(
        &self,
        offer_ids: &[OfferId],
        operations: &[OfferOperation],
        filters: &OfferFilters,
    ) -> Result<(), CallError> {
        self.record(RecordedCall::Accept {
            offer_ids: offer_ids.to_vec(),
            operations: operations.to_vec(),
            filters: *filters,
        });
        Ok(())
    }

    async fn decline(
        &self,
        offer_ids: &[OfferId],
        filters: &OfferFilters,
    ) -> Result<(), CallError> {
        self.record(RecordedCall::Decline {
            offer_ids: offer_ids.to_vec(),
            filters: *filters,
        });
        Ok(())
    }

    async fn kill(&self, task_id: &TaskId, agent_id: Option<&AgentId>) -> Result<(), CallError> {
        self.record(RecordedCall::Kill {
            task_id: task_id.clone(),
            agent_id: agent_id.cloned(),
        });
        if let Some(err) = self.kill_error.lock().unwrap().take() {
            return Err(err);
        }
        Ok(())
    }

    async fn revive(&self) -> Result<(), CallError> {
        self.record(RecordedCall::Revive);
        Ok(())
    }

    async fn suppress(&self) -> Result<(), CallError> {
        self.record(RecordedCall::Suppress);
        Ok(())
    }

    async fn reconcile(&self, tasks: &[ReconcileTask]) -> Result<(), CallError> {
        self.record(RecordedCall::Reconcile {
            tasks: tasks.to_vec(),
        });
        Ok(())
    }

    async fn acknowledge(
        &self,
        agent_id: &AgentId,
        task_id: &TaskId,
        uuid: &str,
    ) -> Result<(), CallError> {
        self.record(RecordedCall::Acknowledge {
            agent_id: agent_id.clone(),
            task_id: task_id.clone(),
            uuid: uuid.to_string(),
        });
        Ok(())
    }

    async fn shutdown_executor(
        &self,
        executor_id: &ExecutorId,
        agent_id: &AgentId,
    ) -> Result<(), CallError> {
        self.record(RecordedCall::ShutdownExecutor {
            executor_id: executor_id.clone(),
            agent_id: agent_id.clone(),
        });
        Ok(())
    }

    async fn message(
        &self,
        agent_id: &AgentId,
        executor_id: &ExecutorId,
        data: &[u8],
    ) -> Result<(), CallError> {
        self.record(RecordedCall::Message {
            agent_id: agent_id.clone(),
            executor_id: executor_id.clone(),
            data: data.to_vec(),
        });
        Ok(())
    }

    async fn request(&self, resources: &[Resource]) -> Result<(), CallError> {
        self.record(RecordedCall::Request {
            resources: resources.to_vec(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_pops_queued_stream() {
        let master = MockMaster::new();
        let tx = master.push_stream();

        let framework = FrameworkInfo {
            user: "nobody".to_string(),
            name: "test".to_string(),
            framework_id: None,
            failover_timeout_secs: 60.0,
            checkpoint: false,
            role: None,
            hostname: None,
            principal: None,
        };

        let mut rx = master.subscribe(&framework).await.unwrap();
        tx.send(Event::Heartbeat).await.unwrap();
        assert_eq!(rx.recv().await, Some(Event::Heartbeat));

        // Queue exhausted: next subscribe fails.
        assert!(master.subscribe(&framework).await.is_err());
        assert_eq!(master.subscribes().len(), 2);
    }

    #[tokio::test]
    async fn test_fail_next_kill_is_one_shot() {
        let master = MockMaster::new();
        master.fail_next_kill(CallError::Rejected("unknown task".to_string()));

        let task_id = TaskId::generate("t");
        assert!(master.kill(&task_id, None).await.is_err());
        assert!(master.kill(&task_id, None).await.is_ok());
    }
}
