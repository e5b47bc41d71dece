//! HTTP master client.
//!
//! The bundled [`MasterCaller`] implementation: calls are JSON posts to the
//! master's scheduler endpoint, the subscription response is a RecordIO
//! stream (`{length}\n{record}`) of JSON events, and the stream id handed
//! back on subscribe is echoed on every later call. Heavier codecs plug in
//! behind the trait without touching the core.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bosun_events::{
    Call, Event, FrameworkInfo, OfferFilters, OfferOperation, ReconcileTask, Resource,
};
use bosun_id::{AgentId, ExecutorId, OfferId, TaskId};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::Config;

use super::{CallError, MasterCaller};

/// Header carrying the subscription identity.
const STREAM_ID_HEADER: &str = "Mesos-Stream-Id";

/// Deadline for non-subscribe calls.
const CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// JSON-over-HTTP implementation of [`MasterCaller`].
pub struct HttpMasterCaller {
    http: reqwest::Client,
    endpoint: String,
    stream_id: Mutex<Option<String>>,
}

impl HttpMasterCaller {
    /// Build a client against the configured master endpoint.
    pub fn new(config: &Config) -> Result<Self, CallError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(transport)?;
        Ok(Self {
            http,
            endpoint: config.master_endpoint.trim_end_matches('/').to_string(),
            stream_id: Mutex::new(None),
        })
    }

    fn scheduler_url(&self) -> String {
        format!("{}/api/v1/scheduler", self.endpoint)
    }

    async fn call(&self, call: &Call) -> Result<(), CallError> {
        let stream_id = self
            .stream_id
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| transport("no active subscription"))?;

        let response = self
            .http
            .post(self.scheduler_url())
            .header(STREAM_ID_HEADER, stream_id)
            .json(call)
            .timeout(CALL_TIMEOUT)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(CallError::Rejected(format!("{status}: {body}")))
    }
}

fn transport(err: impl ToString) -> CallError {
    CallError::Transport(err.to_string())
}

#[async_trait]
impl MasterCaller for HttpMasterCaller {
    async fn subscribe(
        &self,
        framework: &FrameworkInfo,
    ) -> Result<mpsc::Receiver<Event>, CallError> {
        let call = Call::Subscribe {
            framework: framework.clone(),
        };

        // No request timeout here: the response body is the long-lived
        // event stream.
        let response = self
            .http
            .post(self.scheduler_url())
            .json(&call)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallError::Rejected(format!("{status}: {body}")));
        }

        let stream_id = response
            .headers()
            .get(STREAM_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        match &stream_id {
            Some(id) => debug!(stream_id = %id, "Subscription stream opened"),
            None => warn!("Master did not hand back a stream id"),
        }
        *self.stream_id.lock().unwrap() = stream_id;

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(read_event_stream(response, tx));
        Ok(rx)
    }

    async fn teardown(&self) -> Result<(), CallError> {
        self.call(&Call::Teardown).await
    }

    async fn accept(
        &self,
        offer_ids: &[OfferId],
        operations: &[OfferOperation],
        filters: &OfferFilters,
    ) -> Result<(), CallError> {
        self.call(&Call::Accept {
            offer_ids: offer_ids.to_vec(),
            operations: operations.to_vec(),
            filters: *filters,
        })
        .await
    }

    async fn decline(
        &self,
        offer_ids: &[OfferId],
        filters: &OfferFilters,
    ) -> Result<(), CallError> {
        self.call(&Call::Decline {
            offer_ids: offer_ids.to_vec(),
            filters: *filters,
        })
        .await
    }

    async fn kill(&self, task_id: &TaskId, agent_id: Option<&AgentId>) -> Result<(), CallError> {
        self.call(&Call::Kill {
            task_id: task_id.clone(),
            agent_id: agent_id.cloned(),
        })
        .await
    }

    async fn revive(&self) -> Result<(), CallError> {
        self.call(&Call::Revive).await
    }

    async fn suppress(&self) -> Result<(), CallError> {
        self.call(&Call::Suppress).await
    }

    async fn reconcile(&self, tasks: &[ReconcileTask]) -> Result<(), CallError> {
        self.call(&Call::Reconcile {
            tasks: tasks.to_vec(),
        })
        .await
    }

    async fn acknowledge(
        &self,
        agent_id: &AgentId,
        task_id: &TaskId,
        uuid: &str,
    ) -> Result<(), CallError> {
        self.call(&Call::Acknowledge {
            agent_id: agent_id.clone(),
            task_id: task_id.clone(),
            uuid: uuid.to_string(),
        })
        .await
    }

    async fn shutdown_executor(
        &self,
        executor_id: &ExecutorId,
        agent_id: &AgentId,
    ) -> Result<(), CallError> {
        self.call(&Call::Shutdown {
            executor_id: executor_id.clone(),
            agent_id: agent_id.clone(),
        })
        .await
    }

    async fn message(
        &self,
        agent_id: &AgentId,
        executor_id: &ExecutorId,
        data: &[u8],
    ) -> Result<(), CallError> {
        self.call(&Call::Message {
            agent_id: agent_id.clone(),
            executor_id: executor_id.clone(),
            data: data.to_vec(),
        })
        .await
    }

    async fn request(&self, resources: &[Resource]) -> Result<(), CallError> {
        self.call(&Call::Request {
            requests: resources.to_vec(),
        })
        .await
    }
}

/// Pump the RecordIO response body into the event channel until the
/// transport drops or the controller stops listening.
async fn read_event_stream(mut response: reqwest::Response, tx: mpsc::Sender<Event>) {
    let mut buffer: Vec<u8> = Vec::new();

    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                buffer.extend_from_slice(&chunk);
                loop {
                    match take_record(&mut buffer) {
                        Ok(Some(record)) => match serde_json::from_slice::<Event>(&record) {
                            Ok(event) => {
                                if tx.send(event).await.is_err() {
                                    return;
                                }
                            }
                            Err(err) => {
                                warn!(error = %err, "Skipping undecodable master event");
                            }
                        },
                        Ok(None) => break,
                        Err(err) => {
                            warn!(error = %err, "Corrupt record framing; dropping stream");
                            return;
                        }
                    }
                }
            }
            Ok(None) => {
                debug!("Subscription stream ended");
                return;
            }
            Err(err) => {
                warn!(error = %err, "Subscription stream failed");
                return;
            }
        }
    }
}

/// Pop one RecordIO record (`{length}\n{record}`) off the buffer.
fn take_record(buffer: &mut Vec<u8>) -> Result<Option<Vec<u8>>, String> {
    let Some(newline) = buffer.iter().position(|b| *b == b'\n') else {
        return Ok(None);
    };

    let length: usize = std::str::from_utf8(&buffer[..newline])
        .map_err(|e| e.to_string())?
        .trim()
        .parse()
        .map_err(|e: std::num::ParseIntError| e.to_string())?;

    let start = newline + 1;
    if buffer.len() < start + length {
        return Ok(None);
    }

    let record = buffer[start..start + length].to_vec();
    buffer.drain(..start + length);
    Ok(Some(record))
}
