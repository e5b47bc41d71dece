//! HTTP control API.
//!
//! Deploy, update, kill, status, and stats live under `/v1/api`. Handlers
//! read the managers directly (they are independently thread-safe) but
//! never call the master themselves; anything that needs a scheduler call
//! is sent to the event loop as an [`Intent`](crate::controller::Intent)
//! and the response waits on the reply.

mod v1;

use std::sync::Arc;

use axum::Router;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

use crate::controller::Intent;
use crate::resource::ResourceManager;
use crate::task::TaskManager;

/// Shared state passed to request handlers.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    tasks: Arc<TaskManager>,
    resources: Arc<ResourceManager>,
    intents: mpsc::Sender<Intent>,
}

impl AppState {
    pub fn new(
        tasks: Arc<TaskManager>,
        resources: Arc<ResourceManager>,
        intents: mpsc::Sender<Intent>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                tasks,
                resources,
                intents,
            }),
        }
    }

    /// The task registry.
    pub fn tasks(&self) -> &TaskManager {
        &self.inner.tasks
    }

    /// The offer pool and filter registry.
    pub fn resources(&self) -> &ResourceManager {
        &self.inner.resources
    }

    /// The event loop's intent queue.
    pub fn intents(&self) -> &mpsc::Sender<Intent> {
        &self.inner.intents
    }
}

/// Create the control API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/v1/api", v1::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
