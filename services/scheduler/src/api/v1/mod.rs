//! Version 1 of the control API.

mod tasks;

use axum::Router;

use super::AppState;

/// All v1 routes.
pub fn routes() -> Router<AppState> {
    tasks::routes()
}
