//! Prometheus /metrics endpoint

use crate::error::{AppError, Result};
use crate::state::HasServices;
use axum::extract::State;

/// GET /metrics: Prometheus text exposition format.
pub async fn metrics_handler<S: HasServices>(State(state): State<S>) -> Result<String> {
    state
        .prometheus_handle()
        .map(|handle| handle.render())
        .ok_or_else(|| AppError::NotFound("Metrics not enabled".to_string()))
}
