//! Axum router wiring for the scrape surface.

use axum::{routing::get, Router};

use crate::{app_state::AppState, ops};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(ops::healthz))
        .route("/metrics", get(ops::metrics))
        .route("/metrics/local", get(ops::local_metrics))
        .with_state(state)
}
