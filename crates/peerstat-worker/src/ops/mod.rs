//! Operational HTTP endpoints.
//!
//! - `/healthz`       : liveness
//! - `/metrics`       : instance-wide text exposition
//! - `/metrics/local` : this worker only

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

use peerstat_core::exposition::CONTENT_TYPE;

use crate::app_state::AppState;

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.instance_wide_text().await {
        Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "instance-wide scrape failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("{}: {e}\n", e.code().as_str()),
            )
                .into_response()
        }
    }
}

pub async fn local_metrics(State(state): State<AppState>) -> Response {
    let body = state.local_text();
    (StatusCode::OK, [(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response()
}
