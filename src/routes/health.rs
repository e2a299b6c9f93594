//! Liveness probe and API banner

use hyper::{Response, StatusCode};
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

use super::{json_response, text_response, FullBody};
use crate::server::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: &'static str,
    /// "development" or "production"
    pub mode: &'static str,
    pub storage: String,
    pub timestamp: u64,
}

fn mode(state: &AppState) -> &'static str {
    if state.args.dev_mode {
        "development"
    } else {
        "production"
    }
}

/// `/health`: 200 whenever the process is serving
pub fn health_check(state: &AppState) -> Response<FullBody> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();

    json_response(
        StatusCode::OK,
        &HealthResponse {
            healthy: true,
            version: env!("CARGO_PKG_VERSION"),
            mode: mode(state),
            storage: state.args.storage.to_string(),
            timestamp,
        },
    )
}

/// `/api/`: plain-text greeting naming the mode
pub fn banner(state: &AppState) -> Response<FullBody> {
    text_response(
        StatusCode::OK,
        format!(
            "Welcome to the key management API! You are in {} mode.",
            mode(state)
        ),
    )
}
