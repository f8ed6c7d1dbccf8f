use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use super::CurrentUser;
use crate::web::state::AppState;

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: String,
    pub uptime_seconds: i64,
    pub active_sessions: usize,
    pub backend_url: String,
}

pub async fn system_status(state: State<Arc<AppState>>) -> Json<SystemStatus> {
    let now = chrono::Utc::now();
    let uptime = now.signed_duration_since(state.startup_time).num_seconds();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        active_sessions: state.session_count().await,
        backend_url: state.config.backend.api_url.clone(),
    })
}

/// Drop the user's session and the client-stored configuration.
pub async fn logout(state: State<Arc<AppState>>, CurrentUser(user): CurrentUser) -> StatusCode {
    match state.end_session(&user).await {
        Some(session) => session.start_over().await,
        None => state.client.clear(&user).await,
    }
    info!("Logged out {}", user);
    StatusCode::NO_CONTENT
}
