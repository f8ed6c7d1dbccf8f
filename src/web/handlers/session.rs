use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};

use super::{ApiError, CurrentUser, workflow_error};
use crate::backend::models::ExtractedSchema;
use crate::session::ConnectionConfig;
use crate::session::generation::QuestionInput;
use crate::session::recommendations::RecommendationState;
use crate::session::resolver::ConfigSource;
use crate::session::workflow::WorkflowSnapshot;
use crate::web::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct StartSessionRequest {
    pub connection: Option<ConnectionConfig>,
    pub connection_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SelectTablesRequest {
    pub tables: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct EditSqlRequest {
    pub sql: String,
}

type SnapshotResult = Result<Json<WorkflowSnapshot>, ApiError>;

pub async fn get_session(state: State<Arc<AppState>>, CurrentUser(user): CurrentUser) -> Json<WorkflowSnapshot> {
    Json(state.session_for(&user).await.snapshot().await)
}

/// Resolve the connection and list tables. An empty body resumes from the
/// stored configuration.
pub async fn start_session(
    state: State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    body: Bytes,
) -> SnapshotResult {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        StartSessionRequest::default()
    } else {
        serde_json::from_slice::<StartSessionRequest>(&body)
            .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid request body: {}", e)))?
    };

    let source = ConfigSource {
        inline: request.connection,
        connection_id: request.connection_id,
    };
    info!(
        "Starting session for {} (inline: {}, saved: {:?})",
        user,
        source.inline.is_some(),
        source.connection_id
    );

    let session = state.session_for(&user).await;
    session.start(source).await.map_err(workflow_error)?;
    Ok(Json(session.snapshot().await))
}

pub async fn select_tables(
    state: State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<SelectTablesRequest>,
) -> SnapshotResult {
    let session = state.session_for(&user).await;
    session
        .select_tables(&payload.tables)
        .await
        .map_err(workflow_error)?;
    Ok(Json(session.snapshot().await))
}

pub async fn reselect_tables(state: State<Arc<AppState>>, CurrentUser(user): CurrentUser) -> SnapshotResult {
    let session = state.session_for(&user).await;
    session.reselect_tables().await.map_err(workflow_error)?;
    Ok(Json(session.snapshot().await))
}

pub async fn preview_schema(
    state: State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(table): Path<String>,
) -> Result<Json<ExtractedSchema>, ApiError> {
    let session = state.session_for(&user).await;
    let schema = session.preview_schema(&table).await.map_err(workflow_error)?;
    Ok(Json(schema))
}

pub async fn show_recommendations(
    state: State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<RecommendationState>, ApiError> {
    let session = state.session_for(&user).await;
    let recommendations = session.show_recommendations().await.map_err(workflow_error)?;
    Ok(Json(recommendations))
}

pub async fn hide_recommendations(state: State<Arc<AppState>>, CurrentUser(user): CurrentUser) -> StatusCode {
    state.session_for(&user).await.hide_recommendations().await;
    StatusCode::NO_CONTENT
}

pub async fn get_recommendations(
    state: State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Json<RecommendationState> {
    Json(state.session_for(&user).await.recommendations().await)
}

pub async fn generate(
    state: State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<GenerateRequest>,
) -> SnapshotResult {
    let session = state.session_for(&user).await;
    let input = QuestionInput {
        question: payload.question,
        recommendations: payload.recommendations,
    };
    session.generate(input).await.map_err(workflow_error)?;
    Ok(Json(session.snapshot().await))
}

pub async fn edit_sql(
    state: State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<EditSqlRequest>,
) -> SnapshotResult {
    let session = state.session_for(&user).await;
    session.edit_sql(payload.sql).await.map_err(workflow_error)?;
    Ok(Json(session.snapshot().await))
}

pub async fn execute(state: State<Arc<AppState>>, CurrentUser(user): CurrentUser) -> SnapshotResult {
    let session = state.session_for(&user).await;
    session.execute().await.map_err(workflow_error)?;
    Ok(Json(session.snapshot().await))
}

pub async fn edit_question(state: State<Arc<AppState>>, CurrentUser(user): CurrentUser) -> SnapshotResult {
    let session = state.session_for(&user).await;
    session.edit_question().await.map_err(workflow_error)?;
    Ok(Json(session.snapshot().await))
}

pub async fn back(state: State<Arc<AppState>>, CurrentUser(user): CurrentUser) -> SnapshotResult {
    let session = state.session_for(&user).await;
    session.back().await.map_err(workflow_error)?;
    Ok(Json(session.snapshot().await))
}

pub async fn clear(state: State<Arc<AppState>>, CurrentUser(user): CurrentUser) -> SnapshotResult {
    let session = state.session_for(&user).await;
    session.clear().await.map_err(workflow_error)?;
    Ok(Json(session.snapshot().await))
}

pub async fn reset(state: State<Arc<AppState>>, CurrentUser(user): CurrentUser) -> Json<WorkflowSnapshot> {
    let session = state.session_for(&user).await;
    session.start_over().await;
    Json(session.snapshot().await)
}

pub async fn export_results(
    state: State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Response, ApiError> {
    let session = state.session_for(&user).await;
    let csv = match session.results_csv().await {
        Some(Ok(csv)) => csv,
        Some(Err(e)) => {
            error!("Failed to export results: {}", e);
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to export results: {}", e),
            ));
        }
        None => {
            return Err((
                StatusCode::NOT_FOUND,
                "No query results to export".to_string(),
            ));
        }
    };

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"results.csv\"",
            ),
        ],
        csv,
    )
        .into_response())
}
