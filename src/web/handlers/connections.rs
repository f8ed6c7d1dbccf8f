use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::{ApiError, CurrentUser, store_error};
use crate::backend::models::ExtractedSchema;
use crate::session::ConnectionConfig;
use crate::session::schema::TableSelection;
use crate::store::SavedConnection;
use crate::web::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ConnectionRequest {
    pub name: String,
    #[serde(flatten)]
    pub connection: ConnectionConfig,
}

#[derive(Debug, Deserialize)]
pub struct TestConnectionRequest {
    pub connection: ConnectionConfig,
    pub table_name: String,
}

/// A saved connection as shown for editing. The password itself is never returned.
#[derive(Debug, Serialize)]
pub struct ConnectionDetail {
    #[serde(flatten)]
    pub connection: SavedConnection,
    pub has_password: bool,
}

fn validate(request: &ConnectionRequest) -> Result<(), ApiError> {
    if request.name.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Connection name is required".to_string(),
        ));
    }
    request
        .connection
        .validate()
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))
}

pub async fn list_connections(
    state: State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<SavedConnection>>, ApiError> {
    let connections = state
        .connections
        .list_connections(&user)
        .await
        .map_err(store_error)?;
    Ok(Json(connections))
}

pub async fn get_connection(
    state: State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<ConnectionDetail>, ApiError> {
    let connection = state
        .connections
        .get_connection(&user, id)
        .await
        .map_err(store_error)?
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Connection {} not found", id)))?;

    // A missing or unreadable secret only means the form starts without a password.
    let has_password = match state.secrets.password(id).await {
        Ok(password) => password.is_some_and(|p| !p.is_empty()),
        Err(e) => {
            warn!("Failed to fetch password for connection {}: {}", id, e);
            false
        }
    };

    Ok(Json(ConnectionDetail {
        connection,
        has_password,
    }))
}

pub async fn create_connection(
    state: State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<ConnectionRequest>,
) -> Result<(StatusCode, Json<SavedConnection>), ApiError> {
    validate(&payload)?;
    let saved = state
        .connections
        .create_connection(&user, payload.name.trim(), &payload.connection)
        .await
        .map_err(store_error)?;

    if !payload.connection.password.is_empty() {
        if let Err(e) = state
            .secrets
            .set_password(saved.id, &payload.connection.password)
            .await
        {
            warn!("Failed to store password for connection {}: {}", saved.id, e);
            if let Err(cleanup) = state.connections.delete_connection(&user, saved.id).await {
                error!(
                    "Failed to remove connection {} after secret failure: {}",
                    saved.id, cleanup
                );
            }
            return Err(store_error(e));
        }
    }

    info!("Saved connection '{}' ({}) for {}", saved.name, saved.id, user);
    Ok((StatusCode::CREATED, Json(saved)))
}

/// Update a saved connection. A blank password keeps the stored one.
pub async fn update_connection(
    state: State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    Json(payload): Json<ConnectionRequest>,
) -> Result<Json<SavedConnection>, ApiError> {
    validate(&payload)?;
    let previous = state
        .connections
        .get_connection(&user, id)
        .await
        .map_err(store_error)?
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Connection {} not found", id)))?;
    let saved = state
        .connections
        .update_connection(&user, id, payload.name.trim(), &payload.connection)
        .await
        .map_err(store_error)?;

    if !payload.connection.password.is_empty() {
        if let Err(e) = state
            .secrets
            .set_password(id, &payload.connection.password)
            .await
        {
            warn!("Failed to store password for connection {}: {}", id, e);
            let restored = previous.to_config(String::new());
            if let Err(cleanup) = state
                .connections
                .update_connection(&user, id, &previous.name, &restored)
                .await
            {
                error!("Failed to restore connection {} after secret failure: {}", id, cleanup);
            }
            return Err(store_error(e));
        }
    }

    info!("Updated connection {} for {}", id, user);
    Ok(Json(saved))
}

pub async fn delete_connection(
    state: State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state
        .connections
        .delete_connection(&user, id)
        .await
        .map_err(store_error)?;
    info!("Deleted connection {} for {}", id, user);
    Ok(StatusCode::NO_CONTENT)
}

/// Check the connection details by extracting one table's schema.
pub async fn test_connection(
    state: State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<TestConnectionRequest>,
) -> Result<Json<ExtractedSchema>, ApiError> {
    payload
        .connection
        .validate()
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    let table = TableSelection::new([payload.table_name.as_str()])
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    info!(
        "Testing connection to {}.{} for {}",
        payload.connection.database, payload.connection.schema_name, user
    );
    let schema = state
        .backend
        .extract_schema(&payload.connection, table.primary())
        .await
        .map_err(|e| {
            warn!("Connection test failed: {}", e);
            (StatusCode::BAD_GATEWAY, e.to_string())
        })?;
    Ok(Json(schema))
}
