use axum::{Json, extract::State};
use std::sync::Arc;

use super::{ApiError, CurrentUser, store_error};
use crate::session::history::{DailyStats, daily_stats};
use crate::store::QueryHistoryRecord;
use crate::web::state::AppState;

pub async fn list_history(
    state: State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<QueryHistoryRecord>>, ApiError> {
    let records = state.history.list_history(&user).await.map_err(store_error)?;
    Ok(Json(records))
}

pub async fn history_stats(
    state: State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<DailyStats>>, ApiError> {
    let records = state.history.list_history(&user).await.map_err(store_error)?;
    Ok(Json(daily_stats(&records)))
}
