use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;

use super::handlers::{connections, history, session, system};
use super::state::AppState;

// Guided session workflow for the calling user
fn session_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(session::get_session))
        .route("/start", post(session::start_session))
        .route("/tables", post(session::select_tables))
        .route("/tables/reselect", post(session::reselect_tables))
        .route("/schema/{table}", get(session::preview_schema))
        .route(
            "/recommendations",
            get(session::get_recommendations)
                .post(session::show_recommendations)
                .delete(session::hide_recommendations),
        )
        .route("/generate", post(session::generate))
        .route("/sql", axum::routing::put(session::edit_sql))
        .route("/execute", post(session::execute))
        .route("/edit-question", post(session::edit_question))
        .route("/back", post(session::back))
        .route("/clear", post(session::clear))
        .route("/reset", post(session::reset))
        .route("/results.csv", get(session::export_results))
}

// API Routes - REST API for the session UI
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/api",
        Router::new()
            .nest("/session", session_routes())
            // Saved connections
            .route(
                "/connections",
                get(connections::list_connections).post(connections::create_connection),
            )
            .route("/connections/test", post(connections::test_connection))
            .route(
                "/connections/{id}",
                get(connections::get_connection)
                    .put(connections::update_connection)
                    .delete(connections::delete_connection),
            )
            // Query history
            .route("/history", get(history::list_history))
            .route("/history/stats", get(history::history_stats))
            // System
            .route("/logout", post(system::logout))
            .route("/status", get(system::system_status)),
    )
}
