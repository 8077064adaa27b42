pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::analysis::handlers as analysis;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // ── Analysis API ──────────────────────────────────────────────────
        .route("/documents/:id/analyze", post(analysis::handle_analyze))
        .route("/analyses", get(analysis::handle_list_analyses))
        .route("/analyses/:id", get(analysis::handle_get_analysis))
        .with_state(state)
}
