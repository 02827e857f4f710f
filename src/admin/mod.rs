//! Operator API, served on its own listener behind a bearer key.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn setup_admin_router(state: AppState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/nodes", get(list_nodes))
        .route("/admin/nodes/{node_id}/sync", post(force_sync))
        .route("/admin/nodes/{node_id}/maintenance", post(set_maintenance))
        .route("/admin/nodes/{node_id}/usage", get(get_usage))
        .route("/admin/tenants/{tenant}/dispatchable", get(dispatchable_nodes))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
