//! HTTP route wiring

mod admin_auth;
mod health;
mod pricing;
mod quotas;
mod scheduler;
mod tasks;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route(
            "/v1/admin/pricing",
            get(pricing::list_pricing).put(pricing::upsert_pricing),
        )
        .route("/v1/admin/quotas", put(quotas::upsert_quota))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth::require_admin,
        ));

    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/v1/tasks", post(tasks::create_task))
        .route("/v1/tasks/:id/settle", post(tasks::settle_task))
        .route("/v1/scheduler/scores", get(scheduler::scores))
        .merge(admin_routes)
        .with_state(state)
}
