pub(crate) mod health;
pub(crate) mod metrics;
pub(crate) mod runs;

use axum::{
    Router,
    routing::{get, post},
};

use crate::app::AppState;

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/health/ready", get(health::ready))
        .route("/health/live", get(health::live))
        .route("/metrics", get(metrics::exporter))
        .route(
            "/v1/units/{unit_id}/runs",
            post(runs::start_run).get(runs::list_unit_runs),
        )
        .route(
            "/v1/requesters/{requester_id}/runs",
            get(runs::list_requester_runs),
        )
        .route("/v1/runs/{run_id}", get(runs::get_run))
        .route("/v1/runs/{run_id}/cancel", post(runs::cancel_run))
        .route("/v1/runs/{run_id}/cluster", get(runs::get_cluster_run))
        .with_state(state)
}
