// HTTP routes

mod http;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::stats_repo::StatsRepo;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) repo: Arc<StatsRepo>,
}

pub fn app(repo: Arc<StatsRepo>) -> Router {
    let state = AppState { repo };
    Router::new()
        .route("/", get(|| async { "OK" })) // GET /
        .route("/version", get(http::version_handler)) // GET /version
        .route("/{subnet}/measurement", post(http::record_measurement))
        .route(
            "/{subnet}/retrieval-success-rate",
            get(http::retrieval_success_rate),
        )
        .route("/v2/{subnet}/measurement", post(http::record_check_event))
        .route(
            "/v2/{subnet}/aggregates/{granularity}",
            get(http::aggregates),
        )
        .route(
            "/v2/{subnet}/discrete_aggregates/{granularity}",
            get(http::discrete_aggregates),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
