// Handlers: measurement ingestion + success-rate and aggregate reads

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use super::AppState;
use crate::error::ApiError;
use crate::models::{CheckEventBody, CheckResult, DailyMeasurementBody, Granularity};
use crate::stats_repo::today_local;
use crate::subnet::Subnet;

/// GET /version — service name and version, baked in at build time.
pub(super) async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// POST /{subnet}/measurement — applies one retrieval-check outcome to the
/// (subnet, today) counters.
pub(super) async fn record_measurement(
    State(state): State<AppState>,
    Path(subnet): Path<String>,
    Json(body): Json<DailyMeasurementBody>,
) -> Result<StatusCode, ApiError> {
    let subnet: Subnet = subnet.parse()?;
    state
        .repo
        .record_daily(subnet, body.retrieval_succeeded)
        .await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub(super) struct DailyRangeQuery {
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
}

/// GET /{subnet}/retrieval-success-rate?from&to — daily counters in the
/// inclusive range, ascending by day. Defaults to just today.
pub(super) async fn retrieval_success_rate(
    State(state): State<AppState>,
    Path(subnet): Path<String>,
    Query(query): Query<DailyRangeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let subnet: Subnet = subnet.parse()?;
    let from = query.from.unwrap_or_else(today_local);
    let to = query.to.unwrap_or_else(today_local);
    let rows = state.repo.daily_range(subnet, from, to).await?;
    Ok(Json(rows))
}

/// POST /v2/{subnet}/measurement — appends one generalized check event.
pub(super) async fn record_check_event(
    State(state): State<AppState>,
    Path(subnet): Path<String>,
    Json(body): Json<CheckEventBody>,
) -> Result<StatusCode, ApiError> {
    let subnet: Subnet = subnet.parse()?;
    // Coercion failures are client errors; nothing is written.
    let result = CheckResult::coerce(&body.result, body.averageable)?;
    state
        .repo
        .record_event(
            subnet,
            &body.check_subject,
            &body.check_key,
            body.success,
            result,
        )
        .await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct BucketedQuery {
    check_subject: String,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
}

/// GET /v2/{subnet}/aggregates/{minutely|hourly}?from&to&checkSubject —
/// averageable buckets in the inclusive range, ascending by bucket time.
pub(super) async fn aggregates(
    State(state): State<AppState>,
    Path((subnet, granularity)): Path<(String, String)>,
    Query(query): Query<BucketedQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let subnet: Subnet = subnet.parse()?;
    let granularity: Granularity = granularity.parse()?;
    let buckets = state
        .repo
        .bucketed_range(
            subnet,
            &query.check_subject,
            granularity,
            query.from.timestamp_millis(),
            query.to.timestamp_millis(),
        )
        .await?;
    Ok(Json(buckets))
}

/// GET /v2/{subnet}/discrete_aggregates/{minutely|hourly}?from&to&checkSubject
pub(super) async fn discrete_aggregates(
    State(state): State<AppState>,
    Path((subnet, granularity)): Path<(String, String)>,
    Query(query): Query<BucketedQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let subnet: Subnet = subnet.parse()?;
    let granularity: Granularity = granularity.parse()?;
    let buckets = state
        .repo
        .discrete_bucketed_range(
            subnet,
            &query.check_subject,
            granularity,
            query.from.timestamp_millis(),
            query.to.timestamp_millis(),
        )
        .await?;
    Ok(Json(buckets))
}
