// Wire and domain models

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ApiError;

/// One day of counters for a subnet. `total` and `successful` are 64-bit
/// counters serialized as decimal strings: they may exceed the safe-integer
/// range of JSON consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyMeasurement {
    pub day: NaiveDate,
    #[serde(with = "u64_string")]
    pub total: u64,
    #[serde(with = "u64_string")]
    pub successful: u64,
}

/// Counters for a single `(subnet, day)` point lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyTotals {
    pub total: u64,
    pub successful: u64,
}

/// Pre-aggregated bucket of averageable check results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketedAggregate {
    pub bucket_time: DateTime<Utc>,
    pub check_key: String,
    pub total_checks: i64,
    pub successful_checks: i64,
    pub success_rate: f64,
    pub avg_result: f64,
}

/// Pre-aggregated bucket of discrete check results. `results` preserves the
/// literal result strings in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscreteBucketedAggregate {
    pub bucket_time: DateTime<Utc>,
    pub check_key: String,
    pub total_checks: i64,
    pub successful_checks: i64,
    pub results: Vec<String>,
}

/// Bucket width for pre-aggregated reads. Each variant dispatches to a fixed
/// statically known table; request input never reaches a query target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Minutely,
    Hourly,
}

impl FromStr for Granularity {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minutely" => Ok(Granularity::Minutely),
            "hourly" => Ok(Granularity::Hourly),
            _ => Err(ApiError::InvalidInput(format!(
                "unknown granularity: {s} (expected minutely or hourly)"
            ))),
        }
    }
}

/// Body of POST /{subnet}/measurement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyMeasurementBody {
    pub retrieval_succeeded: bool,
}

/// Body of POST /v2/{subnet}/measurement. `result` arrives as JSON and is
/// coerced at write time according to `averageable`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckEventBody {
    pub check_key: String,
    pub check_subject: String,
    pub success: bool,
    pub result: serde_json::Value,
    pub averageable: bool,
}

/// A check result after coercion, ready to append to the raw table its shape
/// selects.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckResult {
    Averageable(f64),
    Discrete(String),
}

impl CheckResult {
    /// Coerces a JSON result value. A non-numeric result for an averageable
    /// check (or a non-string result for a discrete one) is a caller input
    /// error and must be rejected before any write.
    pub fn coerce(result: &serde_json::Value, averageable: bool) -> Result<Self, ApiError> {
        if averageable {
            let numeric = result
                .as_f64()
                .or_else(|| result.as_str().and_then(|s| s.trim().parse().ok()));
            match numeric {
                Some(n) => Ok(CheckResult::Averageable(n)),
                None => Err(ApiError::InvalidInput(format!(
                    "averageable result must be numeric, got {result}"
                ))),
            }
        } else {
            match result.as_str() {
                Some(s) => Ok(CheckResult::Discrete(s.to_string())),
                None => Err(ApiError::InvalidInput(format!(
                    "discrete result must be a string, got {result}"
                ))),
            }
        }
    }
}

mod u64_string {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(v: &u64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(D::Error::custom)
    }
}
