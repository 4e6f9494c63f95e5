// SQLite measurement store. Every counter mutation is a single atomic upsert
// statement: multiple service instances may write the same key concurrently
// and increments must not be lost to read-then-write races.

pub mod rollup;

use chrono::{DateTime, NaiveDate};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::instrument;

use crate::error::ApiError;
use crate::models::{
    BucketedAggregate, CheckResult, DailyMeasurement, DailyTotals, DiscreteBucketedAggregate,
    Granularity,
};
use crate::subnet::Subnet;
use rollup::{AvgBucketRow, DiscreteBucketRow, RawAvgRow, RawDiscreteRow};

/// Calendar day in the service's local timezone; daily buckets key on it.
pub fn today_local() -> NaiveDate {
    chrono::Local::now().date_naive()
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

const MINUTE_AVG_RANGE_SQL: &str = "SELECT bucket_time, check_key, total_checks, successful_checks, success_rate, avg_result
     FROM minute_stats WHERE subnet_check_id = $1 AND bucket_time >= $2 AND bucket_time <= $3
     ORDER BY bucket_time ASC";
const HOURLY_AVG_RANGE_SQL: &str = "SELECT bucket_time, check_key, total_checks, successful_checks, success_rate, avg_result
     FROM hourly_stats WHERE subnet_check_id = $1 AND bucket_time >= $2 AND bucket_time <= $3
     ORDER BY bucket_time ASC";
const MINUTE_DISCRETE_RANGE_SQL: &str = "SELECT bucket_time, check_key, total_checks, successful_checks, results
     FROM minute_stats_discrete WHERE subnet_check_id = $1 AND bucket_time >= $2 AND bucket_time <= $3
     ORDER BY bucket_time ASC";
const HOURLY_DISCRETE_RANGE_SQL: &str = "SELECT bucket_time, check_key, total_checks, successful_checks, results
     FROM hourly_stats_discrete WHERE subnet_check_id = $1 AND bucket_time >= $2 AND bucket_time <= $3
     ORDER BY bucket_time ASC";

const SAVE_MINUTE_AVG_SQL: &str = "INSERT INTO minute_stats (bucket_time, subnet_check_id, check_key, total_checks, successful_checks, success_rate, avg_result)
     VALUES ($1, $2, $3, $4, $5, $6, $7)
     ON CONFLICT(bucket_time, subnet_check_id, check_key) DO UPDATE SET
       total_checks = excluded.total_checks,
       successful_checks = excluded.successful_checks,
       success_rate = excluded.success_rate,
       avg_result = excluded.avg_result";
const SAVE_HOURLY_AVG_SQL: &str = "INSERT INTO hourly_stats (bucket_time, subnet_check_id, check_key, total_checks, successful_checks, success_rate, avg_result)
     VALUES ($1, $2, $3, $4, $5, $6, $7)
     ON CONFLICT(bucket_time, subnet_check_id, check_key) DO UPDATE SET
       total_checks = excluded.total_checks,
       successful_checks = excluded.successful_checks,
       success_rate = excluded.success_rate,
       avg_result = excluded.avg_result";
const SAVE_MINUTE_DISCRETE_SQL: &str = "INSERT INTO minute_stats_discrete (bucket_time, subnet_check_id, check_key, total_checks, successful_checks, results)
     VALUES ($1, $2, $3, $4, $5, $6)
     ON CONFLICT(bucket_time, subnet_check_id, check_key) DO UPDATE SET
       total_checks = excluded.total_checks,
       successful_checks = excluded.successful_checks,
       results = excluded.results";
const SAVE_HOURLY_DISCRETE_SQL: &str = "INSERT INTO hourly_stats_discrete (bucket_time, subnet_check_id, check_key, total_checks, successful_checks, results)
     VALUES ($1, $2, $3, $4, $5, $6)
     ON CONFLICT(bucket_time, subnet_check_id, check_key) DO UPDATE SET
       total_checks = excluded.total_checks,
       successful_checks = excluded.successful_checks,
       results = excluded.results";

pub struct StatsRepo {
    pool: SqlitePool,
    retention_ms: i64,
}

impl StatsRepo {
    pub async fn connect(path: &str, max_pool_size: u32, retention_days: u32) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_pool_size)
            .connect_with(opts)
            .await?;
        let retention_ms = (retention_days as i64) * 24 * 60 * 60 * 1000;
        Ok(Self { pool, retention_ms })
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS daily_measurements (
                subnet TEXT NOT NULL,
                day TEXT NOT NULL,
                total INTEGER NOT NULL,
                successful INTEGER NOT NULL,
                UNIQUE(subnet, day)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subnet_checks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subnet TEXT NOT NULL,
                check_subject TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE(subnet, check_subject)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS measurements_for_avg (
                time INTEGER NOT NULL,
                subnet_check_id INTEGER NOT NULL,
                check_key TEXT NOT NULL,
                success INTEGER NOT NULL,
                result REAL NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_measurements_for_avg_time ON measurements_for_avg(time)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS measurements_discrete (
                time INTEGER NOT NULL,
                subnet_check_id INTEGER NOT NULL,
                check_key TEXT NOT NULL,
                success INTEGER NOT NULL,
                result TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_measurements_discrete_time ON measurements_discrete(time)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS rollup_state (key TEXT PRIMARY KEY, value INTEGER NOT NULL)",
        )
        .execute(&self.pool)
        .await?;

        rollup::init_bucket_tables(&self.pool).await?;

        Ok(())
    }

    // --- write path ---

    /// Applies one check outcome to the (subnet, today) counter row.
    pub async fn record_daily(&self, subnet: Subnet, succeeded: bool) -> Result<(), ApiError> {
        self.record_daily_on(subnet, today_local(), succeeded).await
    }

    /// Insert-or-increment in one statement; the conflict arm re-runs the
    /// increment against the winner's row, so concurrent submissions for the
    /// same key all land.
    #[instrument(skip(self), fields(repo = "stats", operation = "record_daily"))]
    pub async fn record_daily_on(
        &self,
        subnet: Subnet,
        day: NaiveDate,
        succeeded: bool,
    ) -> Result<(), ApiError> {
        sqlx::query(
            "INSERT INTO daily_measurements (subnet, day, total, successful) VALUES ($1, $2, 1, $3)
             ON CONFLICT(subnet, day) DO UPDATE SET total = total + 1, successful = successful + $3",
        )
        .bind(subnet.as_str())
        .bind(day)
        .bind(succeeded as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Maps (subnet, check_subject) to its stable id, creating it on first
    /// use. The conflict arm is a no-op re-affirmation so RETURNING yields the
    /// existing id; two concurrent first resolves produce exactly one row.
    #[instrument(skip(self), fields(repo = "stats", operation = "resolve_check"))]
    pub async fn resolve_check(&self, subnet: Subnet, check_subject: &str) -> Result<i64, ApiError> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO subnet_checks (subnet, check_subject, created_at) VALUES ($1, $2, $3)
             ON CONFLICT(subnet, check_subject) DO UPDATE SET check_subject = excluded.check_subject
             RETURNING id",
        )
        .bind(subnet.as_str())
        .bind(check_subject)
        .bind(now_ms())
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Read-only lookup for the query path; never creates an identity.
    pub async fn find_check(
        &self,
        subnet: Subnet,
        check_subject: &str,
    ) -> Result<Option<i64>, ApiError> {
        let id = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM subnet_checks WHERE subnet = $1 AND check_subject = $2",
        )
        .bind(subnet.as_str())
        .bind(check_subject)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    /// Appends one raw check event, stamped with the current time. The result
    /// must already be coerced to its shape; no counter is updated here —
    /// aggregation is deferred to the rollup materializer.
    pub async fn record_event(
        &self,
        subnet: Subnet,
        check_subject: &str,
        check_key: &str,
        success: bool,
        result: CheckResult,
    ) -> Result<(), ApiError> {
        self.record_event_at(now_ms(), subnet, check_subject, check_key, success, result)
            .await
    }

    #[instrument(skip(self, result), fields(repo = "stats", operation = "record_event"))]
    pub async fn record_event_at(
        &self,
        time_ms: i64,
        subnet: Subnet,
        check_subject: &str,
        check_key: &str,
        success: bool,
        result: CheckResult,
    ) -> Result<(), ApiError> {
        let subnet_check_id = self.resolve_check(subnet, check_subject).await?;
        match result {
            CheckResult::Averageable(value) => {
                sqlx::query(
                    "INSERT INTO measurements_for_avg (time, subnet_check_id, check_key, success, result)
                     VALUES ($1, $2, $3, $4, $5)",
                )
                .bind(time_ms)
                .bind(subnet_check_id)
                .bind(check_key)
                .bind(success as i64)
                .bind(value)
                .execute(&self.pool)
                .await?;
            }
            CheckResult::Discrete(value) => {
                sqlx::query(
                    "INSERT INTO measurements_discrete (time, subnet_check_id, check_key, success, result)
                     VALUES ($1, $2, $3, $4, $5)",
                )
                .bind(time_ms)
                .bind(subnet_check_id)
                .bind(check_key)
                .bind(success as i64)
                .bind(&value)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    // --- read path ---

    /// Counters for a single (subnet, day); None when no check was recorded
    /// that day.
    pub async fn get_daily(
        &self,
        subnet: Subnet,
        day: NaiveDate,
    ) -> Result<Option<DailyTotals>, ApiError> {
        let row = sqlx::query(
            "SELECT total, successful FROM daily_measurements WHERE subnet = $1 AND day = $2",
        )
        .bind(subnet.as_str())
        .bind(day)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let total: i64 = row.try_get("total")?;
        let successful: i64 = row.try_get("successful")?;
        Ok(Some(DailyTotals {
            total: total as u64,
            successful: successful as u64,
        }))
    }

    /// Daily rows in [from, to] inclusive, ascending by day. Days with no
    /// recorded measurement are absent, not synthesized as zeros.
    #[instrument(skip(self), fields(repo = "stats", operation = "daily_range"))]
    pub async fn daily_range(
        &self,
        subnet: Subnet,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyMeasurement>, ApiError> {
        let rows = sqlx::query(
            "SELECT day, total, successful FROM daily_measurements
             WHERE subnet = $1 AND day >= $2 AND day <= $3 ORDER BY day ASC",
        )
        .bind(subnet.as_str())
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let day: NaiveDate = row.try_get("day")?;
            let total: i64 = row.try_get("total")?;
            let successful: i64 = row.try_get("successful")?;
            out.push(DailyMeasurement {
                day,
                total: total as u64,
                successful: successful as u64,
            });
        }
        Ok(out)
    }

    /// Averageable buckets for (subnet, check_subject) with bucket_time in
    /// [from_ms, to_ms] inclusive, ascending. An unknown pair is NotFound (a
    /// client error); a known pair with no buckets in range is an empty vec.
    #[instrument(skip(self), fields(repo = "stats", operation = "bucketed_range"))]
    pub async fn bucketed_range(
        &self,
        subnet: Subnet,
        check_subject: &str,
        granularity: Granularity,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<BucketedAggregate>, ApiError> {
        let subnet_check_id = self.require_check(subnet, check_subject).await?;
        let sql = match granularity {
            Granularity::Minutely => MINUTE_AVG_RANGE_SQL,
            Granularity::Hourly => HOURLY_AVG_RANGE_SQL,
        };
        let rows = sqlx::query(sql)
            .bind(subnet_check_id)
            .bind(from_ms)
            .bind(to_ms)
            .fetch_all(&self.pool)
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let bucket_ms: i64 = row.try_get("bucket_time")?;
            out.push(BucketedAggregate {
                bucket_time: DateTime::from_timestamp_millis(bucket_ms).unwrap_or_default(),
                check_key: row.try_get("check_key")?,
                total_checks: row.try_get("total_checks")?,
                successful_checks: row.try_get("successful_checks")?,
                success_rate: row.try_get("success_rate")?,
                avg_result: row.try_get("avg_result")?,
            });
        }
        Ok(out)
    }

    /// Discrete buckets; same contract as `bucketed_range`.
    #[instrument(skip(self), fields(repo = "stats", operation = "discrete_bucketed_range"))]
    pub async fn discrete_bucketed_range(
        &self,
        subnet: Subnet,
        check_subject: &str,
        granularity: Granularity,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<DiscreteBucketedAggregate>, ApiError> {
        let subnet_check_id = self.require_check(subnet, check_subject).await?;
        let sql = match granularity {
            Granularity::Minutely => MINUTE_DISCRETE_RANGE_SQL,
            Granularity::Hourly => HOURLY_DISCRETE_RANGE_SQL,
        };
        let rows = sqlx::query(sql)
            .bind(subnet_check_id)
            .bind(from_ms)
            .bind(to_ms)
            .fetch_all(&self.pool)
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let bucket_ms: i64 = row.try_get("bucket_time")?;
            let results_json: String = row.try_get("results")?;
            let results: Vec<String> = serde_json::from_str(&results_json).unwrap_or_else(|e| {
                tracing::warn!(error = %e, bucket_time = bucket_ms, "corrupt results column, serving empty");
                vec![]
            });
            out.push(DiscreteBucketedAggregate {
                bucket_time: DateTime::from_timestamp_millis(bucket_ms).unwrap_or_default(),
                check_key: row.try_get("check_key")?,
                total_checks: row.try_get("total_checks")?,
                successful_checks: row.try_get("successful_checks")?,
                results,
            });
        }
        Ok(out)
    }

    async fn require_check(&self, subnet: Subnet, check_subject: &str) -> Result<i64, ApiError> {
        self.find_check(subnet, check_subject).await?.ok_or_else(|| {
            ApiError::NotFound(format!(
                "no checks recorded for subnet {subnet} and subject {check_subject}"
            ))
        })
    }

    // --- materializer accessors ---

    /// Minimum raw event time across both raw tables with time < cutoff_ms.
    pub async fn get_min_raw_time_before(&self, cutoff_ms: i64) -> anyhow::Result<Option<i64>> {
        let avg = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT MIN(time) FROM measurements_for_avg WHERE time < $1",
        )
        .bind(cutoff_ms)
        .fetch_one(&self.pool)
        .await?;
        let discrete = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT MIN(time) FROM measurements_discrete WHERE time < $1",
        )
        .bind(cutoff_ms)
        .fetch_one(&self.pool)
        .await?;
        Ok(match (avg, discrete) {
            (Some(a), Some(d)) => Some(a.min(d)),
            (a, d) => a.or(d),
        })
    }

    /// Raw averageable rows in [from_ms, to_ms), in arrival order.
    pub async fn get_raw_avg_rows(
        &self,
        from_ms: i64,
        to_ms: i64,
    ) -> anyhow::Result<Vec<RawAvgRow>> {
        let rows = sqlx::query(
            "SELECT time, subnet_check_id, check_key, success, result FROM measurements_for_avg
             WHERE time >= $1 AND time < $2 ORDER BY time ASC, rowid ASC",
        )
        .bind(from_ms)
        .bind(to_ms)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let success: i64 = row.try_get("success")?;
            out.push(RawAvgRow {
                time: row.try_get("time")?,
                subnet_check_id: row.try_get("subnet_check_id")?,
                check_key: row.try_get("check_key")?,
                success: success != 0,
                result: row.try_get("result")?,
            });
        }
        Ok(out)
    }

    /// Raw discrete rows in [from_ms, to_ms), in arrival order.
    pub async fn get_raw_discrete_rows(
        &self,
        from_ms: i64,
        to_ms: i64,
    ) -> anyhow::Result<Vec<RawDiscreteRow>> {
        let rows = sqlx::query(
            "SELECT time, subnet_check_id, check_key, success, result FROM measurements_discrete
             WHERE time >= $1 AND time < $2 ORDER BY time ASC, rowid ASC",
        )
        .bind(from_ms)
        .bind(to_ms)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let success: i64 = row.try_get("success")?;
            out.push(RawDiscreteRow {
                time: row.try_get("time")?,
                subnet_check_id: row.try_get("subnet_check_id")?,
                check_key: row.try_get("check_key")?,
                success: success != 0,
                result: row.try_get("result")?,
            });
        }
        Ok(out)
    }

    /// Upserts materialized averageable buckets; re-running a fold overwrites
    /// with identical values, so the materializer is idempotent.
    pub async fn save_avg_buckets(
        &self,
        granularity: Granularity,
        buckets: &[AvgBucketRow],
    ) -> anyhow::Result<()> {
        let sql = match granularity {
            Granularity::Minutely => SAVE_MINUTE_AVG_SQL,
            Granularity::Hourly => SAVE_HOURLY_AVG_SQL,
        };
        for b in buckets {
            sqlx::query(sql)
                .bind(b.bucket_time)
                .bind(b.subnet_check_id)
                .bind(&b.check_key)
                .bind(b.total_checks)
                .bind(b.successful_checks)
                .bind(b.success_rate)
                .bind(b.avg_result)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    pub async fn save_discrete_buckets(
        &self,
        granularity: Granularity,
        buckets: &[DiscreteBucketRow],
    ) -> anyhow::Result<()> {
        let sql = match granularity {
            Granularity::Minutely => SAVE_MINUTE_DISCRETE_SQL,
            Granularity::Hourly => SAVE_HOURLY_DISCRETE_SQL,
        };
        for b in buckets {
            let results_json = serde_json::to_string(&b.results)?;
            sqlx::query(sql)
                .bind(b.bucket_time)
                .bind(b.subnet_check_id)
                .bind(&b.check_key)
                .bind(b.total_checks)
                .bind(b.successful_checks)
                .bind(&results_json)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    /// Minute buckets in [from_ms, to_ms) for the hour fold, ascending by
    /// bucket_time.
    pub async fn get_minute_avg_buckets(
        &self,
        from_ms: i64,
        to_ms: i64,
    ) -> anyhow::Result<Vec<AvgBucketRow>> {
        let rows = sqlx::query(
            "SELECT bucket_time, subnet_check_id, check_key, total_checks, successful_checks, success_rate, avg_result
             FROM minute_stats WHERE bucket_time >= $1 AND bucket_time < $2 ORDER BY bucket_time ASC",
        )
        .bind(from_ms)
        .bind(to_ms)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(AvgBucketRow {
                bucket_time: row.try_get("bucket_time")?,
                subnet_check_id: row.try_get("subnet_check_id")?,
                check_key: row.try_get("check_key")?,
                total_checks: row.try_get("total_checks")?,
                successful_checks: row.try_get("successful_checks")?,
                success_rate: row.try_get("success_rate")?,
                avg_result: row.try_get("avg_result")?,
            });
        }
        Ok(out)
    }

    pub async fn get_minute_discrete_buckets(
        &self,
        from_ms: i64,
        to_ms: i64,
    ) -> anyhow::Result<Vec<DiscreteBucketRow>> {
        let rows = sqlx::query(
            "SELECT bucket_time, subnet_check_id, check_key, total_checks, successful_checks, results
             FROM minute_stats_discrete WHERE bucket_time >= $1 AND bucket_time < $2 ORDER BY bucket_time ASC",
        )
        .bind(from_ms)
        .bind(to_ms)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let results_json: String = row.try_get("results")?;
            let results: Vec<String> = serde_json::from_str(&results_json).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "corrupt results column, folding as empty");
                vec![]
            });
            out.push(DiscreteBucketRow {
                bucket_time: row.try_get("bucket_time")?,
                subnet_check_id: row.try_get("subnet_check_id")?,
                check_key: row.try_get("check_key")?,
                total_checks: row.try_get("total_checks")?,
                successful_checks: row.try_get("successful_checks")?,
                results,
            });
        }
        Ok(out)
    }

    /// Minimum minute bucket_time across both minute tables.
    pub async fn get_min_minute_bucket_time(&self) -> anyhow::Result<Option<i64>> {
        let avg = sqlx::query_scalar::<_, Option<i64>>("SELECT MIN(bucket_time) FROM minute_stats")
            .fetch_one(&self.pool)
            .await?;
        let discrete =
            sqlx::query_scalar::<_, Option<i64>>("SELECT MIN(bucket_time) FROM minute_stats_discrete")
                .fetch_one(&self.pool)
                .await?;
        Ok(match (avg, discrete) {
            (Some(a), Some(d)) => Some(a.min(d)),
            (a, d) => a.or(d),
        })
    }

    /// Delete raw rows in [from_ms, to_ms) from both raw tables.
    #[instrument(skip(self), fields(repo = "stats", operation = "delete_raw_range"))]
    pub async fn delete_raw_range(&self, from_ms: i64, to_ms: i64) -> anyhow::Result<u64> {
        let a = sqlx::query("DELETE FROM measurements_for_avg WHERE time >= $1 AND time < $2")
            .bind(from_ms)
            .bind(to_ms)
            .execute(&self.pool)
            .await?;
        let d = sqlx::query("DELETE FROM measurements_discrete WHERE time >= $1 AND time < $2")
            .bind(from_ms)
            .bind(to_ms)
            .execute(&self.pool)
            .await?;
        Ok(a.rows_affected() + d.rows_affected())
    }

    /// Hour-fold watermark and friends; key/value like a schema_version table.
    pub async fn get_rollup_state(&self, key: &str) -> anyhow::Result<Option<i64>> {
        let v = sqlx::query_scalar::<_, i64>("SELECT value FROM rollup_state WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(v)
    }

    pub async fn set_rollup_state(&self, key: &str, value: i64) -> anyhow::Result<()> {
        sqlx::query("INSERT OR REPLACE INTO rollup_state (key, value) VALUES ($1, $2)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Prune bucket rows older than the retention window.
    #[instrument(skip(self), fields(repo = "stats", operation = "prune_old_buckets"))]
    pub async fn prune_old_buckets(&self) -> anyhow::Result<u64> {
        let cutoff = now_ms() - self.retention_ms;
        let mut pruned = 0u64;
        for sql in [
            "DELETE FROM minute_stats WHERE bucket_time < $1",
            "DELETE FROM hourly_stats WHERE bucket_time < $1",
            "DELETE FROM minute_stats_discrete WHERE bucket_time < $1",
            "DELETE FROM hourly_stats_discrete WHERE bucket_time < $1",
        ] {
            let r = sqlx::query(sql).bind(cutoff).execute(&self.pool).await?;
            pruned += r.rows_affected();
        }
        Ok(pruned)
    }

    /// Reclaim space after deletes (run periodically after pruning).
    #[instrument(skip(self), fields(repo = "stats", operation = "vacuum"))]
    pub async fn vacuum(&self) -> anyhow::Result<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }
}
