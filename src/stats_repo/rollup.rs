// Rollup: schema for bucket tables + pure fold logic.
// DB access (get by range, save, delete) stays in stats_repo::mod.

use std::collections::HashMap;

use sqlx::SqlitePool;

/// One raw averageable event row.
#[derive(Debug, Clone, PartialEq)]
pub struct RawAvgRow {
    pub time: i64,
    pub subnet_check_id: i64,
    pub check_key: String,
    pub success: bool,
    pub result: f64,
}

/// One raw discrete event row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDiscreteRow {
    pub time: i64,
    pub subnet_check_id: i64,
    pub check_key: String,
    pub success: bool,
    pub result: String,
}

/// A materialized averageable bucket, keyed by (bucket_time, subnet_check_id, check_key).
#[derive(Debug, Clone, PartialEq)]
pub struct AvgBucketRow {
    pub bucket_time: i64,
    pub subnet_check_id: i64,
    pub check_key: String,
    pub total_checks: i64,
    pub successful_checks: i64,
    pub success_rate: f64,
    pub avg_result: f64,
}

/// A materialized discrete bucket. `results` holds the literal result strings
/// in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscreteBucketRow {
    pub bucket_time: i64,
    pub subnet_check_id: i64,
    pub check_key: String,
    pub total_checks: i64,
    pub successful_checks: i64,
    pub results: Vec<String>,
}

/// Creates the minute/hour bucket tables and their indexes if not present.
pub async fn init_bucket_tables(pool: &SqlitePool) -> anyhow::Result<()> {
    for table in ["minute_stats", "hourly_stats"] {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                bucket_time INTEGER NOT NULL,
                subnet_check_id INTEGER NOT NULL,
                check_key TEXT NOT NULL,
                total_checks INTEGER NOT NULL,
                successful_checks INTEGER NOT NULL,
                success_rate REAL NOT NULL,
                avg_result REAL NOT NULL,
                UNIQUE(bucket_time, subnet_check_id, check_key)
            )
            "#
        ))
        .execute(pool)
        .await?;
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_check_time ON {table}(subnet_check_id, bucket_time)"
        ))
        .execute(pool)
        .await?;
    }

    for table in ["minute_stats_discrete", "hourly_stats_discrete"] {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                bucket_time INTEGER NOT NULL,
                subnet_check_id INTEGER NOT NULL,
                check_key TEXT NOT NULL,
                total_checks INTEGER NOT NULL,
                successful_checks INTEGER NOT NULL,
                results TEXT NOT NULL,
                UNIQUE(bucket_time, subnet_check_id, check_key)
            )
            "#
        ))
        .execute(pool)
        .await?;
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_check_time ON {table}(subnet_check_id, bucket_time)"
        ))
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// Folds raw averageable rows of one bucket window into per-(check, key)
/// buckets. `rows` must already be limited to the window.
pub fn fold_avg_rows(rows: &[RawAvgRow], bucket_time: i64) -> Vec<AvgBucketRow> {
    let mut by_key: HashMap<(i64, &str), Vec<&RawAvgRow>> = HashMap::new();
    for r in rows {
        by_key
            .entry((r.subnet_check_id, r.check_key.as_str()))
            .or_default()
            .push(r);
    }

    let mut out: Vec<AvgBucketRow> = Vec::with_capacity(by_key.len());
    for ((subnet_check_id, check_key), refs) in by_key {
        let total_checks = refs.len() as i64;
        let successful_checks = refs.iter().filter(|r| r.success).count() as i64;
        let avg_result = mean_f64(&refs.iter().map(|r| r.result).collect::<Vec<_>>());
        out.push(AvgBucketRow {
            bucket_time,
            subnet_check_id,
            check_key: check_key.to_string(),
            total_checks,
            successful_checks,
            success_rate: rate(successful_checks, total_checks),
            avg_result,
        });
    }
    out.sort_by(|a, b| {
        (a.subnet_check_id, &a.check_key).cmp(&(b.subnet_check_id, &b.check_key))
    });
    out
}

/// Folds raw discrete rows of one bucket window. `rows` must be in arrival
/// order (time, then insertion order); each group's `results` preserves it.
pub fn fold_discrete_rows(rows: &[RawDiscreteRow], bucket_time: i64) -> Vec<DiscreteBucketRow> {
    let mut by_key: HashMap<(i64, &str), Vec<&RawDiscreteRow>> = HashMap::new();
    for r in rows {
        by_key
            .entry((r.subnet_check_id, r.check_key.as_str()))
            .or_default()
            .push(r);
    }

    let mut out: Vec<DiscreteBucketRow> = Vec::with_capacity(by_key.len());
    for ((subnet_check_id, check_key), refs) in by_key {
        let total_checks = refs.len() as i64;
        let successful_checks = refs.iter().filter(|r| r.success).count() as i64;
        let results = refs.iter().map(|r| r.result.clone()).collect();
        out.push(DiscreteBucketRow {
            bucket_time,
            subnet_check_id,
            check_key: check_key.to_string(),
            total_checks,
            successful_checks,
            results,
        });
    }
    out.sort_by(|a, b| {
        (a.subnet_check_id, &a.check_key).cmp(&(b.subnet_check_id, &b.check_key))
    });
    out
}

/// Folds minute buckets of one hour window into hour buckets. Averages are
/// weighted by each minute's total_checks.
pub fn fold_avg_buckets(buckets: &[AvgBucketRow], bucket_time: i64) -> Vec<AvgBucketRow> {
    let mut by_key: HashMap<(i64, &str), Vec<&AvgBucketRow>> = HashMap::new();
    for b in buckets {
        by_key
            .entry((b.subnet_check_id, b.check_key.as_str()))
            .or_default()
            .push(b);
    }

    let mut out: Vec<AvgBucketRow> = Vec::with_capacity(by_key.len());
    for ((subnet_check_id, check_key), refs) in by_key {
        let total_checks: i64 = refs.iter().map(|b| b.total_checks).sum();
        let successful_checks: i64 = refs.iter().map(|b| b.successful_checks).sum();
        let weighted_sum: f64 = refs
            .iter()
            .map(|b| b.avg_result * b.total_checks as f64)
            .sum();
        let avg_result = if total_checks > 0 {
            weighted_sum / total_checks as f64
        } else {
            0.0
        };
        out.push(AvgBucketRow {
            bucket_time,
            subnet_check_id,
            check_key: check_key.to_string(),
            total_checks,
            successful_checks,
            success_rate: rate(successful_checks, total_checks),
            avg_result,
        });
    }
    out.sort_by(|a, b| {
        (a.subnet_check_id, &a.check_key).cmp(&(b.subnet_check_id, &b.check_key))
    });
    out
}

/// Folds minute discrete buckets of one hour window. `buckets` must be in
/// bucket_time order so concatenated `results` stay in arrival order.
pub fn fold_discrete_buckets(
    buckets: &[DiscreteBucketRow],
    bucket_time: i64,
) -> Vec<DiscreteBucketRow> {
    let mut by_key: HashMap<(i64, &str), Vec<&DiscreteBucketRow>> = HashMap::new();
    for b in buckets {
        by_key
            .entry((b.subnet_check_id, b.check_key.as_str()))
            .or_default()
            .push(b);
    }

    let mut out: Vec<DiscreteBucketRow> = Vec::with_capacity(by_key.len());
    for ((subnet_check_id, check_key), refs) in by_key {
        let total_checks: i64 = refs.iter().map(|b| b.total_checks).sum();
        let successful_checks: i64 = refs.iter().map(|b| b.successful_checks).sum();
        let mut results = Vec::with_capacity(total_checks.max(0) as usize);
        for b in &refs {
            results.extend(b.results.iter().cloned());
        }
        out.push(DiscreteBucketRow {
            bucket_time,
            subnet_check_id,
            check_key: check_key.to_string(),
            total_checks,
            successful_checks,
            results,
        });
    }
    out.sort_by(|a, b| {
        (a.subnet_check_id, &a.check_key).cmp(&(b.subnet_check_id, &b.check_key))
    });
    out
}

fn rate(successful: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    successful as f64 / total as f64
}

fn mean_f64(v: &[f64]) -> f64 {
    if v.is_empty() {
        return 0.0;
    }
    v.iter().sum::<f64>() / (v.len() as f64)
}
