// StatsRepo tests: daily upserts under concurrency, identity resolution, range queries

use chrono::NaiveDate;
use std::sync::Arc;
use subnet_api::models::{CheckResult, DailyTotals};
use subnet_api::stats_repo::StatsRepo;
use subnet_api::subnet::Subnet;
use tempfile::TempDir;
use tokio::task::JoinSet;

async fn test_repo(dir: &TempDir) -> StatsRepo {
    let path = dir.path().join("stats.db");
    let repo = StatsRepo::connect(path.to_str().unwrap(), 5, 30)
        .await
        .unwrap();
    repo.init().await.unwrap();
    repo
}

fn day(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

#[tokio::test]
async fn connect_and_init() {
    let dir = TempDir::new().unwrap();
    let repo = test_repo(&dir).await;
    // Second init is no-op (IF NOT EXISTS)
    repo.init().await.unwrap();
}

#[tokio::test]
async fn record_daily_inserts_then_increments() {
    let dir = TempDir::new().unwrap();
    let repo = test_repo(&dir).await;
    let d = day("2025-01-15");

    repo.record_daily_on(Subnet::Walrus, d, true).await.unwrap();
    let totals = repo.get_daily(Subnet::Walrus, d).await.unwrap().unwrap();
    assert_eq!(
        totals,
        DailyTotals {
            total: 1,
            successful: 1
        }
    );

    repo.record_daily_on(Subnet::Walrus, d, false).await.unwrap();
    repo.record_daily_on(Subnet::Walrus, d, true).await.unwrap();
    let totals = repo.get_daily(Subnet::Walrus, d).await.unwrap().unwrap();
    assert_eq!(
        totals,
        DailyTotals {
            total: 3,
            successful: 2
        }
    );
}

#[tokio::test]
async fn record_daily_keys_are_independent() {
    let dir = TempDir::new().unwrap();
    let repo = test_repo(&dir).await;
    let d = day("2025-01-15");

    repo.record_daily_on(Subnet::Walrus, d, true).await.unwrap();
    repo.record_daily_on(Subnet::Arweave, d, false).await.unwrap();
    repo.record_daily_on(Subnet::Walrus, day("2025-01-16"), true)
        .await
        .unwrap();

    let walrus = repo.get_daily(Subnet::Walrus, d).await.unwrap().unwrap();
    assert_eq!(walrus.total, 1);
    let arweave = repo.get_daily(Subnet::Arweave, d).await.unwrap().unwrap();
    assert_eq!(arweave.total, 1);
    assert_eq!(arweave.successful, 0);
}

#[tokio::test]
async fn no_lost_updates_under_100_concurrent_writers() {
    let dir = TempDir::new().unwrap();
    let repo = Arc::new(test_repo(&dir).await);
    let d = day("2025-02-01");

    let mut set = JoinSet::new();
    for _ in 0..100 {
        let repo = repo.clone();
        set.spawn(async move { repo.record_daily_on(Subnet::Walrus, d, true).await });
    }
    while let Some(res) = set.join_next().await {
        res.unwrap().unwrap();
    }

    let totals = repo.get_daily(Subnet::Walrus, d).await.unwrap().unwrap();
    assert_eq!(totals.total, 100);
    assert_eq!(totals.successful, 100);
}

#[tokio::test]
async fn mixed_outcomes_count_successes_separately() {
    let dir = TempDir::new().unwrap();
    let repo = Arc::new(test_repo(&dir).await);
    let d = day("2025-02-02");

    let mut set = JoinSet::new();
    for succeeded in [true, true, true, false, false] {
        let repo = repo.clone();
        set.spawn(async move { repo.record_daily_on(Subnet::Arweave, d, succeeded).await });
    }
    while let Some(res) = set.join_next().await {
        res.unwrap().unwrap();
    }

    let totals = repo.get_daily(Subnet::Arweave, d).await.unwrap().unwrap();
    assert_eq!(totals.total, 5);
    assert_eq!(totals.successful, 3);
}

#[tokio::test]
async fn get_daily_unknown_day_returns_none() {
    let dir = TempDir::new().unwrap();
    let repo = test_repo(&dir).await;
    let totals = repo.get_daily(Subnet::Walrus, day("1999-01-01")).await.unwrap();
    assert!(totals.is_none());
}

#[tokio::test]
async fn daily_range_is_inclusive_and_ordered() {
    let dir = TempDir::new().unwrap();
    let repo = test_repo(&dir).await;

    // Out-of-range rows on both sides, in-range rows inserted out of order.
    repo.record_daily_on(Subnet::Walrus, day("2024-12-01"), true)
        .await
        .unwrap();
    repo.record_daily_on(Subnet::Walrus, day("2024-12-31"), true)
        .await
        .unwrap();
    repo.record_daily_on(Subnet::Walrus, day("2025-01-02"), false)
        .await
        .unwrap();
    repo.record_daily_on(Subnet::Walrus, day("2025-01-01"), true)
        .await
        .unwrap();

    let rows = repo
        .daily_range(Subnet::Walrus, day("2025-01-01"), day("2025-01-02"))
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].day, day("2025-01-01"));
    assert_eq!(rows[0].total, 1);
    assert_eq!(rows[0].successful, 1);
    assert_eq!(rows[1].day, day("2025-01-02"));
    assert_eq!(rows[1].successful, 0);
}

#[tokio::test]
async fn daily_range_skips_days_with_no_data() {
    let dir = TempDir::new().unwrap();
    let repo = test_repo(&dir).await;

    repo.record_daily_on(Subnet::Walrus, day("2025-03-01"), true)
        .await
        .unwrap();
    repo.record_daily_on(Subnet::Walrus, day("2025-03-03"), true)
        .await
        .unwrap();

    let rows = repo
        .daily_range(Subnet::Walrus, day("2025-03-01"), day("2025-03-03"))
        .await
        .unwrap();
    // 2025-03-02 has no measurements and is not synthesized as a zero row.
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].day, day("2025-03-01"));
    assert_eq!(rows[1].day, day("2025-03-03"));
}

#[tokio::test]
async fn daily_range_empty_is_ok_not_error() {
    let dir = TempDir::new().unwrap();
    let repo = test_repo(&dir).await;
    let rows = repo
        .daily_range(Subnet::Allsyn, day("2025-01-01"), day("2025-12-31"))
        .await
        .unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn resolve_check_creates_then_returns_same_id() {
    let dir = TempDir::new().unwrap();
    let repo = test_repo(&dir).await;

    let first = repo.resolve_check(Subnet::Walrus, "node-1").await.unwrap();
    let second = repo.resolve_check(Subnet::Walrus, "node-1").await.unwrap();
    assert_eq!(first, second);

    // Different subject and different subnet both get distinct identities.
    let other_subject = repo.resolve_check(Subnet::Walrus, "node-2").await.unwrap();
    assert_ne!(first, other_subject);
    let other_subnet = repo.resolve_check(Subnet::Arweave, "node-1").await.unwrap();
    assert_ne!(first, other_subnet);
}

#[tokio::test]
async fn resolve_check_concurrent_first_use_yields_one_row() {
    let dir = TempDir::new().unwrap();
    let repo = Arc::new(test_repo(&dir).await);

    let mut set = JoinSet::new();
    for _ in 0..20 {
        let repo = repo.clone();
        set.spawn(async move { repo.resolve_check(Subnet::Allsyn, "fresh-subject").await });
    }
    let mut ids = Vec::new();
    while let Some(res) = set.join_next().await {
        ids.push(res.unwrap().unwrap());
    }
    assert_eq!(ids.len(), 20);
    assert!(ids.iter().all(|id| *id == ids[0]));

    let found = repo.find_check(Subnet::Allsyn, "fresh-subject").await.unwrap();
    assert_eq!(found, Some(ids[0]));
}

#[tokio::test]
async fn find_check_never_creates() {
    let dir = TempDir::new().unwrap();
    let repo = test_repo(&dir).await;

    assert_eq!(repo.find_check(Subnet::Walrus, "ghost").await.unwrap(), None);
    // Still absent after the lookup.
    assert_eq!(repo.find_check(Subnet::Walrus, "ghost").await.unwrap(), None);
}

#[tokio::test]
async fn record_event_routes_by_shape() {
    let dir = TempDir::new().unwrap();
    let repo = test_repo(&dir).await;

    repo.record_event_at(
        1_000,
        Subnet::Walrus,
        "node-1",
        "latency",
        true,
        CheckResult::Averageable(12.5),
    )
    .await
    .unwrap();
    repo.record_event_at(
        2_000,
        Subnet::Walrus,
        "node-1",
        "status",
        false,
        CheckResult::Discrete("error".into()),
    )
    .await
    .unwrap();

    let avg_rows = repo.get_raw_avg_rows(0, 10_000).await.unwrap();
    assert_eq!(avg_rows.len(), 1);
    assert_eq!(avg_rows[0].check_key, "latency");
    assert_eq!(avg_rows[0].result, 12.5);
    assert!(avg_rows[0].success);

    let discrete_rows = repo.get_raw_discrete_rows(0, 10_000).await.unwrap();
    assert_eq!(discrete_rows.len(), 1);
    assert_eq!(discrete_rows[0].result, "error");
    assert!(!discrete_rows[0].success);

    // Both events share one check identity.
    assert_eq!(avg_rows[0].subnet_check_id, discrete_rows[0].subnet_check_id);
}

#[tokio::test]
async fn bucketed_range_unknown_subject_is_not_found() {
    let dir = TempDir::new().unwrap();
    let repo = test_repo(&dir).await;

    let err = repo
        .bucketed_range(
            Subnet::Walrus,
            "never-recorded",
            subnet_api::models::Granularity::Minutely,
            0,
            i64::MAX,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, subnet_api::error::ApiError::NotFound(_)));
}

#[tokio::test]
async fn corrupt_results_column_is_served_as_empty() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("stats.db");
    let repo = StatsRepo::connect(path.to_str().unwrap(), 5, 30)
        .await
        .unwrap();
    repo.init().await.unwrap();
    let id = repo.resolve_check(Subnet::Walrus, "node-1").await.unwrap();

    // A hand-broken results column must not fail the whole read.
    let pool = sqlx::sqlite::SqlitePool::connect(&format!("sqlite:{}", path.display()))
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO minute_stats_discrete (bucket_time, subnet_check_id, check_key, total_checks, successful_checks, results)
         VALUES ($1, $2, 'status', 2, 1, 'not json')",
    )
    .bind(60_000i64)
    .bind(id)
    .execute(&pool)
    .await
    .unwrap();

    let buckets = repo
        .discrete_bucketed_range(
            Subnet::Walrus,
            "node-1",
            subnet_api::models::Granularity::Minutely,
            0,
            120_000,
        )
        .await
        .unwrap();
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].total_checks, 2);
    assert!(buckets[0].results.is_empty());
}

#[tokio::test]
async fn bucketed_range_known_subject_empty_range_is_empty_vec() {
    let dir = TempDir::new().unwrap();
    let repo = test_repo(&dir).await;

    repo.resolve_check(Subnet::Walrus, "node-1").await.unwrap();
    let buckets = repo
        .bucketed_range(
            Subnet::Walrus,
            "node-1",
            subnet_api::models::Granularity::Hourly,
            0,
            i64::MAX,
        )
        .await
        .unwrap();
    assert!(buckets.is_empty());
}
