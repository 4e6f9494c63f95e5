// Background materializer: fold raw events → minute buckets, then minute →
// hour buckets, then prune. Only fully closed buckets are materialized, one
// minute behind the clock, so a tick never observes a partial bucket and
// re-running a fold is idempotent. VACUUM runs on a configurable schedule
// (cron expression or fixed interval).

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::models::Granularity;
use crate::stats_repo::StatsRepo;
use crate::stats_repo::rollup;
use tracing::{info, instrument, warn};

const MS_PER_MINUTE: i64 = 60_000;
const MS_PER_HOUR: i64 = 3_600_000;
const HOURLY_WATERMARK_KEY: &str = "hourly_watermark";

/// Config for the rollup worker.
#[derive(Debug, Clone)]
pub struct RollupWorkerConfig {
    pub interval_secs: u64,
    /// Optional cron expression for VACUUM (e.g. "0 0 3 * * *" = 03:00 daily). Uses local time.
    pub vacuum_schedule: Option<String>,
    /// Run VACUUM every N seconds when vacuum_schedule is not set.
    pub vacuum_interval_secs: u64,
}

/// Spawns the rollup worker. Returns a join handle.
pub fn spawn(
    repo: Arc<StatsRepo>,
    config: RollupWorkerConfig,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run(repo, config, shutdown_rx).await;
    })
}

#[instrument(skip(repo, shutdown_rx), fields(interval_secs = config.interval_secs))]
async fn run(
    repo: Arc<StatsRepo>,
    config: RollupWorkerConfig,
    mut shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) {
    let mut rollup_interval = tokio::time::interval(Duration::from_secs(config.interval_secs));
    rollup_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let (vacuum_tx, mut vacuum_rx) = tokio::sync::mpsc::channel::<()>(1);
    tokio::spawn(vacuum_scheduler(config.clone(), vacuum_tx));

    loop {
        tokio::select! {
            _ = rollup_interval.tick() => {
                if let Err(e) = run_one_tick(&repo).await {
                    warn!(error = %e, "rollup tick failed");
                }
            }
            _ = vacuum_rx.recv() => {
                if let Err(e) = repo.vacuum().await {
                    warn!(error = %e, "vacuum failed");
                } else {
                    info!("vacuum complete");
                }
            }
            _ = &mut shutdown_rx => {
                info!("rollup worker shutting down");
                break;
            }
        }
    }
}

/// Sends a message on `tx` at each VACUUM time (cron or fixed interval). Uses local time for cron.
async fn vacuum_scheduler(config: RollupWorkerConfig, tx: tokio::sync::mpsc::Sender<()>) {
    if let Some(ref cron_str) = config.vacuum_schedule {
        let Ok(schedule) = cron::Schedule::from_str(cron_str) else {
            warn!(cron = %cron_str, "invalid vacuum_schedule; VACUUM will not run");
            return;
        };
        loop {
            let now = chrono::Local::now();
            let next = schedule.after(&now).next();
            if let Some(next) = next {
                let delay = (next - now).to_std().unwrap_or(Duration::from_secs(1));
                tokio::time::sleep(delay).await;
                if tx.send(()).await.is_err() {
                    break;
                }
            } else {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }
    } else {
        let interval = Duration::from_secs(config.vacuum_interval_secs);
        loop {
            tokio::time::sleep(interval).await;
            if tx.send(()).await.is_err() {
                break;
            }
        }
    }
}

/// Runs one rollup pass (raw → minute, minute → hour, prune). Used by the
/// worker loop and by the startup pass in main.
pub async fn run_one_tick(repo: &StatsRepo) -> anyhow::Result<()> {
    let now_ms = chrono::Utc::now().timestamp_millis();
    // The fold lags one minute behind the clock: a writer stamps its event
    // time before inserting, so an event stamped just ahead of a minute
    // boundary may commit after a fold has already read that minute. One
    // minute of lag guarantees such inserts land before their minute folds.
    let cutoff = (now_ms / MS_PER_MINUTE) * MS_PER_MINUTE - MS_PER_MINUTE;
    fold_raw_to_minutes(repo, cutoff).await?;
    fold_minutes_to_hours(repo, cutoff).await?;
    let pruned = repo.prune_old_buckets().await?;
    if pruned > 0 {
        info!(pruned_buckets = pruned, "retention prune");
    }
    Ok(())
}

/// Folds raw events with time < cutoff_ms into minute buckets and deletes the
/// folded rows. Walks from one non-empty minute to the next: deleting a
/// folded bucket's rows moves the minimum forward, so gaps (an idle service,
/// a long downtime) cost no per-minute queries.
async fn fold_raw_to_minutes(repo: &StatsRepo, cutoff_ms: i64) -> anyhow::Result<()> {
    let mut folded_count: u32 = 0;

    while let Some(min_ts) = repo.get_min_raw_time_before(cutoff_ms).await? {
        let bucket_start = (min_ts / MS_PER_MINUTE) * MS_PER_MINUTE;
        let bucket_end = bucket_start + MS_PER_MINUTE;

        let avg_rows = repo.get_raw_avg_rows(bucket_start, bucket_end).await?;
        if !avg_rows.is_empty() {
            let buckets = rollup::fold_avg_rows(&avg_rows, bucket_start);
            repo.save_avg_buckets(Granularity::Minutely, &buckets).await?;
        }

        let discrete_rows = repo.get_raw_discrete_rows(bucket_start, bucket_end).await?;
        if !discrete_rows.is_empty() {
            let buckets = rollup::fold_discrete_rows(&discrete_rows, bucket_start);
            repo.save_discrete_buckets(Granularity::Minutely, &buckets)
                .await?;
        }

        // min_ts came from this minute, so at least one shape folded.
        folded_count += 1;
        let _ = repo.delete_raw_range(bucket_start, bucket_end).await?;
    }

    if folded_count > 0 {
        info!(folded_buckets = folded_count, "raw -> minute rollup");
    }
    Ok(())
}

/// Folds minute buckets into closed hour buckets. Minute rows stay (they are
/// served directly); a watermark records the last materialized hour so ticks
/// do not refold old hours. An hour folds only once every one of its minutes
/// has been materialized, i.e. up to the minute fold's cutoff.
async fn fold_minutes_to_hours(repo: &StatsRepo, minute_cutoff_ms: i64) -> anyhow::Result<()> {
    let cutoff = (minute_cutoff_ms / MS_PER_HOUR) * MS_PER_HOUR;

    let mut bucket_start = match repo.get_rollup_state(HOURLY_WATERMARK_KEY).await? {
        Some(watermark) => watermark,
        None => {
            let Some(min_ts) = repo.get_min_minute_bucket_time().await? else {
                return Ok(());
            };
            (min_ts / MS_PER_HOUR) * MS_PER_HOUR
        }
    };

    let mut folded_count: u32 = 0;
    while bucket_start + MS_PER_HOUR <= cutoff {
        let bucket_end = bucket_start + MS_PER_HOUR;

        let minute_buckets = repo.get_minute_avg_buckets(bucket_start, bucket_end).await?;
        if !minute_buckets.is_empty() {
            let buckets = rollup::fold_avg_buckets(&minute_buckets, bucket_start);
            repo.save_avg_buckets(Granularity::Hourly, &buckets).await?;
            folded_count += 1;
        }

        let minute_discrete = repo
            .get_minute_discrete_buckets(bucket_start, bucket_end)
            .await?;
        if !minute_discrete.is_empty() {
            let buckets = rollup::fold_discrete_buckets(&minute_discrete, bucket_start);
            repo.save_discrete_buckets(Granularity::Hourly, &buckets)
                .await?;
        }

        bucket_start += MS_PER_HOUR;
    }
    repo.set_rollup_state(HOURLY_WATERMARK_KEY, bucket_start).await?;

    if folded_count > 0 {
        info!(folded_buckets = folded_count, "minute -> hour rollup");
    }
    Ok(())
}
