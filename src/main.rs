use anyhow::Result;
use std::sync::Arc;
use subnet_api::*;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;

    let stats_repo = Arc::new(
        stats_repo::StatsRepo::connect(
            &app_config.database.path,
            app_config.database.max_pool_size,
            app_config.rollup.retention_days,
        )
        .await?,
    );
    stats_repo.init().await?;

    // Catch up on buckets that closed while the service was down.
    if let Err(e) = rollup_worker::run_one_tick(&stats_repo).await {
        tracing::warn!(error = %e, "startup rollup pass failed");
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let worker_handle = rollup_worker::spawn(
        stats_repo.clone(),
        rollup_worker::RollupWorkerConfig {
            interval_secs: app_config.rollup.interval_secs,
            vacuum_schedule: app_config.rollup.vacuum_schedule.clone(),
            vacuum_interval_secs: app_config.rollup.vacuum_interval_secs,
        },
        shutdown_rx,
    );

    let app = routes::app(stats_repo);
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(s) => s,
                    Err(_) => {
                        let _ = tokio::signal::ctrl_c().await;
                        return;
                    }
                };
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                tokio::signal::ctrl_c().await
            }
        } => {
            tracing::info!("Received shutdown signal");
            let _ = shutdown_tx.send(());
            let _ = worker_handle.await;
        }
    }

    Ok(())
}
