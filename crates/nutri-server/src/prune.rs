use std::time::Duration;

use chrono::{Days, Local};
use tracing::{info, warn};

use nutri_api::auth::AppState;

const PRUNE_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

/// Background task that prunes stale daily analysis counters.
///
/// Counter rows only matter for the current day; anything older than the
/// retention window is dead weight and gets deleted on an interval.
pub async fn run_prune_loop(state: AppState, retention_days: i64) {
    let mut interval = tokio::time::interval(PRUNE_INTERVAL);

    loop {
        interval.tick().await;

        match prune_stale_counters(&state, retention_days).await {
            Ok(count) => {
                if count > 0 {
                    info!("Prune: removed {} stale analysis counters", count);
                }
            }
            Err(e) => {
                warn!("Prune error: {}", e);
            }
        }
    }
}

async fn prune_stale_counters(state: &AppState, retention_days: i64) -> anyhow::Result<usize> {
    let cutoff = Local::now()
        .date_naive()
        .checked_sub_days(Days::new(retention_days.max(0) as u64))
        .unwrap_or_else(|| Local::now().date_naive())
        .format("%Y-%m-%d")
        .to_string();

    let db = state.clone();
    tokio::task::spawn_blocking(move || db.db.prune_counters_before(&cutoff))
        .await
        .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {}", e))?
}
