pub mod analysis;
pub mod analyzer;
pub mod auth;
pub mod error;
pub mod limiter;
pub mod middleware;
pub mod subscriptions;
pub mod tickets;
pub mod version;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use tracing::warn;

/// Run blocking DB work off the async runtime.
pub(crate) async fn blocking<T, F>(f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))?
}

/// Timestamps come back from SQLite either as RFC 3339 (app-written) or as
/// "YYYY-MM-DD HH:MM:SS" (column defaults). Parse both, warn on garbage.
pub(crate) fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}
