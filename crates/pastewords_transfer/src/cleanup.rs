//! Background sweep of abandoned reservations.
//!
//! Removes `Empty` records whose sender never uploaded and `Consumed`
//! rows whose post-delivery delete failed. Correctness never depends on it.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use pastewords_storage::{StoreResult, TransferStore};
use tokio::time::interval;

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub enabled: bool,
    pub interval: Duration,
    /// Age after which an `Empty` record counts as abandoned.
    pub stale_after: Duration,
}

/// Run one sweep, returning how many records were removed.
pub async fn sweep_once(store: &dyn TransferStore, stale_after: Duration) -> StoreResult<u64> {
    let cutoff = chrono::Duration::from_std(stale_after)
        .ok()
        .and_then(|age| Utc::now().checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    store.purge_stale(cutoff).await
}

pub fn spawn_stale_sweeper(
    store: Arc<dyn TransferStore>,
    config: SweepConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("stale sweeper disabled");
            return;
        }

        tracing::info!(
            interval_secs = config.interval.as_secs(),
            stale_after_secs = config.stale_after.as_secs(),
            "stale sweeper started"
        );
        let mut timer = interval(config.interval);

        loop {
            timer.tick().await;

            match sweep_once(store.as_ref(), config.stale_after).await {
                Ok(0) => tracing::debug!("sweep: nothing stale"),
                Ok(removed) => tracing::info!(removed, "sweep: removed stale transfers"),
                Err(e) => tracing::error!(error = %e, "sweep failed"),
            }
        }
    })
}
