//! Periodic background refresh of the active generation.

use std::sync::Arc;
use std::time::Duration;

use offcache_core::Error;
use offcache_worker::{OfflineWorker, SYNC_UPDATE_CONTENT};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

/// Run the `update-content` periodic sync every `period`. The first refresh
/// happens one full period after startup.
pub fn spawn_periodic_update(worker: Arc<OfflineWorker>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match worker.on_periodic_sync(SYNC_UPDATE_CONTENT).await {
                Ok(report) => tracing::info!(
                    generation = %report.generation_id,
                    refreshed = report.refreshed,
                    failed = report.failed.len(),
                    "periodic update finished"
                ),
                Err(Error::NoActiveGeneration) => tracing::debug!("periodic update skipped; nothing active"),
                Err(e) => tracing::warn!(error = %e, "periodic update failed"),
            }
        }
    })
}
