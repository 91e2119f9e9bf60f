//! Recovery for snapshots stranded in the pending phase.
//!
//! A crash between the pending insert and snapshot completion leaves a row
//! at `is_done = false` forever. The sweeper periodically completes such
//! rows as failed instead of retrying them: startup re-arms every monitor
//! chain wholesale, so a retry would double-probe.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};

use crate::database::Database;

/// Error message written to snapshots failed by the sweep.
pub const INTERRUPTED_MESSAGE: &str = "probe interrupted";

#[derive(Debug, Clone)]
pub struct SweepPolicy {
    /// Seconds a snapshot may stay pending before it is failed. Must stay
    /// well above the probe timeout.
    pub fail_after_seconds: i64,
    /// Seconds between sweep cycles.
    pub interval_seconds: u64,
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self { fail_after_seconds: 600, interval_seconds: 300 }
    }
}

/// Marks snapshots stranded at pending as failed.
pub struct SnapshotSweeper {
    database: Arc<dyn Database>,
    policy: SweepPolicy,
}

impl SnapshotSweeper {
    pub fn new(database: Arc<dyn Database>, policy: SweepPolicy) -> Self {
        Self { database, policy }
    }

    /// One sweep cycle; returns the number of snapshots failed.
    pub async fn sweep_once(&self) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.policy.fail_after_seconds);
        let stale = self.database.stale_pending_snapshots(cutoff).await?;

        for snapshot in &stale {
            if let Some(id) = snapshot.id {
                self.database.fail_snapshot(id, INTERRUPTED_MESSAGE).await?;
                warn!(
                    snapshot_id = id,
                    monitor = %snapshot.monitor_uuid,
                    "failed stranded pending snapshot"
                );
            }
        }

        Ok(stale.len())
    }

    /// Start the background sweep task.
    pub fn start_periodic(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(self.policy.interval_seconds));

            loop {
                interval.tick().await;

                match self.sweep_once().await {
                    Ok(0) => {}
                    Ok(count) => info!("sweep failed {count} stranded snapshots"),
                    Err(e) => warn!("snapshot sweep failed: {e:#}"),
                }
            }
        })
    }
}
