use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::future::BoxFuture;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::executor::ProbeExecutor;
use super::notifier::NotificationEngine;
use crate::database::Database;
use crate::database::models::{Monitor, Snapshot};

/// A unit of delayed work bound to one monitor.
pub type Task = BoxFuture<'static, ()>;

/// Delayed task queue collaborator.
///
/// Runs `task` at or after `delay` from now, on a dedicated lane reserved
/// for monitoring tasks. At-least-once execution; no ordering guarantee
/// across monitors. Tasks for one monitor are serialized by construction:
/// each task enqueues its successor only after completing its own probe.
pub trait TaskQueue: Send + Sync {
    fn enqueue(&self, task: Task, delay: Duration);
}

/// Tokio-backed queue: one spawned task per enqueue.
pub struct TokioQueue {
    lane: String,
}

impl TokioQueue {
    pub fn new(lane: impl Into<String>) -> Self {
        Self { lane: lane.into() }
    }
}

impl TaskQueue for TokioQueue {
    fn enqueue(&self, task: Task, delay: Duration) {
        let lane = self.lane.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                sleep(delay).await;
            }
            debug!(lane = %lane, "delayed task firing");
            task.await;
        });
    }
}

/// Adaptive scheduler - maintains an indefinite, self-perpetuating polling
/// loop per monitor with outcome-dependent cadence.
///
/// Each fired task probes, notifies, then enqueues its own successor; a
/// fresh task per hop, not literal recursion.
pub struct Scheduler {
    database: Arc<dyn Database>,
    executor: Arc<ProbeExecutor>,
    notifier: Arc<NotificationEngine>,
    queue: Arc<dyn TaskQueue>,
}

impl Scheduler {
    pub fn new(
        database: Arc<dyn Database>,
        executor: Arc<ProbeExecutor>,
        notifier: Arc<NotificationEngine>,
        queue: Arc<dyn TaskQueue>,
    ) -> Arc<Self> {
        Arc::new(Self { database, executor, notifier, queue })
    }

    /// Bulk re-arm at startup: start one scheduling chain per enabled
    /// monitor and return immediately.
    pub async fn arm_all(self: Arc<Self>) -> Result<usize> {
        let monitors = self.database.get_enabled_monitors().await?;
        let count = monitors.len();

        for monitor in &monitors {
            Arc::clone(&self).arm(monitor).await?;
        }

        info!("armed {count} monitor chains");
        Ok(count)
    }

    /// Single-monitor scheduling operation: compute the next delay from the
    /// monitor's latest snapshot and enqueue the next probe.
    pub async fn arm(self: Arc<Self>, monitor: &Monitor) -> Result<()> {
        let latest = self.database.latest_snapshot(monitor.uuid).await?;
        let delay = next_delay(monitor, latest.as_ref());

        debug!(monitor = %monitor.uuid, delay_seconds = delay.as_secs(), "arming");
        self.enqueue_probe(monitor.uuid, delay);
        Ok(())
    }

    fn enqueue_probe(self: Arc<Self>, monitor_uuid: Uuid, delay: Duration) {
        let queue = Arc::clone(&self.queue);
        queue.enqueue(
            Box::pin(async move {
                self.run_chain_step(monitor_uuid).await;
            }),
            delay,
        );
    }

    /// One hop of the chain: probe, notify, re-arm.
    async fn run_chain_step(self: Arc<Self>, monitor_uuid: Uuid) {
        // the monitor may have been deleted or disabled while this task
        // was waiting to fire
        let monitor = match self.database.get_monitor_by_uuid(monitor_uuid).await {
            Ok(Some(monitor)) if monitor.enabled => monitor,
            Ok(_) => {
                info!(monitor = %monitor_uuid, "monitor gone or disabled, chain stops");
                return;
            }
            Err(e) => {
                error!(monitor = %monitor_uuid, "monitor lookup failed, chain stops: {e:#}");
                return;
            }
        };

        match self.executor.run(&monitor).await {
            Ok(snapshot) => {
                if let Err(e) = self.notifier.handle_snapshot(&monitor, &snapshot).await {
                    warn!(monitor = %monitor_uuid, "notification handling failed: {e:#}");
                }
                let delay = next_delay(&monitor, Some(&snapshot));
                Arc::clone(&self).enqueue_probe(monitor_uuid, delay);
            }
            Err(e) => {
                // persistence failure aborted this invocation; keep the
                // chain alive on the error cadence
                error!(monitor = %monitor_uuid, "probe aborted: {e:#}");
                let delay = Duration::from_secs(monitor.interval_error);
                Arc::clone(&self).enqueue_probe(monitor_uuid, delay);
            }
        }
    }
}

/// Outcome-dependent cadence: a monitor with no history runs immediately;
/// errors and matches use their dedicated intervals.
pub fn next_delay(monitor: &Monitor, latest: Option<&Snapshot>) -> Duration {
    let seconds = match latest {
        None => 0,
        Some(snapshot) if snapshot.is_error => monitor.interval_error,
        Some(snapshot) if snapshot.is_match => monitor.interval_match,
        Some(_) => monitor.interval_normal,
    };

    Duration::from_secs(seconds)
}
