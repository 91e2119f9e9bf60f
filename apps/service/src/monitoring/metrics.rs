use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::database::Database;
use crate::database::models::RollingAverages;

/// Recompute the five trailing-window means of `time_total` for a monitor.
///
/// Only snapshots with `is_done = true` whose `created_at` falls inside the
/// window contribute. An empty window yields `None` - the absence of data,
/// not a latency of zero.
pub async fn rolling_averages(
    database: &dyn Database,
    monitor_uuid: Uuid,
    now: DateTime<Utc>,
) -> Result<RollingAverages> {
    Ok(RollingAverages {
        minutes_15: database.average_time_total(monitor_uuid, now - Duration::minutes(15)).await?,
        minutes_30: database.average_time_total(monitor_uuid, now - Duration::minutes(30)).await?,
        hours_1: database.average_time_total(monitor_uuid, now - Duration::hours(1)).await?,
        hours_12: database.average_time_total(monitor_uuid, now - Duration::hours(12)).await?,
        hours_24: database.average_time_total(monitor_uuid, now - Duration::hours(24)).await?,
    })
}
