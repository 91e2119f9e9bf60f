#![allow(dead_code)]
use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Row, params};
use uuid::Uuid;

use super::models::{Monitor, RollingAverages, Snapshot, User};
use crate::monitoring::validation::validate_monitor;
use crate::pool::LibsqlPool;

const MONITOR_COLUMNS: &str = "id, uuid, name, request_url, request_method, request_no_body, \
    request_body, match_rule, interval_normal, interval_error, interval_match, enabled, \
    last_error, last_match, last_error_time, last_match_time, \
    time_total_average_15minute, time_total_average_30minute, time_total_average_1hour, \
    time_total_average_12hour, time_total_average_24hour, user_uuid, created_at, updated_at";

const SNAPSHOT_COLUMNS: &str = "id, monitor_uuid, is_done, http_status_code, headers, \
    body_content, time_total, time_dns, time_connection, time_transport, is_error, \
    error_message, is_match, created_at";

/// Database trait for abstracting persistence operations.
///
/// Lookups that can legitimately miss return `Ok(None)`; an `Err` always
/// means a persistence failure.
#[async_trait]
pub trait Database: Send + Sync {
    /// Get all enabled monitors
    async fn get_enabled_monitors(&self) -> Result<Vec<Monitor>>;

    /// Get a monitor by UUID
    async fn get_monitor_by_uuid(&self, uuid: Uuid) -> Result<Option<Monitor>>;

    /// Insert or update a monitor's configuration
    async fn save_monitor(&self, monitor: &Monitor) -> Result<i64>;

    /// Persist a monitor's live state and rolling averages as one atomic update
    async fn update_monitor_state(&self, monitor: &Monitor) -> Result<()>;

    /// Delete a monitor by UUID
    async fn delete_monitor(&self, uuid: Uuid) -> Result<()>;

    /// Insert the pending phase of a snapshot, reserving its row
    async fn insert_pending_snapshot(&self, snapshot: &Snapshot) -> Result<i64>;

    /// Fill a pending snapshot's result fields and mark it done
    async fn complete_snapshot(&self, snapshot: &Snapshot) -> Result<()>;

    /// Most recent snapshot for a monitor
    async fn latest_snapshot(&self, monitor_uuid: Uuid) -> Result<Option<Snapshot>>;

    /// Most recent snapshot strictly before `before_id` for a monitor
    async fn snapshot_before(&self, monitor_uuid: Uuid, before_id: i64)
    -> Result<Option<Snapshot>>;

    /// Mean `time_total` over completed snapshots created after `since`
    async fn average_time_total(
        &self,
        monitor_uuid: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Option<f64>>;

    /// Get a user by UUID
    async fn get_user_by_uuid(&self, uuid: Uuid) -> Result<Option<User>>;

    /// Insert a user
    async fn save_user(&self, user: &User) -> Result<i64>;

    /// Snapshots still pending that were created before `cutoff`
    async fn stale_pending_snapshots(&self, cutoff: DateTime<Utc>) -> Result<Vec<Snapshot>>;

    /// Complete a stranded pending snapshot as failed
    async fn fail_snapshot(&self, id: i64, message: &str) -> Result<()>;
}

/// LibSQL implementation backed by a connection pool
pub struct DatabaseImpl {
    pool: LibsqlPool,
}

impl DatabaseImpl {
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    async fn get_conn(&self) -> Result<deadpool::managed::Object<crate::pool::LibsqlManager>> {
        Ok(self.pool.get().await?)
    }
}

fn monitor_from_row(row: &Row) -> Result<Monitor> {
    let uuid_str: String = row.get(1)?;
    let rule_json: String = row.get(7)?;
    let user_uuid_str: String = row.get(21)?;

    Ok(Monitor {
        id: Some(row.get(0)?),
        uuid: Uuid::parse_str(&uuid_str)?,
        name: row.get(2)?,
        request_url: row.get(3)?,
        request_method: row.get(4)?,
        request_no_body: row.get::<i64>(5)? != 0,
        request_body: row.get(6)?,
        match_rule: serde_json::from_str(&rule_json)?,
        interval_normal: row.get::<i64>(8)? as u64,
        interval_error: row.get::<i64>(9)? as u64,
        interval_match: row.get::<i64>(10)? as u64,
        enabled: row.get::<i64>(11)? != 0,
        last_error: row.get::<i64>(12)? != 0,
        last_match: row.get::<i64>(13)? != 0,
        last_error_time: row.get::<Option<i64>>(14)?.map(Monitor::i64_to_timestamp),
        last_match_time: row.get::<Option<i64>>(15)?.map(Monitor::i64_to_timestamp),
        averages: RollingAverages {
            minutes_15: row.get(16)?,
            minutes_30: row.get(17)?,
            hours_1: row.get(18)?,
            hours_12: row.get(19)?,
            hours_24: row.get(20)?,
        },
        user_uuid: Uuid::parse_str(&user_uuid_str)?,
        created_at: Monitor::i64_to_timestamp(row.get(22)?),
        updated_at: Monitor::i64_to_timestamp(row.get(23)?),
    })
}

fn snapshot_from_row(row: &Row) -> Result<Snapshot> {
    let monitor_uuid_str: String = row.get(1)?;

    Ok(Snapshot {
        id: Some(row.get(0)?),
        monitor_uuid: Uuid::parse_str(&monitor_uuid_str)?,
        is_done: row.get::<i64>(2)? != 0,
        http_status_code: row.get::<Option<i64>>(3)?.map(|v| v as u16),
        headers: row.get(4)?,
        body_content: row.get(5)?,
        time_total: row.get::<i64>(6)? as u64,
        time_dns: row.get::<i64>(7)? as u64,
        time_connection: row.get::<i64>(8)? as u64,
        time_transport: row.get::<i64>(9)? as u64,
        is_error: row.get::<i64>(10)? != 0,
        error_message: row.get(11)?,
        is_match: row.get::<i64>(12)? != 0,
        created_at: Monitor::i64_to_timestamp(row.get(13)?),
    })
}

#[async_trait]
impl Database for DatabaseImpl {
    async fn get_enabled_monitors(&self) -> Result<Vec<Monitor>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(&format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE enabled = 1"))
            .await?;

        let mut rows = stmt.query(()).await?;
        let mut monitors = Vec::new();

        while let Some(row) = rows.next().await? {
            monitors.push(monitor_from_row(&row)?);
        }

        Ok(monitors)
    }

    async fn get_monitor_by_uuid(&self, uuid: Uuid) -> Result<Option<Monitor>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(&format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE uuid = ?"))
            .await?;

        let mut rows = stmt.query(params![uuid.to_string()]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(monitor_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn save_monitor(&self, monitor: &Monitor) -> Result<i64> {
        validate_monitor(monitor)?;

        let conn = self.get_conn().await?;
        let rule_json = serde_json::to_string(&monitor.match_rule)?;
        let updated_at = Monitor::timestamp_to_i64(Utc::now());

        if let Some(id) = monitor.id {
            conn.execute(
                "UPDATE monitors SET name = ?, request_url = ?, request_method = ?, \
                 request_no_body = ?, request_body = ?, match_rule = ?, interval_normal = ?, \
                 interval_error = ?, interval_match = ?, enabled = ?, user_uuid = ?, \
                 updated_at = ? WHERE id = ?",
                params![
                    monitor.name.clone(),
                    monitor.request_url.clone(),
                    monitor.request_method.clone(),
                    if monitor.request_no_body { 1 } else { 0 },
                    monitor.request_body.clone(),
                    rule_json,
                    monitor.interval_normal as i64,
                    monitor.interval_error as i64,
                    monitor.interval_match as i64,
                    if monitor.enabled { 1 } else { 0 },
                    monitor.user_uuid.to_string(),
                    updated_at,
                    id
                ],
            )
            .await?;
            Ok(id)
        } else {
            conn.execute(
                "INSERT INTO monitors (uuid, name, request_url, request_method, request_no_body, \
                 request_body, match_rule, interval_normal, interval_error, interval_match, \
                 enabled, user_uuid, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    monitor.uuid.to_string(),
                    monitor.name.clone(),
                    monitor.request_url.clone(),
                    monitor.request_method.clone(),
                    if monitor.request_no_body { 1 } else { 0 },
                    monitor.request_body.clone(),
                    rule_json,
                    monitor.interval_normal as i64,
                    monitor.interval_error as i64,
                    monitor.interval_match as i64,
                    if monitor.enabled { 1 } else { 0 },
                    monitor.user_uuid.to_string(),
                    Monitor::timestamp_to_i64(monitor.created_at),
                    updated_at
                ],
            )
            .await?;

            Ok(conn.last_insert_rowid())
        }
    }

    async fn update_monitor_state(&self, monitor: &Monitor) -> Result<()> {
        let conn = self.get_conn().await?;

        // Live-state flags and rolling averages land in one statement so a
        // concurrent reader never sees a half-applied probe result.
        conn.execute(
            "UPDATE monitors SET last_error = ?, last_match = ?, last_error_time = ?, \
             last_match_time = ?, time_total_average_15minute = ?, \
             time_total_average_30minute = ?, time_total_average_1hour = ?, \
             time_total_average_12hour = ?, time_total_average_24hour = ?, updated_at = ? \
             WHERE uuid = ?",
            params![
                if monitor.last_error { 1 } else { 0 },
                if monitor.last_match { 1 } else { 0 },
                monitor.last_error_time.map(Monitor::timestamp_to_i64),
                monitor.last_match_time.map(Monitor::timestamp_to_i64),
                monitor.averages.minutes_15,
                monitor.averages.minutes_30,
                monitor.averages.hours_1,
                monitor.averages.hours_12,
                monitor.averages.hours_24,
                Monitor::timestamp_to_i64(monitor.updated_at),
                monitor.uuid.to_string()
            ],
        )
        .await?;

        Ok(())
    }

    async fn delete_monitor(&self, uuid: Uuid) -> Result<()> {
        let conn = self.get_conn().await?;

        // Snapshot rows go with it via ON DELETE CASCADE
        conn.execute("DELETE FROM monitors WHERE uuid = ?", params![uuid.to_string()]).await?;
        Ok(())
    }

    async fn insert_pending_snapshot(&self, snapshot: &Snapshot) -> Result<i64> {
        let conn = self.get_conn().await?;

        conn.execute(
            "INSERT INTO snapshots (monitor_uuid, is_done, created_at) VALUES (?, 0, ?)",
            params![
                snapshot.monitor_uuid.to_string(),
                Monitor::timestamp_to_i64(snapshot.created_at)
            ],
        )
        .await?;

        Ok(conn.last_insert_rowid())
    }

    async fn complete_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let Some(id) = snapshot.id else {
            bail!("cannot complete a snapshot that was never inserted");
        };

        let conn = self.get_conn().await?;

        let affected = conn
            .execute(
                "UPDATE snapshots SET is_done = 1, http_status_code = ?, headers = ?, \
                 body_content = ?, time_total = ?, time_dns = ?, time_connection = ?, \
                 time_transport = ?, is_error = ?, error_message = ?, is_match = ? \
                 WHERE id = ? AND is_done = 0",
                params![
                    snapshot.http_status_code.map(|v| v as i64),
                    snapshot.headers.clone(),
                    snapshot.body_content.clone(),
                    snapshot.time_total as i64,
                    snapshot.time_dns as i64,
                    snapshot.time_connection as i64,
                    snapshot.time_transport as i64,
                    if snapshot.is_error { 1 } else { 0 },
                    snapshot.error_message.clone(),
                    if snapshot.is_match { 1 } else { 0 },
                    id
                ],
            )
            .await?;

        if affected == 0 {
            bail!("snapshot {id} is missing or already completed");
        }

        Ok(())
    }

    async fn latest_snapshot(&self, monitor_uuid: Uuid) -> Result<Option<Snapshot>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM snapshots WHERE monitor_uuid = ? \
                 ORDER BY id DESC LIMIT 1"
            ))
            .await?;

        let mut rows = stmt.query(params![monitor_uuid.to_string()]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(snapshot_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn snapshot_before(
        &self,
        monitor_uuid: Uuid,
        before_id: i64,
    ) -> Result<Option<Snapshot>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM snapshots WHERE monitor_uuid = ? AND id < ? \
                 ORDER BY id DESC LIMIT 1"
            ))
            .await?;

        let mut rows = stmt.query(params![monitor_uuid.to_string(), before_id]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(snapshot_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn average_time_total(
        &self,
        monitor_uuid: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Option<f64>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT AVG(time_total) FROM snapshots \
                 WHERE monitor_uuid = ? AND is_done = 1 AND created_at > ?",
                params![monitor_uuid.to_string(), Monitor::timestamp_to_i64(since)],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(row.get::<Option<f64>>(0)?),
            None => Ok(None),
        }
    }

    async fn get_user_by_uuid(&self, uuid: Uuid) -> Result<Option<User>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare("SELECT id, uuid, name, email, created_at FROM users WHERE uuid = ?")
            .await?;

        let mut rows = stmt.query(params![uuid.to_string()]).await?;

        match rows.next().await? {
            Some(row) => {
                let uuid_str: String = row.get(1)?;
                Ok(Some(User {
                    id: Some(row.get(0)?),
                    uuid: Uuid::parse_str(&uuid_str)?,
                    name: row.get(2)?,
                    email: row.get(3)?,
                    created_at: Monitor::i64_to_timestamp(row.get(4)?),
                }))
            }
            None => Ok(None),
        }
    }

    async fn save_user(&self, user: &User) -> Result<i64> {
        let conn = self.get_conn().await?;

        conn.execute(
            "INSERT INTO users (uuid, name, email, created_at) VALUES (?, ?, ?, ?)",
            params![
                user.uuid.to_string(),
                user.name.clone(),
                user.email.clone(),
                Monitor::timestamp_to_i64(user.created_at)
            ],
        )
        .await?;

        Ok(conn.last_insert_rowid())
    }

    async fn stale_pending_snapshots(&self, cutoff: DateTime<Utc>) -> Result<Vec<Snapshot>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM snapshots WHERE is_done = 0 AND created_at < ?"
            ))
            .await?;

        let mut rows = stmt.query(params![Monitor::timestamp_to_i64(cutoff)]).await?;
        let mut snapshots = Vec::new();

        while let Some(row) = rows.next().await? {
            snapshots.push(snapshot_from_row(&row)?);
        }

        Ok(snapshots)
    }

    async fn fail_snapshot(&self, id: i64, message: &str) -> Result<()> {
        let conn = self.get_conn().await?;

        conn.execute(
            "UPDATE snapshots SET is_done = 1, is_error = 1, error_message = ? \
             WHERE id = ? AND is_done = 0",
            params![message, id],
        )
        .await?;

        Ok(())
    }
}
