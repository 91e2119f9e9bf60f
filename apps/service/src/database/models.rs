use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::monitoring::matcher::MatchRule;

/// Rolling mean of `time_total` per trailing window, in milliseconds.
/// `None` means no completed snapshot fell inside the window, which is
/// distinct from a mean of zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RollingAverages {
    pub minutes_15: Option<f64>,
    pub minutes_30: Option<f64>,
    pub hours_1: Option<f64>,
    pub hours_12: Option<f64>,
    pub hours_24: Option<f64>,
}

/// Monitor model - a monitored target's configuration and live state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Monitor {
    pub id: Option<i64>,
    pub uuid: Uuid,
    pub name: String,
    pub request_url: String,
    pub request_method: String,
    /// Skip the response body download and never attach a request body.
    pub request_no_body: bool,
    /// Request body, attached for non-GET methods unless `request_no_body`.
    pub request_body: String,
    pub match_rule: MatchRule,
    pub interval_normal: u64,
    pub interval_error: u64,
    pub interval_match: u64,
    pub enabled: bool,
    pub last_error: bool,
    pub last_match: bool,
    /// Most recent occurrence, never cleared on recovery.
    pub last_error_time: Option<DateTime<Utc>>,
    /// Most recent occurrence, never cleared on recovery.
    pub last_match_time: Option<DateTime<Utc>>,
    pub averages: RollingAverages,
    pub user_uuid: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Monitor {
    /// Create a new monitor with default cadence and request policy.
    pub fn new(name: impl Into<String>, request_url: impl Into<String>, user_uuid: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            uuid: Uuid::new_v4(),
            name: name.into(),
            request_url: request_url.into(),
            request_method: "GET".to_string(),
            request_no_body: false,
            request_body: String::new(),
            match_rule: MatchRule::default(),
            interval_normal: 300,
            interval_error: 60,
            interval_match: 60,
            enabled: true,
            last_error: false,
            last_match: false,
            last_error_time: None,
            last_match_time: None,
            averages: RollingAverages::default(),
            user_uuid,
            created_at: now,
            updated_at: now,
        }
    }

    /// Convert a timestamp to Unix seconds for storage
    pub fn timestamp_to_i64(time: DateTime<Utc>) -> i64 {
        time.timestamp()
    }

    /// Convert Unix seconds back to a timestamp
    pub fn i64_to_timestamp(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap_or_default()
    }
}

/// Snapshot model - one probe attempt's full record.
///
/// A snapshot is a two-phase state machine: inserted pending (`is_done =
/// false`) before the network call so a crash mid-probe leaves a detectable
/// incomplete row, then completed exactly once with every result field
/// filled. Completed rows are never mutated again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: Option<i64>,
    pub monitor_uuid: Uuid,
    pub is_done: bool,
    pub http_status_code: Option<u16>,
    /// Status line plus folded response header lines.
    pub headers: String,
    pub body_content: String,
    pub time_total: u64,
    pub time_dns: u64,
    pub time_connection: u64,
    pub time_transport: u64,
    pub is_error: bool,
    pub error_message: String,
    /// Meaningful only when `is_error` is false; matching is skipped on
    /// transport error.
    pub is_match: bool,
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    /// Create the pending phase of a snapshot, before any network I/O.
    pub fn pending(monitor_uuid: Uuid) -> Self {
        Self {
            id: None,
            monitor_uuid,
            is_done: false,
            http_status_code: None,
            headers: String::new(),
            body_content: String::new(),
            time_total: 0,
            time_dns: 0,
            time_connection: 0,
            time_transport: 0,
            is_error: false,
            error_message: String::new(),
            is_match: false,
            created_at: Utc::now(),
        }
    }
}

/// User model - the owner a monitor notifies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Option<i64>,
    pub uuid: Uuid,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: None,
            uuid: Uuid::new_v4(),
            name: name.into(),
            email: email.into(),
            created_at: Utc::now(),
        }
    }
}
